use crate::error::{Error, Result};
use crate::secret::SecretSource;
use crate::store::{same_path, AuthorityStore};
use crate::toolkit::Toolkit;
use crate::types::{CertStatus, CertificateRecord, Target};
use chrono::Utc;
use tracing::info;

/// Keeps `index.txt` and `crl.pem` in step.
pub struct RevocationManager;

impl RevocationManager {
    /// Revokes the current valid certificate for `target` and republishes the CRL.
    ///
    /// Everything that can fail without side effects (target resolution,
    /// ledger lookup, unlocking the key) runs before the ledger is touched.
    pub fn revoke(
        store: &mut AuthorityStore,
        target: &Target,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<CertificateRecord> {
        let common_name = Self::resolve(store, target)?;
        let certificate = store.certificate_pem()?;
        let record = store.ledger()?.find_valid_by_common_name(&common_name)?;
        let now = Utc::now();
        if record.not_after <= now {
            return Err(Error::NotRevocable {
                serial: record.serial.to_string(),
                status: CertStatus::Expired.to_string(),
            });
        }
        let key = store.private_key(secret)?;

        let ledger = store.ledger_mut()?;
        let revoked = ledger.mark_revoked_at(record.serial, now)?;
        ledger.save()?;
        info!(
            target = %target,
            serial = %revoked.serial,
            "certificate revoked"
        );

        Self::publish(store, &key, &certificate, toolkit)?;
        Ok(revoked)
    }

    /// Re-derives `crl.pem` from the ledger. Returns the CRL number used.
    pub fn generate_crl(
        store: &mut AuthorityStore,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<u64> {
        let certificate = store.certificate_pem()?;
        let key = store.private_key(secret)?;
        Self::publish(store, &key, &certificate, toolkit)
    }

    fn publish(
        store: &mut AuthorityStore,
        key_pem: &str,
        certificate_pem: &str,
        toolkit: &dyn Toolkit,
    ) -> Result<u64> {
        let number = store.serials().peek_crl_number()?;
        store.write_crl(key_pem, certificate_pem, number, toolkit)?;
        store.serials().next_crl_number()?;
        Ok(number)
    }

    /// Maps a target to the common name recorded in the ledger.
    fn resolve(store: &AuthorityStore, target: &Target) -> Result<String> {
        match target {
            Target::Host(name) if name.trim().is_empty() => {
                Err(Error::InvalidInput("empty revocation target".into()))
            }
            Target::Host(name) => Ok(name.clone()),
            Target::IntermediateCa(path) => {
                let child = AuthorityStore::open(path)?;
                match child.parent_path() {
                    Some(parent) if same_path(parent, store.path()) => {
                        Ok(child.common_name().to_string())
                    }
                    _ => Err(Error::InvalidInput(format!(
                        "{} was not signed by {}",
                        path.display(),
                        store.path().display()
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorityConfig, KeyProtection};
    use crate::secret::StaticSecret;
    use crate::toolkit::RcgenToolkit;
    use crate::types::{DistinguishedName, Serial};
    use chrono::Duration;

    fn root(dir: &std::path::Path) -> AuthorityStore {
        let config = AuthorityConfig::new(DistinguishedName::new("Root"))
            .with_validity_days(30)
            .with_key_protection(KeyProtection {
                memory_kib: 64,
                iterations: 1,
            });
        AuthorityStore::initialize_root(
            dir,
            config,
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_target_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = root(dir.path());
        let crl_before = store.crl_pem().unwrap();

        let result = RevocationManager::revoke(
            &mut store,
            &Target::Host("ghost".into()),
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.crl_pem().unwrap(), crl_before);
        assert_eq!(store.serials().peek_crl_number().unwrap(), 1);
    }

    #[test]
    fn test_lapsed_certificate_is_not_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = root(dir.path());
        {
            let ledger = store.ledger_mut().unwrap();
            ledger
                .append(
                    Serial(2),
                    DistinguishedName::new("old.example.com"),
                    Utc::now() - Duration::days(3),
                )
                .unwrap();
            ledger.save().unwrap();
        }
        let mut store = AuthorityStore::open(dir.path()).unwrap();
        let index_before = std::fs::read_to_string(store.ledger().unwrap().path()).unwrap();
        let crl_before = store.crl_pem().unwrap();

        let result = RevocationManager::revoke(
            &mut store,
            &Target::Host("old.example.com".into()),
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        );
        assert!(matches!(result, Err(Error::NotRevocable { .. })));
        assert_eq!(
            std::fs::read_to_string(store.ledger().unwrap().path()).unwrap(),
            index_before
        );
        assert_eq!(store.crl_pem().unwrap(), crl_before);
        assert_eq!(store.serials().peek_crl_number().unwrap(), 1);
    }

    #[test]
    fn test_generate_crl_advances_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = root(dir.path());
        let toolkit = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");

        assert_eq!(
            RevocationManager::generate_crl(&mut store, &mut secret, &toolkit).unwrap(),
            1
        );
        assert_eq!(
            RevocationManager::generate_crl(&mut store, &mut secret, &toolkit).unwrap(),
            2
        );
        assert_eq!(store.serials().peek_crl_number().unwrap(), 3);
    }

    #[test]
    fn test_foreign_intermediate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = root(&dir.path().join("a"));
        let other = root(&dir.path().join("b"));

        let result = RevocationManager::revoke(
            &mut store,
            &Target::IntermediateCa(other.path().to_path_buf()),
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
