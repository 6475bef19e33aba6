//! Parent/child signing of intermediate authorities.
//!
//! The child prepares a key and `ca.csr` on its own. The parent then signs it
//! as an authority certificate, spending one of *its* serials and appending
//! to *its* ledger. Only after that does the child get a certificate, chain
//! file and bookkeeping of its own.

use crate::chain::ChainBuilder;
use crate::config::AuthorityConfig;
use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::issuer::CertificateIssuer;
use crate::secret::SecretSource;
use crate::serial::SerialAllocator;
use crate::store::AuthorityStore;
use crate::toolkit::Toolkit;
use crate::types::ExtensionProfile;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub struct IntermediateCoordinator;

impl IntermediateCoordinator {
    /// Child side: key and pending CSR. A CSR left by an earlier attempt is kept.
    pub fn prepare_child(
        path: impl AsRef<Path>,
        config: AuthorityConfig,
        parent_path: &Path,
        toolkit: &dyn Toolkit,
        secret: &mut dyn SecretSource,
    ) -> Result<AuthorityStore> {
        let mut config = config;
        config.parent = Some(parent_path.to_path_buf());

        let child = AuthorityStore::create_layout(path, config)?;
        let key = child.ensure_key(secret, toolkit)?;

        if child.csr_path().is_file() {
            debug!(path = %child.csr_path().display(), "reusing pending CSR");
            return Ok(child);
        }

        let csr = toolkit.build_csr(&key, &child.config().subject, &[])?;
        write_atomic(&child.csr_path(), csr)?;
        debug!(path = %child.path().display(), "intermediate CSR written");
        Ok(child)
    }

    pub fn sign_against_parent(
        parent: &mut AuthorityStore,
        child: &mut AuthorityStore,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<()> {
        if !AuthorityStore::exists(child.path()) {
            return Err(Error::NotConfigured(child.path().to_path_buf()));
        }
        if child.is_initialized() {
            return Err(Error::AlreadyInitialized(child.path().to_path_buf()));
        }
        let csr_path = child.csr_path();
        if !csr_path.is_file() {
            return Err(Error::MissingFile(csr_path));
        }
        if !parent.is_initialized() {
            return Err(Error::NotInitialized(parent.path().to_path_buf()));
        }

        let days = child.config().validity_days()?;
        let key = child.private_key(secret)?;

        // A certificate the parent already signed is imported, never signed
        // a second time.
        let pending = child.pending_certificate_path();
        let (certificate, serial) = if pending.is_file() {
            debug!(path = %pending.display(), "importing pending certificate");
            (fs::read_to_string(&pending)?, None)
        } else {
            let csr = fs::read_to_string(&csr_path)?;
            let signed = CertificateIssuer::sign_request(
                parent,
                &csr,
                days,
                ExtensionProfile::Authority,
                secret,
                toolkit,
            )?;
            write_atomic(&pending, &signed.certificate_pem)?;
            (signed.certificate_pem, Some(signed.serial))
        };

        let parent_chain = parent.chain_pem()?;
        let chain = ChainBuilder::build(&certificate, parent_chain.as_deref())?;

        SerialAllocator::initialize(child.path())?;
        child.install(&key, &certificate, Some(&chain), toolkit)?;
        fs::remove_file(&pending)?;

        info!(
            parent = %parent.common_name(),
            child = %child.common_name(),
            serial = ?serial.map(|s| s.to_string()),
            "intermediate authority initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyProtection;
    use crate::secret::StaticSecret;
    use crate::store::PENDING_CERT_FILE;
    use crate::toolkit::{CrlRequest, RcgenToolkit, SigningRequest};
    use crate::types::{AltName, DistinguishedName, KeyAlgorithm, Serial};
    use chrono::{DateTime, Utc};
    use std::cell::Cell;
    use zeroize::Zeroizing;

    fn config(cn: &str) -> AuthorityConfig {
        AuthorityConfig::new(DistinguishedName::new(cn))
            .with_validity_days(365)
            .with_key_protection(KeyProtection {
                memory_kib: 64,
                iterations: 1,
            })
    }

    #[test]
    fn test_unsigned_child_has_no_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");

        let child = IntermediateCoordinator::prepare_child(
            dir.path().join("sub"),
            config("Sub"),
            &dir.path().join("root"),
            &toolkit,
            &mut secret,
        )
        .unwrap();

        assert!(child.csr_path().is_file());
        assert!(!child.is_initialized());
        assert!(!child.is_root());
        assert!(matches!(child.ledger(), Err(Error::NotInitialized(_))));
    }

    #[test]
    fn test_uninitialized_parent_spends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");

        let mut parent = IntermediateCoordinator::prepare_child(
            dir.path().join("mid"),
            config("Mid"),
            &dir.path().join("root"),
            &toolkit,
            &mut secret,
        )
        .unwrap();
        let mut child = IntermediateCoordinator::prepare_child(
            dir.path().join("leafca"),
            config("Leaf CA"),
            parent.path(),
            &toolkit,
            &mut secret,
        )
        .unwrap();

        let result = IntermediateCoordinator::sign_against_parent(
            &mut parent,
            &mut child,
            &mut secret,
            &toolkit,
        );
        assert!(matches!(result, Err(Error::NotInitialized(_))));
        assert!(child.csr_path().is_file());
    }

    #[test]
    fn test_signing_spends_parent_serial() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");

        let mut root = AuthorityStore::initialize_root(
            dir.path().join("root"),
            config("Root"),
            &mut secret,
            &toolkit,
        )
        .unwrap();
        let sub = AuthorityStore::initialize_intermediate(
            dir.path().join("sub"),
            config("Sub"),
            &mut root,
            &mut secret,
            &toolkit,
        )
        .unwrap();

        let record = root.ledger().unwrap().get(Serial(2)).unwrap().clone();
        assert_eq!(record.common_name(), "Sub");
        assert_eq!(root.serials().peek_serial().unwrap(), Serial(3));

        assert!(sub.is_initialized());
        assert!(!sub.csr_path().exists());
        assert!(sub.ledger().unwrap().is_empty());
        assert_eq!(sub.serials().peek_serial().unwrap(), Serial(1));
        assert_eq!(
            sub.chain_pem().unwrap().unwrap().trim_end(),
            sub.certificate_pem().unwrap().trim_end()
        );
    }

    /// Fails the first CRL export, then behaves.
    struct FlakyCrl {
        inner: RcgenToolkit,
        failed: Cell<bool>,
    }

    impl Toolkit for FlakyCrl {
        fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Zeroizing<String>> {
            self.inner.generate_key(algorithm)
        }

        fn build_csr(
            &self,
            key_pem: &str,
            subject: &DistinguishedName,
            alt_names: &[AltName],
        ) -> Result<String> {
            self.inner.build_csr(key_pem, subject, alt_names)
        }

        fn inspect_csr(&self, csr_pem: &str) -> Result<DistinguishedName> {
            self.inner.inspect_csr(csr_pem)
        }

        fn self_sign(
            &self,
            key_pem: &str,
            subject: &DistinguishedName,
            serial: Serial,
            not_before: DateTime<Utc>,
            not_after: DateTime<Utc>,
        ) -> Result<String> {
            self.inner
                .self_sign(key_pem, subject, serial, not_before, not_after)
        }

        fn sign(&self, request: &SigningRequest<'_>) -> Result<String> {
            self.inner.sign(request)
        }

        fn export_crl(&self, request: &CrlRequest<'_>) -> Result<String> {
            if !self.failed.replace(true) {
                return Err(Error::Crl("transient".into()));
            }
            self.inner.export_crl(request)
        }

        fn pkcs12(
            &self,
            key_pem: &str,
            cert_pem: &str,
            chain_pem: Option<&str>,
            passphrase: &str,
            name: &str,
        ) -> Result<Vec<u8>> {
            self.inner
                .pkcs12(key_pem, cert_pem, chain_pem, passphrase, name)
        }

        fn keystore(
            &self,
            pkcs12_path: &Path,
            keystore_path: &Path,
            passphrase: &str,
            alias: &str,
        ) -> Result<bool> {
            self.inner
                .keystore(pkcs12_path, keystore_path, passphrase, alias)
        }
    }

    #[test]
    fn test_retry_after_child_failure_reuses_parent_signature() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");

        let mut root = AuthorityStore::initialize_root(
            dir.path().join("root"),
            config("Root"),
            &mut secret,
            &stock,
        )
        .unwrap();

        let flaky = FlakyCrl {
            inner: RcgenToolkit::new().without_keystore(),
            failed: Cell::new(false),
        };
        let first = AuthorityStore::initialize_intermediate(
            dir.path().join("sub"),
            config("Sub"),
            &mut root,
            &mut secret,
            &flaky,
        );
        assert!(matches!(first, Err(Error::Crl(_))));
        assert!(dir.path().join("sub").join(PENDING_CERT_FILE).is_file());
        assert_eq!(root.serials().peek_serial().unwrap(), Serial(3));

        let sub = AuthorityStore::initialize_intermediate(
            dir.path().join("sub"),
            config("Sub"),
            &mut root,
            &mut secret,
            &flaky,
        )
        .unwrap();

        assert!(sub.is_initialized());
        assert!(!sub.pending_certificate_path().exists());
        assert_eq!(root.serials().peek_serial().unwrap(), Serial(3));
        assert_eq!(root.ledger().unwrap().len(), 1);
        assert_eq!(
            root.ledger().unwrap().list_by_status(crate::types::CertStatus::Valid),
            vec!["Sub"]
        );
        assert_eq!(
            std::fs::read_to_string(root.archive_path(Serial(2))).unwrap(),
            sub.certificate_pem().unwrap()
        );
    }
}
