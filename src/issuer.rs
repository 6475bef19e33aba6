//! Certificate issuance.
//!
//! [`CertificateIssuer::sign_request`] is the only place a serial is
//! committed: policy check, signature, serial advance, ledger append and the
//! `newcerts/` archive happen there in that order. Host issuance and
//! intermediate signing both go through it.

use crate::chain::ChainBuilder;
use crate::error::{Error, Result};
use crate::fsutil::{write_new, write_private};
use crate::host::HostProfile;
use crate::secret::{generate_passphrase, SecretSource, GENERATED_PASSPHRASE_LEN};
use crate::store::AuthorityStore;
use crate::toolkit::{SigningRequest, Toolkit};
use crate::types::{CertificateRecord, DistinguishedName, ExtensionProfile, Serial};
use chrono::{Duration, NaiveDate, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub serial: Serial,
    pub certificate_pem: String,
    pub record: CertificateRecord,
}

/// One signing event for one host, `<host>/<YYYY-MM-DD>-<n>`.
#[derive(Debug, Clone)]
pub struct IssuanceInstance {
    pub hostname: String,
    pub dir: PathBuf,
    pub serial: Serial,
    /// False when the host supplied its own CSR.
    pub generated_key: bool,
    pub keystore: bool,
    pub chained: bool,
}

impl IssuanceInstance {
    /// Path of the artifact with the given extension, e.g. `crt` or `chained.p12`.
    pub fn file(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.hostname, extension))
    }
}

pub struct CertificateIssuer;

impl CertificateIssuer {
    pub fn issue_for_host(
        store: &mut AuthorityStore,
        hostname: &str,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
        issued_on: NaiveDate,
    ) -> Result<IssuanceInstance> {
        let profile = HostProfile::load(store, hostname)?;
        let days = profile.config.validity_days()?;
        store.certificate_pem()?;
        store.ledger()?;

        // The subject is checked before anything lands in the host
        // directory, so a rejected request leaves a supplied CSR in place.
        let host_dir = store.host_dir(hostname);
        let supplied_csr = host_dir.join(format!("{}.csr", hostname));
        let supplied = if supplied_csr.is_file() {
            let csr = fs::read_to_string(&supplied_csr)?;
            Self::check_subject(store, &toolkit.inspect_csr(&csr)?)?;
            Some(csr)
        } else {
            Self::check_subject(store, &profile.config.subject)?;
            None
        };

        let dir = allocate_instance_dir(&host_dir, issued_on)?;
        let artifact = |ext: &str| dir.join(format!("{}.{}", hostname, ext));

        let (csr, key) = if let Some(csr) = supplied {
            fs::rename(&supplied_csr, artifact("csr"))?;
            debug!(host = hostname, "using supplied CSR");
            (csr, None)
        } else {
            let key = toolkit.generate_key(store.config().key_algorithm)?;
            write_private(&artifact("key"), key.as_bytes())?;
            let csr = toolkit.build_csr(&key, &profile.config.subject, profile.alt_names())?;
            write_new(&artifact("csr"), &csr)?;
            (csr, Some(key))
        };

        let signed = Self::sign_request(
            store,
            &csr,
            days,
            ExtensionProfile::Leaf,
            secret,
            toolkit,
        )?;
        let certificate = &signed.certificate_pem;
        write_new(&artifact("crt"), certificate)?;

        let chain = store.chain_pem()?;
        let mut keystore = false;

        if let Some(ref key) = key {
            let keycrt = ChainBuilder::concat(key, certificate);
            write_private(&artifact("keycrt"), &keycrt)?;

            let passphrase = generate_passphrase(GENERATED_PASSPHRASE_LEN);
            write_private(&artifact("pass"), format!("{}\n", passphrase.as_str()))?;

            let p12 = toolkit.pkcs12(key, certificate, None, &passphrase, hostname)?;
            write_private(&artifact("p12"), p12)?;
            keystore = toolkit.keystore(&artifact("p12"), &artifact("jks"), &passphrase, hostname)?;

            if let Some(ref chain) = chain {
                write_private(
                    &artifact("chained.keycrt"),
                    ChainBuilder::concat(&keycrt, chain),
                )?;
                let p12 = toolkit.pkcs12(key, certificate, Some(chain), &passphrase, hostname)?;
                write_private(&artifact("chained.p12"), p12)?;
            }
        }

        if let Some(ref chain) = chain {
            write_new(&artifact("chained.crt"), ChainBuilder::concat(certificate, chain))?;
        }

        info!(
            host = hostname,
            serial = %signed.serial,
            dir = %dir.display(),
            "certificate issued"
        );

        Ok(IssuanceInstance {
            hostname: hostname.to_string(),
            dir,
            serial: signed.serial,
            generated_key: key.is_some(),
            keystore,
            chained: chain.is_some(),
        })
    }

    /// Signs `csr_pem` with the store's key and records the result.
    ///
    /// The serial is read before signing and only advanced once the toolkit
    /// has produced a certificate, so a failed signature costs nothing.
    pub fn sign_request(
        store: &mut AuthorityStore,
        csr_pem: &str,
        validity_days: u32,
        profile: ExtensionProfile,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<SignedCertificate> {
        if validity_days == 0 {
            return Err(Error::InvalidInput("validity must be at least one day".into()));
        }
        let issuer_cert = store.certificate_pem()?;

        let subject = toolkit.inspect_csr(csr_pem)?;
        Self::check_subject(store, &subject)?;

        let serial = store.serials().peek_serial()?;
        if store.ledger()?.get(serial).is_some() {
            return Err(Error::SerialCollision(serial.to_string()));
        }
        let archive = store.archive_path(serial);
        if archive.exists() {
            return Err(Error::SerialCollision(serial.to_string()));
        }

        let issuer_key = store.private_key(secret)?;
        let not_before = Utc::now();
        let not_after = not_before + Duration::days(validity_days as i64);

        let certificate_pem = toolkit.sign(&SigningRequest {
            csr_pem,
            issuer_key_pem: &issuer_key,
            issuer_cert_pem: &issuer_cert,
            serial,
            not_before,
            not_after,
            profile,
            extensions: &store.config().extensions,
        })?;

        let committed = store.serials().next_serial()?;
        if committed != serial {
            return Err(Error::Integrity(format!(
                "serial counter moved from {} to {} during signing",
                serial, committed
            )));
        }

        let ledger = store.ledger_mut()?;
        let record = ledger.append(serial, subject, not_after)?;
        ledger.save()?;
        write_new(&archive, &certificate_pem)?;

        info!(
            authority = %store.common_name(),
            serial = %serial,
            subject = %record.subject,
            "request signed"
        );

        Ok(SignedCertificate {
            serial,
            certificate_pem,
            record,
        })
    }

    fn check_subject(store: &AuthorityStore, subject: &DistinguishedName) -> Result<()> {
        store
            .config()
            .policy
            .check(&store.config().subject, subject)?;
        subject.validate()
    }
}

/// Creates the first free `<date>-<n>` directory, counting from 1.
fn allocate_instance_dir(host_dir: &Path, issued_on: NaiveDate) -> Result<PathBuf> {
    if !host_dir.is_dir() {
        return Err(Error::MissingFile(host_dir.to_path_buf()));
    }
    let date = issued_on.format("%Y-%m-%d");
    for n in 1u32.. {
        let dir = host_dir.join(format!("{}-{}", date, n));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Integrity(format!(
        "no free issuance directory under {}",
        host_dir.display()
    )))
}
