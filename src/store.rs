//! One certificate authority on disk.
//!
//! An [`AuthorityStore`] is a directory holding the CA's configuration, its
//! sealed private key, its certificate and the bookkeeping files `openssl ca`
//! would recognise (`index.txt`, `serial`, `crlnumber`). A store becomes
//! *initialized* the moment `ca.crt` is written, which is always the last
//! step of initialization.

use crate::chain::CHAIN_FILE;
use crate::config::AuthorityConfig;
use crate::error::{Error, Result};
use crate::fsutil::{create_private_dir, write_atomic, write_new, write_private};
use crate::intermediate::IntermediateCoordinator;
use crate::keyseal;
use crate::ledger::{Ledger, LEDGER_FILE};
use crate::secret::SecretSource;
use crate::serial::{SerialAllocator, CRL_NUMBER_FILE, SERIAL_FILE};
use crate::toolkit::{CrlRequest, Toolkit};
use crate::types::Serial;
use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const CONFIG_FILE: &str = "ca.toml";
pub const PRIVATE_DIR: &str = "private";
pub const KEY_FILE: &str = "ca.key";
pub const CSR_FILE: &str = "ca.csr";
pub const CERT_FILE: &str = "ca.crt";
/// Parent-signed certificate not yet installed.
pub const PENDING_CERT_FILE: &str = "ca.crt.pending";
pub const CRL_FILE: &str = "crl.pem";
pub const NEWCERTS_DIR: &str = "newcerts";
pub const HOST_TEMPLATE_FILE: &str = "host.cnf.tmpl";

/// Top-level names a host directory may never take.
pub const RESERVED_NAMES: &[&str] = &[
    CONFIG_FILE,
    PRIVATE_DIR,
    CSR_FILE,
    CERT_FILE,
    PENDING_CERT_FILE,
    CHAIN_FILE,
    CRL_FILE,
    NEWCERTS_DIR,
    HOST_TEMPLATE_FILE,
    LEDGER_FILE,
    SERIAL_FILE,
    CRL_NUMBER_FILE,
];

pub struct AuthorityStore {
    root: PathBuf,
    config: AuthorityConfig,
    serials: SerialAllocator,
    ledger: Option<Ledger>,
}

impl AuthorityStore {
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(CONFIG_FILE).is_file()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !Self::exists(&root) {
            return Err(Error::NotConfigured(root));
        }

        let config = AuthorityConfig::load(root.join(CONFIG_FILE))?;
        let mut store = Self {
            serials: SerialAllocator::open(&root),
            ledger: None,
            root,
            config,
        };
        store.check_lineage()?;

        if store.is_initialized() {
            store.ledger = Some(Ledger::load(store.root.join(LEDGER_FILE))?);
        }

        Ok(store)
    }

    /// Creates a self-signed root authority at `path`.
    ///
    /// The self-signature takes serial `01`, so the first certificate this
    /// root issues is `02`. A bootstrap CRL numbered 0 is written alongside.
    pub fn initialize_root(
        path: impl AsRef<Path>,
        config: AuthorityConfig,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<Self> {
        if config.parent.is_some() {
            return Err(Error::Config(
                "a root authority cannot name a parent".into(),
            ));
        }

        let mut store = Self::create_layout(path, config)?;
        let days = store.config.validity_days()?;
        let key = store.ensure_key(secret, toolkit)?;

        let serials = SerialAllocator::initialize(&store.root)?;
        let serial = serials.peek_serial()?;
        let not_before = Utc::now();
        let not_after = not_before + Duration::days(days as i64);

        let certificate = toolkit.self_sign(
            &key,
            &store.config.subject,
            serial,
            not_before,
            not_after,
        )?;
        serials.next_serial()?;

        store.install(&key, &certificate, None, toolkit)?;
        info!(
            path = %store.root.display(),
            common_name = %store.common_name(),
            serial = %serial,
            "root authority initialized"
        );
        Ok(store)
    }

    /// Creates an authority at `path` signed by `parent`.
    ///
    /// If the parent refuses to sign, the child is left with its key and
    /// pending CSR so the call can simply be repeated.
    pub fn initialize_intermediate(
        path: impl AsRef<Path>,
        config: AuthorityConfig,
        parent: &mut AuthorityStore,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<Self> {
        if !parent.is_initialized() {
            return Err(Error::NotInitialized(parent.root.clone()));
        }

        let mut child =
            IntermediateCoordinator::prepare_child(path, config, &parent.root, toolkit, secret)?;
        IntermediateCoordinator::sign_against_parent(parent, &mut child, secret, toolkit)?;
        Ok(child)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn common_name(&self) -> &str {
        &self.config.subject.common_name
    }

    pub fn is_root(&self) -> bool {
        self.config.parent.is_none()
    }

    pub fn parent_path(&self) -> Option<&Path> {
        self.config.parent.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.root.join(CERT_FILE).is_file()
    }

    pub fn certificate_pem(&self) -> Result<String> {
        let path = self.root.join(CERT_FILE);
        if !path.is_file() {
            return Err(Error::NotInitialized(self.root.clone()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// The chain file, present only on intermediates.
    pub fn chain_pem(&self) -> Result<Option<String>> {
        let path = self.root.join(CHAIN_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    pub fn crl_pem(&self) -> Result<String> {
        let path = self.root.join(CRL_FILE);
        if !path.is_file() {
            return Err(Error::MissingFile(path));
        }
        Ok(fs::read_to_string(path)?)
    }

    pub fn ledger(&self) -> Result<&Ledger> {
        self.ledger
            .as_ref()
            .ok_or_else(|| Error::NotInitialized(self.root.clone()))
    }

    pub fn ledger_mut(&mut self) -> Result<&mut Ledger> {
        self.ledger
            .as_mut()
            .ok_or_else(|| Error::NotInitialized(self.root.clone()))
    }

    pub fn serials(&self) -> &SerialAllocator {
        &self.serials
    }

    pub fn host_dir(&self, hostname: &str) -> PathBuf {
        self.root.join(hostname)
    }

    pub fn archive_path(&self, serial: Serial) -> PathBuf {
        self.root.join(NEWCERTS_DIR).join(format!("{}.pem", serial))
    }

    pub fn csr_path(&self) -> PathBuf {
        self.root.join(CSR_FILE)
    }

    pub fn pending_certificate_path(&self) -> PathBuf {
        self.root.join(PENDING_CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.root.join(PRIVATE_DIR).join(KEY_FILE)
    }

    pub fn host_template_path(&self) -> PathBuf {
        self.root.join(HOST_TEMPLATE_FILE)
    }

    /// Marks valid records past their not-after date as expired and saves
    /// the ledger when anything changed.
    pub fn refresh_expiry(&mut self) -> Result<usize> {
        let ledger = self.ledger_mut()?;
        let transitions = ledger.refresh_expiry(Utc::now());
        if transitions > 0 {
            ledger.save()?;
            info!(count = transitions, "ledger records expired");
        }
        Ok(transitions)
    }

    /// Decrypts the authority key.
    pub fn private_key(&self, secret: &mut dyn SecretSource) -> Result<Zeroizing<String>> {
        let path = self.key_path();
        if !path.is_file() {
            return Err(Error::MissingFile(path));
        }
        let sealed = fs::read_to_string(&path)?;
        let passphrase = secret.passphrase()?;
        keyseal::open(&sealed, &passphrase)
    }

    /// Writes the directory skeleton and `ca.toml` for an authority that has
    /// no certificate yet.
    pub(crate) fn create_layout(path: impl AsRef<Path>, config: AuthorityConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.join(CERT_FILE).exists() {
            return Err(Error::AlreadyInitialized(root));
        }
        config.validity_days()?;

        fs::create_dir_all(&root)?;
        create_private_dir(&root.join(PRIVATE_DIR))?;
        config.save(root.join(CONFIG_FILE))?;

        let store = Self {
            serials: SerialAllocator::open(&root),
            ledger: None,
            root,
            config,
        };
        store.check_lineage()?;
        Ok(store)
    }

    /// Returns the authority key, generating and sealing one on first use.
    pub(crate) fn ensure_key(
        &self,
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
    ) -> Result<Zeroizing<String>> {
        if self.key_path().is_file() {
            debug!(path = %self.key_path().display(), "reusing existing authority key");
            return self.private_key(secret);
        }

        let key = toolkit.generate_key(self.config.key_algorithm)?;
        let passphrase = secret.passphrase()?;
        let sealed = keyseal::seal(&key, &passphrase, self.config.key_protection)?;
        write_private(&self.key_path(), sealed)?;
        debug!(
            path = %self.key_path().display(),
            algorithm = self.config.key_algorithm.name(),
            "authority key generated"
        );
        Ok(key)
    }

    /// Finishes initialization once a certificate exists: ledger, chain file,
    /// bootstrap CRL, then `ca.crt` itself. Counters are the caller's job.
    pub(crate) fn install(
        &mut self,
        key_pem: &str,
        certificate_pem: &str,
        chain_pem: Option<&str>,
        toolkit: &dyn Toolkit,
    ) -> Result<()> {
        fs::create_dir_all(self.root.join(NEWCERTS_DIR))?;
        self.ledger = Some(empty_ledger(&self.root.join(LEDGER_FILE))?);

        if let Some(chain) = chain_pem {
            write_atomic(&self.root.join(CHAIN_FILE), chain)?;
        }

        self.write_crl(key_pem, certificate_pem, 0, toolkit)?;
        write_new(&self.root.join(CERT_FILE), certificate_pem)?;

        let csr = self.csr_path();
        if csr.exists() {
            fs::remove_file(&csr)?;
        }
        Ok(())
    }

    /// Exports `crl.pem` listing exactly the revoked ledger records.
    pub(crate) fn write_crl(
        &self,
        key_pem: &str,
        certificate_pem: &str,
        crl_number: u64,
        toolkit: &dyn Toolkit,
    ) -> Result<()> {
        let now = Utc::now();
        let revoked: Vec<_> = match self.ledger {
            Some(ref ledger) => ledger
                .revoked()
                .map(|r| (r.serial, r.revoked_at.unwrap_or(now)))
                .collect(),
            None => Vec::new(),
        };
        let entries = revoked.len();

        let crl = toolkit.export_crl(&CrlRequest {
            issuer_key_pem: key_pem,
            issuer_cert_pem: certificate_pem,
            crl_number,
            this_update: now,
            next_update: now + Duration::days(self.config.crl_days as i64),
            revoked,
        })?;
        write_atomic(&self.root.join(CRL_FILE), crl)?;

        info!(crl_number, entries, path = %self.root.display(), "CRL written");
        Ok(())
    }

    /// A root has no parent and no chain file; an intermediate names a
    /// parent other than itself.
    fn check_lineage(&self) -> Result<()> {
        match self.config.parent {
            None if self.root.join(CHAIN_FILE).exists() => Err(Error::Integrity(format!(
                "{} has a chain file but no parent",
                self.root.display()
            ))),
            Some(ref parent) if same_path(parent, &self.root) => Err(Error::Integrity(format!(
                "{} names itself as parent",
                self.root.display()
            ))),
            _ => Ok(()),
        }
    }
}

/// Creates the ledger, or reuses one left empty by an interrupted attempt.
fn empty_ledger(path: &Path) -> Result<Ledger> {
    if !path.exists() {
        return Ledger::create(path);
    }
    let ledger = Ledger::load(path)?;
    if !ledger.is_empty() {
        return Err(Error::Integrity(format!(
            "{} already holds records",
            path.display()
        )));
    }
    Ok(ledger)
}

pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
