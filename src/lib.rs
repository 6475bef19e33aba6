//! caledger - a small file-backed certificate authority
//!
//! This library keeps one or more certificate authorities on the local
//! filesystem, in a layout `openssl ca` can still read:
//!
//! - Creating root authorities and intermediates signed by them
//! - Onboarding hosts from an OpenSSL-style template
//! - Issuing and re-issuing host certificates into dated instance directories
//! - Revoking certificates and keeping the CRL in step with the ledger
//! - Provisioning many hosts at once from a host list
//!
//! # Examples
//!
//! ## Creating a Root CA
//!
//! ```no_run
//! use caledger::{AuthorityConfig, AuthorityStore, DistinguishedName, RcgenToolkit, StaticSecret};
//!
//! let config = AuthorityConfig::new(
//!     DistinguishedName::new("Example Root CA").with_organization("Example"),
//! )
//! .with_validity_days(3650);
//!
//! let store = AuthorityStore::initialize_root(
//!     "/srv/pki/root",
//!     config,
//!     &mut StaticSecret::new("correct horse"),
//!     &RcgenToolkit::new(),
//! )
//! .unwrap();
//! ```
//!
//! ## Issuing a Host Certificate
//!
//! ```no_run
//! use caledger::{AuthorityStore, CertificateIssuer, HostProfile, RcgenToolkit, StaticSecret};
//!
//! let mut store = AuthorityStore::open("/srv/pki/root").unwrap();
//! HostProfile::onboard(&store, "api.example.com", &["10.0.0.5".to_string()]).unwrap();
//!
//! let instance = CertificateIssuer::issue_for_host(
//!     &mut store,
//!     "api.example.com",
//!     &mut StaticSecret::new("correct horse"),
//!     &RcgenToolkit::new(),
//!     chrono::Local::now().date_naive(),
//! )
//! .unwrap();
//! println!("{}", instance.file("crt").display());
//! ```
//!
//! ## Revoking
//!
//! ```no_run
//! use caledger::{AuthorityStore, RcgenToolkit, RevocationManager, StaticSecret, Target};
//!
//! let mut store = AuthorityStore::open("/srv/pki/root").unwrap();
//! RevocationManager::revoke(
//!     &mut store,
//!     &Target::parse("api.example.com"),
//!     &mut StaticSecret::new("correct horse"),
//!     &RcgenToolkit::new(),
//! )
//! .unwrap();
//! ```

pub mod batch;
pub mod chain;
pub mod config;
pub mod error;
pub mod host;
pub mod intermediate;
pub mod issuer;
pub mod keyseal;
pub mod ledger;
pub mod revocation;
pub mod secret;
pub mod serial;
pub mod store;
pub mod toolkit;
pub mod types;

mod fsutil;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, ErrorKind, Result};

pub use batch::{BatchProcessor, BatchReport, HostSpec};
pub use chain::ChainBuilder;
pub use config::{AuthorityConfig, HostConfig, KeyProtection, PolicyRule, SubjectPolicy};
pub use host::HostProfile;
pub use intermediate::IntermediateCoordinator;
pub use issuer::{CertificateIssuer, IssuanceInstance, SignedCertificate};
pub use ledger::Ledger;
pub use revocation::RevocationManager;
pub use secret::{CachedSecret, FileSecret, PromptSecret, SecretSource, StaticSecret};
pub use serial::SerialAllocator;
pub use store::AuthorityStore;
pub use toolkit::{RcgenToolkit, Toolkit};
pub use types::{
    AltName, CertStatus, CertificateRecord, DistinguishedName, ExtensionProfile, KeyAlgorithm,
    Serial, Target,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn protected(config: AuthorityConfig) -> AuthorityConfig {
        config.with_key_protection(KeyProtection {
            memory_kib: 64,
            iterations: 1,
        })
    }

    #[test]
    fn test_create_root_ca() {
        let dir = tempfile::tempdir().unwrap();
        let subject = DistinguishedName::new("Test Root CA")
            .with_organization("Test Org")
            .with_country("US");
        let config = protected(AuthorityConfig::new(subject).with_validity_days(365));

        let store = AuthorityStore::initialize_root(
            dir.path(),
            config,
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        );
        assert!(store.is_ok());
    }

    #[test]
    fn test_create_ed25519_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = protected(
            AuthorityConfig::new(DistinguishedName::new("Edwards Root"))
                .with_validity_days(365)
                .with_key_algorithm(KeyAlgorithm::Ed25519),
        );

        let store = AuthorityStore::initialize_root(
            dir.path(),
            config,
            &mut StaticSecret::new("pass"),
            &RcgenToolkit::new().without_keystore(),
        );
        assert!(store.is_ok());
    }

    #[test]
    fn test_issue_and_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RcgenToolkit::new().without_keystore();
        let mut secret = StaticSecret::new("pass");
        let config = protected(
            AuthorityConfig::new(DistinguishedName::new("Test CA")).with_validity_days(365),
        );
        let mut store =
            AuthorityStore::initialize_root(dir.path(), config, &mut secret, &toolkit).unwrap();

        HostProfile::onboard(&store, "test.example.com", &[]).unwrap();
        let instance = CertificateIssuer::issue_for_host(
            &mut store,
            "test.example.com",
            &mut secret,
            &toolkit,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .unwrap();
        assert!(instance.generated_key);
        assert!(!instance.chained);

        let revoked = RevocationManager::revoke(
            &mut store,
            &Target::parse("test.example.com"),
            &mut secret,
            &toolkit,
        )
        .unwrap();
        assert_eq!(revoked.serial, instance.serial);
        assert_eq!(revoked.status, CertStatus::Revoked);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::NotFound("x".into()).kind(),
            ErrorKind::Resolution
        );
        assert_eq!(
            Error::SerialCollision("02".into()).kind(),
            ErrorKind::Integrity
        );
        let batch = Error::Batch {
            host: "db1".into(),
            source: Box::new(Error::MissingConfig("default_days".into())),
        };
        assert_eq!(batch.kind(), ErrorKind::Precondition);
    }
}
