use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No certificate authority configured at {}", .0.display())]
    NotConfigured(PathBuf),

    #[error("Certificate authority at {} is already initialized", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("Certificate authority at {} is not initialized", .0.display())]
    NotInitialized(PathBuf),

    #[error("Missing configuration value: {0}")]
    MissingConfig(String),

    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Host already onboarded: {0}")]
    HostExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subject policy violation: {0}")]
    Policy(String),

    #[error("Key generation error: {0}")]
    KeyGen(String),

    #[error("Certificate generation error: {0}")]
    CertGen(String),

    #[error("CRL generation error: {0}")]
    Crl(String),

    #[error("PKCS12 export error: {0}")]
    Pkcs12(String),

    #[error("Keystore conversion error: {0}")]
    Keystore(String),

    #[error("Key protection error: {0}")]
    KeySeal(String),

    #[error("Passphrase unavailable: {0}")]
    Passphrase(String),

    #[error("PEM parsing error: {0}")]
    Pem(String),

    #[error("X509 parsing error: {0}")]
    X509Parse(String),

    #[error("Serial {0} already present in ledger")]
    SerialCollision(String),

    #[error("Corrupt store data: {0}")]
    Integrity(String),

    #[error("No valid certificate found for {0}")]
    NotFound(String),

    #[error("Certificate {serial} is {status}, only valid certificates can be revoked")]
    NotRevocable { serial: String, status: String },

    #[error("Batch aborted at {host}: {source}")]
    Batch {
        host: String,
        #[source]
        source: Box<Error>,
    },
}

/// Broad classes of failure, used by callers that decide how loudly to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any external call; nothing was written.
    Precondition,
    /// The cryptographic toolkit failed part way through an operation.
    Toolkit,
    /// Store contents contradict themselves.
    Integrity,
    /// The requested identity does not resolve to a ledger entry.
    Resolution,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotConfigured(_)
            | Error::AlreadyInitialized(_)
            | Error::NotInitialized(_)
            | Error::MissingConfig(_)
            | Error::MissingFile(_)
            | Error::HostExists(_)
            | Error::InvalidInput(_)
            | Error::Config(_)
            | Error::Policy(_)
            | Error::Passphrase(_)
            | Error::NotRevocable { .. } => ErrorKind::Precondition,
            Error::Io(_)
            | Error::KeyGen(_)
            | Error::CertGen(_)
            | Error::Crl(_)
            | Error::Pkcs12(_)
            | Error::Keystore(_)
            | Error::KeySeal(_)
            | Error::Pem(_)
            | Error::X509Parse(_) => ErrorKind::Toolkit,
            Error::SerialCollision(_) | Error::Integrity(_) => ErrorKind::Integrity,
            Error::NotFound(_) => ErrorKind::Resolution,
            Error::Batch { source, .. } => source.kind(),
        }
    }
}

impl From<rcgen::Error> for Error {
    fn from(err: rcgen::Error) -> Self {
        Error::CertGen(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::X509Parse(err.to_string())
    }
}

impl From<x509_parser::error::X509Error> for Error {
    fn from(err: x509_parser::error::X509Error) -> Self {
        Error::X509Parse(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::PEMError>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::PEMError>) -> Self {
        Error::Pem(err.to_string())
    }
}

impl From<pem::PemError> for Error {
    fn from(err: pem::PemError) -> Self {
        Error::Pem(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
