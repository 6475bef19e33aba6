//! The cryptographic collaborator.
//!
//! Everything that touches ASN.1 goes through [`Toolkit`]: key generation,
//! CSRs, signatures, CRLs and PKCS#12 bundles. The store and issuer only move
//! PEM text around and keep the books. [`RcgenToolkit`] is the stock
//! implementation; Java keystores are produced by shelling out to `keytool`
//! when it is installed.

use crate::chain::ChainBuilder;
use crate::config::ExtensionsConfig;
use crate::error::{Error, Result};
use crate::types::{AltName, DistinguishedName, ExtensionProfile, KeyAlgorithm, Serial};
use chrono::{DateTime, Utc};
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams,
    CertificateSigningRequestParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SanType, SerialNumber,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// Input to a CA signature over a CSR.
pub struct SigningRequest<'a> {
    pub csr_pem: &'a str,
    pub issuer_key_pem: &'a str,
    pub issuer_cert_pem: &'a str,
    pub serial: Serial,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub profile: ExtensionProfile,
    pub extensions: &'a ExtensionsConfig,
}

/// Input to a CRL export.
pub struct CrlRequest<'a> {
    pub issuer_key_pem: &'a str,
    pub issuer_cert_pem: &'a str,
    pub crl_number: u64,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    /// Serial and revocation time of every revoked certificate.
    pub revoked: Vec<(Serial, DateTime<Utc>)>,
}

pub trait Toolkit {
    /// A fresh private key as PKCS#8 PEM.
    fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Zeroizing<String>>;

    fn build_csr(
        &self,
        key_pem: &str,
        subject: &DistinguishedName,
        alt_names: &[AltName],
    ) -> Result<String>;

    /// Subject of a PEM CSR.
    fn inspect_csr(&self, csr_pem: &str) -> Result<DistinguishedName>;

    fn self_sign(
        &self,
        key_pem: &str,
        subject: &DistinguishedName,
        serial: Serial,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<String>;

    fn sign(&self, request: &SigningRequest<'_>) -> Result<String>;

    fn export_crl(&self, request: &CrlRequest<'_>) -> Result<String>;

    fn pkcs12(
        &self,
        key_pem: &str,
        cert_pem: &str,
        chain_pem: Option<&str>,
        passphrase: &str,
        name: &str,
    ) -> Result<Vec<u8>>;

    /// Converts a PKCS#12 file into a keystore. `Ok(false)` means no converter
    /// is available, which callers treat as a skipped artifact.
    fn keystore(
        &self,
        pkcs12_path: &Path,
        keystore_path: &Path,
        passphrase: &str,
        alias: &str,
    ) -> Result<bool>;
}

pub struct RcgenToolkit {
    keystore_tool: Option<PathBuf>,
}

impl RcgenToolkit {
    pub fn new() -> Self {
        Self {
            keystore_tool: Some(PathBuf::from("keytool")),
        }
    }

    pub fn with_keystore_tool(mut self, tool: Option<PathBuf>) -> Self {
        self.keystore_tool = tool;
        self
    }

    pub fn without_keystore(self) -> Self {
        self.with_keystore_tool(None)
    }
}

impl Default for RcgenToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit for RcgenToolkit {
    fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Zeroizing<String>> {
        let generated = match algorithm.rsa_bits() {
            Some(bits) => generate_rsa(bits),
            None => KeyPair::generate_for(algorithm.to_rcgen())
                .map(|key_pair| Zeroizing::new(key_pair.serialize_pem()))
                .map_err(|e| e.to_string()),
        };
        generated.map_err(|e| Error::KeyGen(format!("{}: {}", algorithm.name(), e)))
    }

    fn build_csr(
        &self,
        key_pem: &str,
        subject: &DistinguishedName,
        alt_names: &[AltName],
    ) -> Result<String> {
        let key_pair = KeyPair::from_pem(key_pem)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_rcgen();
        params.subject_alt_names = alt_names
            .iter()
            .map(|name| match name {
                AltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
                AltName::Dns(dns) => Ok(SanType::DnsName(Ia5String::try_from(dns.clone())?)),
            })
            .collect::<Result<Vec<_>>>()?;

        let csr = params.serialize_request(&key_pair)?;
        Ok(csr.pem()?)
    }

    fn inspect_csr(&self, csr_pem: &str) -> Result<DistinguishedName> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes())?;
        if pem.label != "CERTIFICATE REQUEST" {
            return Err(Error::Pem(format!(
                "expected CERTIFICATE REQUEST, found {}",
                pem.label
            )));
        }
        let (_, csr) = X509CertificationRequest::from_der(&pem.contents)?;
        subject_of(&csr.certification_request_info.subject)
    }

    fn self_sign(
        &self,
        key_pem: &str,
        subject: &DistinguishedName,
        serial: Serial,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<String> {
        let key_pair = KeyPair::from_pem(key_pem)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_rcgen();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_bytes()));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;

        let certificate = params.self_signed(&key_pair)?;
        Ok(certificate.pem())
    }

    fn sign(&self, request: &SigningRequest<'_>) -> Result<String> {
        let issuer_key = KeyPair::from_pem(request.issuer_key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(request.issuer_cert_pem, issuer_key)?;

        let mut csr = CertificateSigningRequestParams::from_pem(request.csr_pem)
            .map_err(|e| Error::CertGen(format!("unreadable CSR: {}", e)))?;

        csr.params.serial_number = Some(SerialNumber::from_slice(&request.serial.to_bytes()));
        csr.params.not_before = to_offset(request.not_before)?;
        csr.params.not_after = to_offset(request.not_after)?;
        csr.params.use_authority_key_identifier_extension = true;

        match request.profile {
            ExtensionProfile::Leaf => {
                csr.params.is_ca = IsCa::NoCa;
                csr.params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyEncipherment,
                ];
                let mut eku = Vec::new();
                if request.extensions.server_auth {
                    eku.push(ExtendedKeyUsagePurpose::ServerAuth);
                }
                if request.extensions.client_auth {
                    eku.push(ExtendedKeyUsagePurpose::ClientAuth);
                }
                csr.params.extended_key_usages = eku;
            }
            ExtensionProfile::Authority => {
                csr.params.is_ca = IsCa::Ca(match request.extensions.path_len {
                    Some(len) => BasicConstraints::Constrained(len),
                    None => BasicConstraints::Unconstrained,
                });
                csr.params.key_usages = vec![
                    KeyUsagePurpose::DigitalSignature,
                    KeyUsagePurpose::KeyCertSign,
                    KeyUsagePurpose::CrlSign,
                ];
                csr.params.extended_key_usages = Vec::new();
            }
        }

        let certificate = csr.signed_by(&issuer)?;
        Ok(certificate.pem())
    }

    fn export_crl(&self, request: &CrlRequest<'_>) -> Result<String> {
        let issuer_key = KeyPair::from_pem(request.issuer_key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(request.issuer_cert_pem, issuer_key)?;

        let mut revoked_certs = Vec::with_capacity(request.revoked.len());
        for (serial, revoked_at) in &request.revoked {
            revoked_certs.push(RevokedCertParams {
                serial_number: SerialNumber::from_slice(&serial.to_bytes()),
                revocation_time: to_offset(*revoked_at)?,
                reason_code: None,
                invalidity_date: None,
            });
        }

        let params = CertificateRevocationListParams {
            this_update: to_offset(request.this_update)?,
            next_update: to_offset(request.next_update)?,
            crl_number: SerialNumber::from_slice(&Serial(request.crl_number).to_bytes()),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        let crl = params
            .signed_by(&issuer)
            .map_err(|e| Error::Crl(e.to_string()))?;
        Ok(::pem::encode(&::pem::Pem::new("X509 CRL", crl.der().to_vec())))
    }

    fn pkcs12(
        &self,
        key_pem: &str,
        cert_pem: &str,
        chain_pem: Option<&str>,
        passphrase: &str,
        name: &str,
    ) -> Result<Vec<u8>> {
        let cert_der = pem_to_der(cert_pem, "CERTIFICATE")?;
        let key_der = Zeroizing::new(pem_to_der(key_pem, "PRIVATE KEY")?);

        let chain_der = match chain_pem {
            Some(chain) => ChainBuilder::certificates(chain)?,
            None => Vec::new(),
        };
        let cas: Vec<&[u8]> = chain_der.iter().map(|c| c.as_slice()).collect();

        let pfx = p12::PFX::new_with_cas(&cert_der, &key_der, &cas, passphrase, name)
            .ok_or_else(|| Error::Pkcs12(format!("could not build bundle for {}", name)))?;

        Ok(pfx.to_der())
    }

    fn keystore(
        &self,
        pkcs12_path: &Path,
        keystore_path: &Path,
        passphrase: &str,
        alias: &str,
    ) -> Result<bool> {
        let Some(tool) = &self.keystore_tool else {
            return Ok(false);
        };

        let output = Command::new(tool)
            .arg("-importkeystore")
            .arg("-noprompt")
            .arg("-srckeystore")
            .arg(pkcs12_path)
            .args(["-srcstoretype", "PKCS12", "-srcstorepass:env", "CALEDGER_STOREPASS"])
            .args(["-srcalias", alias, "-destalias", alias])
            .arg("-destkeystore")
            .arg(keystore_path)
            .args(["-deststoretype", "JKS", "-deststorepass:env", "CALEDGER_STOREPASS"])
            .env("CALEDGER_STOREPASS", passphrase)
            .output();

        match output {
            Ok(output) if output.status.success() => {
                debug!(path = %keystore_path.display(), "keystore written");
                Ok(true)
            }
            Ok(output) => Err(Error::Keystore(format!(
                "{} exited with {}: {}",
                tool.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(tool = %tool.display(), "keystore tool not found, skipping keystore");
                Ok(false)
            }
            Err(e) => Err(Error::Keystore(format!("{}: {}", tool.display(), e))),
        }
    }
}

/// rcgen signs with RSA keys but cannot generate them.
fn generate_rsa(bits: usize) -> std::result::Result<Zeroizing<String>, String> {
    let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| e.to_string())?;
    let pem = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| e.to_string())?;
    KeyPair::from_pem(&pem).map_err(|e| e.to_string())?;
    Ok(pem)
}

fn to_offset(at: DateTime<Utc>) -> Result<::time::OffsetDateTime> {
    ::time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::CertGen(format!("Invalid timestamp: {}", e)))
}

fn pem_to_der(text: &str, tag: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(text)?;
    if block.tag() != tag {
        return Err(Error::Pem(format!(
            "expected {}, found {}",
            tag,
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

fn subject_of(name: &X509Name<'_>) -> Result<DistinguishedName> {
    fn first<'a, 'b: 'a>(
        mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
    ) -> Result<Option<String>> {
        match attrs.next() {
            Some(attr) => Ok(Some(attr.as_str()?.to_string())),
            None => Ok(None),
        }
    }

    let common_name = first(name.iter_common_name())?
        .ok_or_else(|| Error::Policy("subject has no common name".into()))?;

    Ok(DistinguishedName {
        common_name,
        organization: first(name.iter_organization())?,
        organizational_unit: first(name.iter_organizational_unit())?,
        country: first(name.iter_country())?,
        state: first(name.iter_state_or_province())?,
        locality: first(name.iter_locality())?,
    })
}
