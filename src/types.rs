use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyAlgorithm {
    Ed25519,
    #[default]
    EcdsaP256,
    EcdsaP384,
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl KeyAlgorithm {
    pub fn to_rcgen(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Rsa2048 | KeyAlgorithm::Rsa3072 | KeyAlgorithm::Rsa4096 => {
                &rcgen::PKCS_RSA_SHA256
            }
        }
    }

    /// Modulus size for the RSA variants.
    pub fn rsa_bits(&self) -> Option<usize> {
        match self {
            KeyAlgorithm::Rsa2048 => Some(2048),
            KeyAlgorithm::Rsa3072 => Some(3072),
            KeyAlgorithm::Rsa4096 => Some(4096),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::EcdsaP256 => "ecdsa-p256",
            KeyAlgorithm::EcdsaP384 => "ecdsa-p384",
            KeyAlgorithm::Rsa2048 => "rsa2048",
            KeyAlgorithm::Rsa3072 => "rsa3072",
            KeyAlgorithm::Rsa4096 => "rsa4096",
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "ecdsa-p256" | "ecdsap256" | "p256" => Ok(KeyAlgorithm::EcdsaP256),
            "ecdsa-p384" | "ecdsap384" | "p384" => Ok(KeyAlgorithm::EcdsaP384),
            "rsa2048" | "rsa-2048" => Ok(KeyAlgorithm::Rsa2048),
            "rsa3072" | "rsa-3072" => Ok(KeyAlgorithm::Rsa3072),
            "rsa4096" | "rsa-4096" | "rsa" => Ok(KeyAlgorithm::Rsa4096),
            _ => Err(crate::Error::InvalidInput(format!(
                "unsupported key algorithm: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for KeyAlgorithm {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyAlgorithm> for String {
    fn from(value: KeyAlgorithm) -> Self {
        value.name().to_string()
    }
}

/// Which extension set a signature applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionProfile {
    /// End-entity certificate, `CA:false`.
    Leaf,
    /// Subordinate authority, `CA:true` with certificate and CRL signing.
    Authority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl DistinguishedName {
    pub fn new(cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_organizational_unit(mut self, ou: impl Into<String>) -> Self {
        self.organizational_unit = Some(ou.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = Some(locality.into());
        self
    }

    /// Attribute pairs in issuance order, short OpenSSL names.
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        let mut attrs = Vec::new();
        if let Some(ref country) = self.country {
            attrs.push(("C", country.as_str()));
        }
        if let Some(ref state) = self.state {
            attrs.push(("ST", state.as_str()));
        }
        if let Some(ref locality) = self.locality {
            attrs.push(("L", locality.as_str()));
        }
        if let Some(ref org) = self.organization {
            attrs.push(("O", org.as_str()));
        }
        if let Some(ref ou) = self.organizational_unit {
            attrs.push(("OU", ou.as_str()));
        }
        attrs.push(("CN", self.common_name.as_str()));
        attrs
    }

    pub fn to_rcgen(&self) -> rcgen::DistinguishedName {
        let mut dn = rcgen::DistinguishedName::new();

        if let Some(ref country) = self.country {
            dn.push(rcgen::DnType::CountryName, country);
        }
        if let Some(ref state) = self.state {
            dn.push(rcgen::DnType::StateOrProvinceName, state);
        }
        if let Some(ref locality) = self.locality {
            dn.push(rcgen::DnType::LocalityName, locality);
        }
        if let Some(ref org) = self.organization {
            dn.push(rcgen::DnType::OrganizationName, org);
        }
        if let Some(ref ou) = self.organizational_unit {
            dn.push(rcgen::DnType::OrganizationalUnitName, ou);
        }
        dn.push(rcgen::DnType::CommonName, &self.common_name);

        dn
    }

    /// Rejects attribute values that cannot be stored on one ledger line.
    pub fn validate(&self) -> crate::Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "subject has an empty common name".into(),
            ));
        }
        for (key, value) in self.attributes() {
            if value.chars().any(char::is_control) {
                return Err(crate::Error::InvalidInput(format!(
                    "subject attribute {} contains a control character",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Parses the `/C=US/O=Org/CN=name` form used in the ledger index.
    ///
    /// `\`, `/` and `=` inside values are backslash-escaped, as OpenSSL
    /// prints them.
    pub fn parse_slashed(s: &str) -> crate::Result<Self> {
        let mut dn = DistinguishedName::default();
        let mut has_cn = false;

        for (key, value) in split_slashed(s)? {
            match key.as_str() {
                "CN" => {
                    dn.common_name = value;
                    has_cn = true;
                }
                "O" => dn.organization = Some(value),
                "OU" => dn.organizational_unit = Some(value),
                "C" => dn.country = Some(value),
                "ST" => dn.state = Some(value),
                "L" => dn.locality = Some(value),
                _ => {}
            }
        }

        if !has_cn {
            return Err(crate::Error::Integrity(format!(
                "subject has no common name: {}",
                s
            )));
        }

        Ok(dn)
    }
}

fn split_slashed(s: &str) -> crate::Result<Vec<(String, String)>> {
    let mut components = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = s.chars();

    let mut finish = |key: &mut String, value: &mut String, in_value: bool| {
        if key.is_empty() && !in_value {
            return Ok(());
        }
        if !in_value {
            return Err(crate::Error::Integrity(format!(
                "malformed subject component: {}",
                key
            )));
        }
        components.push((std::mem::take(key), std::mem::take(value)));
        Ok(())
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| {
                    crate::Error::Integrity(format!("dangling escape in subject: {}", s))
                })?;
                if in_value {
                    value.push(escaped);
                } else {
                    key.push(escaped);
                }
            }
            '/' => {
                finish(&mut key, &mut value, in_value)?;
                in_value = false;
            }
            '=' if !in_value => in_value = true,
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    finish(&mut key, &mut value, in_value)?;

    Ok(components)
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, '\\' | '/' | '=') {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.attributes() {
            write!(f, "/{}=", key)?;
            write_escaped(f, value)?;
        }
        Ok(())
    }
}

/// One subject alternative name, tagged by whether it is a literal IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Ip(IpAddr),
    Dns(String),
}

impl AltName {
    pub fn parse(value: &str) -> Self {
        match value.parse::<IpAddr>() {
            Ok(ip) => AltName::Ip(ip),
            Err(_) => AltName::Dns(value.to_string()),
        }
    }

    /// Parses the tagged `IP:1.2.3.4` / `DNS:host` form.
    pub fn parse_tagged(value: &str) -> crate::Result<Self> {
        let value = value.trim();
        if let Some(ip) = value.strip_prefix("IP:") {
            let ip = ip.trim().parse::<IpAddr>().map_err(|e| {
                crate::Error::InvalidInput(format!("bad IP alt name {}: {}", ip, e))
            })?;
            Ok(AltName::Ip(ip))
        } else if let Some(dns) = value.strip_prefix("DNS:") {
            Ok(AltName::Dns(dns.trim().to_string()))
        } else {
            Err(crate::Error::InvalidInput(format!(
                "alt name must start with IP: or DNS: ({})",
                value
            )))
        }
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AltName::Ip(ip) => write!(f, "IP:{}", ip),
            AltName::Dns(name) => write!(f, "DNS:{}", name),
        }
    }
}

/// Certificate serial as allocated from the `serial` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub u64);

impl Serial {
    /// Big-endian bytes without leading zeros.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        bytes[first..].to_vec()
    }

    pub fn next(&self) -> crate::Result<Serial> {
        self.0
            .checked_add(1)
            .map(Serial)
            .ok_or_else(|| crate::Error::Integrity(format!("serial {} cannot be advanced", self)))
    }
}

impl fmt::Display for Serial {
    /// Uppercase hex with an even number of digits, as OpenSSL writes it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

impl std::str::FromStr for Serial {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        u64::from_str_radix(s, 16)
            .map(Serial)
            .map_err(|e| crate::Error::Integrity(format!("invalid serial {:?}: {}", s, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Valid,
    Expired,
    Revoked,
}

impl CertStatus {
    pub fn flag(&self) -> char {
        match self {
            CertStatus::Valid => 'V',
            CertStatus::Expired => 'E',
            CertStatus::Revoked => 'R',
        }
    }

    pub fn from_flag(flag: &str) -> crate::Result<Self> {
        match flag {
            "V" => Ok(CertStatus::Valid),
            "E" => Ok(CertStatus::Expired),
            "R" => Ok(CertStatus::Revoked),
            other => Err(crate::Error::Integrity(format!(
                "unknown ledger status {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CertStatus::Valid => "valid",
            CertStatus::Expired => "expired",
            CertStatus::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CertStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "valid" | "v" => Ok(CertStatus::Valid),
            "expired" | "e" => Ok(CertStatus::Expired),
            "revoked" | "r" => Ok(CertStatus::Revoked),
            _ => Err(crate::Error::InvalidInput(format!(
                "unknown certificate status: {}",
                s
            ))),
        }
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct CertificateRecord {
    #[cfg_attr(feature = "json", serde(serialize_with = "serialize_serial"))]
    pub serial: Serial,
    pub subject: DistinguishedName,
    pub not_after: DateTime<Utc>,
    pub status: CertStatus,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    pub fn common_name(&self) -> &str {
        &self.subject.common_name
    }
}

#[cfg(feature = "json")]
fn serialize_serial<S: serde::Serializer>(serial: &Serial, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&serial.to_string())
}

/// Revocation target, resolved once at the command boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host(String),
    IntermediateCa(PathBuf),
}

impl Target {
    /// `ca:<path>` names an intermediate authority; anything else is a host.
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("ca:") {
            Some(path) => Target::IntermediateCa(PathBuf::from(path)),
            None => Target::Host(value.to_string()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host(name) => f.write_str(name),
            Target::IntermediateCa(path) => write!(f, "ca:{}", path.display()),
        }
    }
}
