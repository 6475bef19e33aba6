//! Authority and host configuration.
//!
//! Each authority keeps a `ca.toml` next to its key material. Hosts get an
//! OpenSSL-style `.cnf` rendered from a template at onboarding time; only the
//! handful of keys issuance needs are read back from it.

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::types::{AltName, DistinguishedName, KeyAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CRL_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Required before the authority can be initialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_days: Option<u32>,
    #[serde(default = "default_crl_days")]
    pub crl_days: u32,
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
    /// Parent authority directory; absent for a root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PathBuf>,
    pub subject: DistinguishedName,
    #[serde(default)]
    pub policy: SubjectPolicy,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    #[serde(default)]
    pub key_protection: KeyProtection,
}

fn default_crl_days() -> u32 {
    DEFAULT_CRL_DAYS
}

impl AuthorityConfig {
    pub fn new(subject: DistinguishedName) -> Self {
        Self {
            validity_days: None,
            crl_days: DEFAULT_CRL_DAYS,
            key_algorithm: KeyAlgorithm::default(),
            parent: None,
            subject,
            policy: SubjectPolicy::default(),
            extensions: ExtensionsConfig::default(),
            key_protection: KeyProtection::default(),
        }
    }

    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    pub fn with_key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = algorithm;
        self
    }

    pub fn with_key_protection(mut self, protection: KeyProtection) -> Self {
        self.key_protection = protection;
        self
    }

    pub fn with_policy(mut self, policy: SubjectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn validity_days(&self) -> Result<u32> {
        match self.validity_days {
            Some(0) => Err(Error::Config("validity_days must be positive".into())),
            Some(days) => Ok(days),
            None => Err(Error::MissingConfig("validity_days".into())),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_atomic(path.as_ref(), toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyRule {
    /// Must equal the authority's own value.
    Match,
    /// Must be present.
    Supplied,
    #[default]
    Optional,
}

/// Per-attribute requirements on CSR subjects. The common name is always required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPolicy {
    #[serde(default)]
    pub country: PolicyRule,
    #[serde(default)]
    pub state: PolicyRule,
    #[serde(default)]
    pub locality: PolicyRule,
    #[serde(default)]
    pub organization: PolicyRule,
    #[serde(default)]
    pub organizational_unit: PolicyRule,
}

impl SubjectPolicy {
    pub fn check(&self, authority: &DistinguishedName, subject: &DistinguishedName) -> Result<()> {
        if subject.common_name.trim().is_empty() {
            return Err(Error::Policy("subject has no common name".into()));
        }

        let rules = [
            ("countryName", self.country, &authority.country, &subject.country),
            ("stateOrProvinceName", self.state, &authority.state, &subject.state),
            ("localityName", self.locality, &authority.locality, &subject.locality),
            (
                "organizationName",
                self.organization,
                &authority.organization,
                &subject.organization,
            ),
            (
                "organizationalUnitName",
                self.organizational_unit,
                &authority.organizational_unit,
                &subject.organizational_unit,
            ),
        ];

        for (name, rule, ours, theirs) in rules {
            match rule {
                PolicyRule::Optional => {}
                PolicyRule::Supplied if theirs.is_none() => {
                    return Err(Error::Policy(format!("{} must be supplied", name)));
                }
                PolicyRule::Supplied => {}
                PolicyRule::Match if theirs != ours => {
                    return Err(Error::Policy(format!(
                        "{} {:?} does not match the authority's {:?}",
                        name, theirs, ours
                    )));
                }
                PolicyRule::Match => {}
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    #[serde(default = "enabled")]
    pub server_auth: bool,
    #[serde(default = "enabled")]
    pub client_auth: bool,
    /// Path length constraint placed on authorities this one signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_len: Option<u8>,
}

fn enabled() -> bool {
    true
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            server_auth: true,
            client_auth: true,
            path_len: None,
        }
    }
}

/// Argon2id cost used when sealing the private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyProtection {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KeyProtection {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
        }
    }
}

/// Values read back from a rendered host `.cnf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub subject: DistinguishedName,
    pub alt_names: Vec<AltName>,
    pub default_days: Option<u32>,
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let values = parse_cnf(text);
        let lookup = |keys: &[&str]| keys.iter().find_map(|k| values.get(*k).cloned());

        let common_name = lookup(&["CN", "commonName"])
            .ok_or_else(|| Error::MissingConfig("CN".into()))?;

        let subject = DistinguishedName {
            common_name,
            organization: lookup(&["O", "organizationName"]),
            organizational_unit: lookup(&["OU", "organizationalUnitName"]),
            country: lookup(&["C", "countryName"]),
            state: lookup(&["ST", "stateOrProvinceName"]),
            locality: lookup(&["L", "localityName"]),
        };

        let alt_names = match values.get("subjectAltName") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(AltName::parse_tagged)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let default_days = match values.get("default_days") {
            Some(days) => Some(days.parse::<u32>().map_err(|e| {
                Error::Config(format!("default_days {:?}: {}", days, e))
            })?),
            None => None,
        };

        Ok(Self {
            subject,
            alt_names,
            default_days,
        })
    }

    pub fn validity_days(&self) -> Result<u32> {
        match self.default_days {
            Some(0) | None => Err(Error::MissingConfig("default_days".into())),
            Some(days) => Ok(days),
        }
    }
}

/// Flattens `key = value` lines across sections; the first occurrence wins.
fn parse_cnf(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for line in text.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();

        if line.is_empty() || line.starts_with('[') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            values
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    values
}
