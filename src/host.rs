//! Host onboarding.
//!
//! Onboarding creates `<store>/<hostname>/<hostname>.cnf` from a template.
//! The store's own `host.cnf.tmpl` wins over the built-in one. Two
//! placeholders are substituted: `{{hostname}}` and `{{subject_alt_names}}`.

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::fsutil::write_new;
use crate::store::{AuthorityStore, RESERVED_NAMES};
use crate::types::AltName;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_TEMPLATE: &str = "\
# Host certificate request for {{hostname}}
[ req ]
prompt             = no
default_days       = 365
distinguished_name = req_dn
req_extensions     = req_ext

[ req_dn ]
CN = {{hostname}}

[ req_ext ]
subjectAltName = {{subject_alt_names}}
";

#[derive(Debug, Clone)]
pub struct HostProfile {
    pub hostname: String,
    pub config: HostConfig,
    pub config_path: PathBuf,
}

impl HostProfile {
    pub fn onboard(store: &AuthorityStore, hostname: &str, alt_names: &[String]) -> Result<Self> {
        validate_hostname(hostname)?;

        let dir = store.host_dir(hostname);
        if dir.exists() {
            return Err(Error::HostExists(hostname.to_string()));
        }

        let sans = subject_alt_names(hostname, alt_names);
        let template = match store.host_template_path() {
            path if path.is_file() => {
                debug!(path = %path.display(), "using store host template");
                fs::read_to_string(path)?
            }
            _ => DEFAULT_TEMPLATE.to_string(),
        };
        let rendered = render(&template, hostname, &sans);
        let config = HostConfig::parse(&rendered)?;

        fs::create_dir(&dir)?;
        let config_path = dir.join(format!("{}.cnf", hostname));
        write_new(&config_path, &rendered)?;

        info!(host = hostname, alt_names = sans.len(), "host onboarded");
        Ok(Self {
            hostname: hostname.to_string(),
            config,
            config_path,
        })
    }

    pub fn load(store: &AuthorityStore, hostname: &str) -> Result<Self> {
        validate_hostname(hostname)?;
        let config_path = store
            .host_dir(hostname)
            .join(format!("{}.cnf", hostname));
        let config = HostConfig::load(&config_path)?;
        Ok(Self {
            hostname: hostname.to_string(),
            config,
            config_path,
        })
    }

    pub fn alt_names(&self) -> &[AltName] {
        &self.config.alt_names
    }
}

/// The given names in order, then the hostname, without repeats.
pub fn subject_alt_names(hostname: &str, alt_names: &[String]) -> Vec<AltName> {
    let mut names: Vec<AltName> = Vec::with_capacity(alt_names.len() + 1);
    for value in alt_names
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .chain(std::iter::once(hostname))
    {
        let name = AltName::parse(value);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn render(template: &str, hostname: &str, alt_names: &[AltName]) -> String {
    let sans = alt_names
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    template
        .replace("{{hostname}}", hostname)
        .replace("{{subject_alt_names}}", &sans)
}

fn validate_hostname(hostname: &str) -> Result<()> {
    let valid_chars = hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));

    if hostname.is_empty() || !valid_chars || hostname.starts_with('.') {
        return Err(Error::InvalidInput(format!("invalid hostname {:?}", hostname)));
    }
    if RESERVED_NAMES.contains(&hostname) {
        return Err(Error::InvalidInput(format!(
            "{} is reserved for the authority's own files",
            hostname
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorityConfig;
    use crate::types::DistinguishedName;

    fn store(dir: &std::path::Path) -> AuthorityStore {
        let config =
            AuthorityConfig::new(DistinguishedName::new("Root")).with_validity_days(30);
        AuthorityStore::create_layout(dir, config).unwrap()
    }

    #[test]
    fn test_alt_names_order_and_tagging() {
        let names = subject_alt_names(
            "api.example.com",
            &["10.0.0.5".into(), "api.example.com".into(), "www".into()],
        );
        let rendered: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["IP:10.0.0.5", "DNS:api.example.com", "DNS:www"]
        );
    }

    #[test]
    fn test_onboard_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let profile =
            HostProfile::onboard(&store, "api.example.com", &["10.0.0.5".into()]).unwrap();
        let text = fs::read_to_string(&profile.config_path).unwrap();
        assert!(text.contains("subjectAltName = IP:10.0.0.5, DNS:api.example.com"));
        assert_eq!(profile.config.subject.common_name, "api.example.com");
        assert_eq!(profile.config.validity_days().unwrap(), 365);

        let loaded = HostProfile::load(&store, "api.example.com").unwrap();
        assert_eq!(loaded.alt_names(), profile.alt_names());
    }

    #[test]
    fn test_onboard_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        HostProfile::onboard(&store, "db1", &[]).unwrap();
        assert!(matches!(
            HostProfile::onboard(&store, "db1", &[]),
            Err(Error::HostExists(_))
        ));
    }

    #[test]
    fn test_store_template_override() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(
            store.host_template_path(),
            "default_days = 90\nCN = {{hostname}}\nO = Example\nsubjectAltName = {{subject_alt_names}}\n",
        )
        .unwrap();

        let profile = HostProfile::onboard(&store, "db1", &[]).unwrap();
        assert_eq!(profile.config.default_days, Some(90));
        assert_eq!(profile.config.subject.organization.as_deref(), Some("Example"));
    }

    #[test]
    fn test_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for name in ["", "../etc", "a/b", "newcerts", "private", ".hidden"] {
            assert!(
                matches!(
                    HostProfile::onboard(&store, name, &[]),
                    Err(Error::InvalidInput(_))
                ),
                "{name:?} accepted"
            );
        }
    }
}
