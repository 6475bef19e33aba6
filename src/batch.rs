use crate::error::{Error, Result};
use crate::host::HostProfile;
use crate::issuer::{CertificateIssuer, IssuanceInstance};
use crate::secret::SecretSource;
use crate::store::AuthorityStore;
use crate::toolkit::Toolkit;
use chrono::NaiveDate;
use tracing::info;

/// One line of a host list: `hostname [alt ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub hostname: String,
    pub alt_names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub provisioned: Vec<IssuanceInstance>,
    pub skipped: Vec<String>,
}

/// Onboards and issues for many hosts in order, stopping at the first failure.
pub struct BatchProcessor;

impl BatchProcessor {
    pub fn parse_host_list(text: &str) -> Vec<HostSpec> {
        text.lines()
            .map(|line| match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            })
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let hostname = fields.next()?.to_string();
                Some(HostSpec {
                    hostname,
                    alt_names: fields.map(str::to_string).collect(),
                })
            })
            .collect()
    }

    /// Hosts whose directory already exists are skipped, so a failed run
    /// can be repeated once the cause is fixed.
    pub fn run(
        store: &mut AuthorityStore,
        hosts: &[HostSpec],
        secret: &mut dyn SecretSource,
        toolkit: &dyn Toolkit,
        issued_on: NaiveDate,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for host in hosts {
            if store.host_dir(&host.hostname).exists() {
                info!(host = %host.hostname, "already provisioned, skipping");
                report.skipped.push(host.hostname.clone());
                continue;
            }

            let provisioned = match HostProfile::onboard(store, &host.hostname, &host.alt_names) {
                Ok(_) => CertificateIssuer::issue_for_host(
                    store,
                    &host.hostname,
                    secret,
                    toolkit,
                    issued_on,
                ),
                Err(e) => Err(e),
            };
            let instance = provisioned.map_err(|e| Error::Batch {
                host: host.hostname.clone(),
                source: Box::new(e),
            })?;
            report.provisioned.push(instance);
        }

        info!(
            provisioned = report.provisioned.len(),
            skipped = report.skipped.len(),
            "batch finished"
        );
        Ok(report)
    }
}
