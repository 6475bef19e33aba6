//! The authority's record of every serial it has signed.
//!
//! Stored as `index.txt` in the tab-separated layout `openssl ca` uses:
//!
//! ```text
//! V	260405120000Z		02	unknown	/CN=api.example.com
//! R	260405120000Z	240301093000Z	03	unknown	/CN=old.example.com
//! ```
//!
//! Records are only ever appended or have their status changed.

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::types::{CertStatus, CertificateRecord, DistinguishedName, Serial};
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LEDGER_FILE: &str = "index.txt";

pub struct Ledger {
    path: PathBuf,
    records: BTreeMap<Serial, CertificateRecord>,
}

impl Ledger {
    /// Creates an empty ledger file, refusing to replace an existing one.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::Integrity(format!(
                "{} already exists",
                path.display()
            )));
        }
        let ledger = Self {
            path,
            records: BTreeMap::new(),
        };
        ledger.save()?;
        Ok(ledger)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::MissingFile(path));
        }
        let text = fs::read_to_string(&path)?;

        let mut records = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_line(line).map_err(|e| {
                Error::Integrity(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            if records.insert(record.serial, record.clone()).is_some() {
                return Err(Error::SerialCollision(record.serial.to_string()));
            }
        }

        Ok(Self { path, records })
    }

    pub fn save(&self) -> Result<()> {
        let mut out = String::new();
        for record in self.records.values() {
            out.push_str(&format_line(record));
            out.push('\n');
        }
        write_atomic(&self.path, out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &mut self,
        serial: Serial,
        subject: DistinguishedName,
        not_after: DateTime<Utc>,
    ) -> Result<CertificateRecord> {
        if self.records.contains_key(&serial) {
            return Err(Error::SerialCollision(serial.to_string()));
        }
        subject.validate()?;

        let record = CertificateRecord {
            serial,
            subject,
            not_after,
            status: CertStatus::Valid,
            revoked_at: None,
        };
        self.records.insert(serial, record.clone());
        Ok(record)
    }

    /// The most recently issued valid record for `cn`.
    pub fn find_valid_by_common_name(&self, cn: &str) -> Result<CertificateRecord> {
        let mut matches = self
            .records
            .values()
            .rev()
            .filter(|r| r.status == CertStatus::Valid && r.common_name() == cn);

        let chosen = matches
            .next()
            .cloned()
            .ok_or_else(|| Error::NotFound(cn.to_string()))?;

        let shadowed: Vec<String> = matches.map(|r| r.serial.to_string()).collect();
        if !shadowed.is_empty() {
            warn!(
                common_name = cn,
                selected = %chosen.serial,
                others = ?shadowed,
                "several valid certificates share a common name"
            );
        }

        Ok(chosen)
    }

    pub fn mark_revoked(&mut self, serial: Serial) -> Result<CertificateRecord> {
        self.mark_revoked_at(serial, Utc::now())
    }

    pub fn mark_revoked_at(&mut self, serial: Serial, at: DateTime<Utc>) -> Result<CertificateRecord> {
        let record = self
            .records
            .get_mut(&serial)
            .ok_or_else(|| Error::NotFound(format!("serial {}", serial)))?;

        if record.status != CertStatus::Valid {
            return Err(Error::NotRevocable {
                serial: serial.to_string(),
                status: record.status.to_string(),
            });
        }
        // Past its not-after the record is expired, whether or not
        // refresh_expiry has caught up with it yet.
        if record.not_after <= at {
            return Err(Error::NotRevocable {
                serial: serial.to_string(),
                status: CertStatus::Expired.to_string(),
            });
        }

        record.status = CertStatus::Revoked;
        record.revoked_at = Some(at);
        Ok(record.clone())
    }

    /// Moves valid records past their not-after date to expired.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>) -> usize {
        let mut transitions = 0;
        for record in self.records.values_mut() {
            if record.status == CertStatus::Valid && record.not_after <= now {
                record.status = CertStatus::Expired;
                transitions += 1;
            }
        }
        transitions
    }

    pub fn list_by_status(&self, status: CertStatus) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.common_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn revoked(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.records
            .values()
            .filter(|r| r.status == CertStatus::Revoked)
    }

    pub fn records(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.records.values()
    }

    pub fn get(&self, serial: Serial) -> Option<&CertificateRecord> {
        self.records.get(&serial)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn format_line(record: &CertificateRecord) -> String {
    let revoked = record.revoked_at.map(format_time).unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{}\tunknown\t{}",
        record.status.flag(),
        format_time(record.not_after),
        revoked,
        record.serial,
        record.subject
    )
}

fn parse_line(line: &str) -> Result<CertificateRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 6 {
        return Err(Error::Integrity(format!(
            "expected 6 tab-separated fields, found {}",
            fields.len()
        )));
    }

    let status = CertStatus::from_flag(fields[0])?;
    let not_after = parse_time(fields[1])?;
    let revoked_at = match fields[2] {
        "" => None,
        // OpenSSL appends ",reason" to the revocation time.
        field => Some(parse_time(field.split(',').next().unwrap_or(field))?),
    };
    let serial = fields[3].parse::<Serial>()?;
    let subject = DistinguishedName::parse_slashed(fields[5])?;

    if status == CertStatus::Revoked && revoked_at.is_none() {
        return Err(Error::Integrity(format!(
            "revoked serial {} has no revocation time",
            serial
        )));
    }

    Ok(CertificateRecord {
        serial,
        subject,
        not_after,
        status,
        revoked_at,
    })
}

/// UTCTime before 2050, GeneralizedTime after, as RFC 5280 requires.
fn format_time(t: DateTime<Utc>) -> String {
    if t.year() < 2050 {
        t.format("%y%m%d%H%M%SZ").to_string()
    } else {
        t.format("%Y%m%d%H%M%SZ").to_string()
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    let full = match s.len() {
        13 => {
            let yy: u32 = s
                .get(..2)
                .and_then(|yy| yy.parse().ok())
                .ok_or_else(|| Error::Integrity(format!("bad timestamp {:?}", s)))?;
            let century = if yy < 50 { "20" } else { "19" };
            format!("{}{}", century, s)
        }
        15 => s.to_string(),
        _ => return Err(Error::Integrity(format!("bad timestamp {:?}", s))),
    };

    NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%SZ")
        .map(|t| t.and_utc())
        .map_err(|e| Error::Integrity(format!("bad timestamp {:?}: {}", s, e)))
}
