//! Serial and CRL number counters.
//!
//! Both live as OpenSSL-compatible hex text files in the authority directory
//! (`serial`, `crlnumber`) and always hold the *next* value to hand out.
//! Every advance is persisted before the value is returned.

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::types::Serial;
use std::fs;
use std::path::{Path, PathBuf};

pub const SERIAL_FILE: &str = "serial";
pub const CRL_NUMBER_FILE: &str = "crlnumber";

pub struct SerialAllocator {
    serial_path: PathBuf,
    crl_number_path: PathBuf,
}

impl SerialAllocator {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            serial_path: dir.join(SERIAL_FILE),
            crl_number_path: dir.join(CRL_NUMBER_FILE),
        }
    }

    /// Starts both counters at 1.
    pub fn initialize(dir: impl AsRef<Path>) -> Result<Self> {
        let allocator = Self::open(dir);
        write_counter(&allocator.serial_path, 1)?;
        write_counter(&allocator.crl_number_path, 1)?;
        Ok(allocator)
    }

    pub fn peek_serial(&self) -> Result<Serial> {
        read_counter(&self.serial_path).map(Serial)
    }

    pub fn next_serial(&self) -> Result<Serial> {
        let current = self.peek_serial()?;
        write_counter(&self.serial_path, current.next()?.0)?;
        Ok(current)
    }

    pub fn peek_crl_number(&self) -> Result<u64> {
        read_counter(&self.crl_number_path)
    }

    pub fn next_crl_number(&self) -> Result<u64> {
        let current = self.peek_crl_number()?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Integrity(format!("CRL number {} cannot be advanced", current)))?;
        write_counter(&self.crl_number_path, next)?;
        Ok(current)
    }
}

fn read_counter(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse::<Serial>()
        .map(|s| s.0)
        .map_err(|_| Error::Integrity(format!("{}: not a hex counter", path.display())))
}

fn write_counter(path: &Path, value: u64) -> Result<()> {
    write_atomic(path, format!("{}\n", Serial(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_monotonic_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = SerialAllocator::initialize(dir.path()).unwrap();

        assert_eq!(allocator.next_serial().unwrap(), Serial(1));
        assert_eq!(allocator.next_serial().unwrap(), Serial(2));
        assert_eq!(
            fs::read_to_string(dir.path().join(SERIAL_FILE)).unwrap(),
            "03\n"
        );

        let reopened = SerialAllocator::open(dir.path());
        assert_eq!(reopened.peek_serial().unwrap(), Serial(3));
        assert_eq!(reopened.next_serial().unwrap(), Serial(3));
    }

    #[test]
    fn test_crl_numbers_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = SerialAllocator::initialize(dir.path()).unwrap();

        allocator.next_serial().unwrap();
        allocator.next_serial().unwrap();
        assert_eq!(allocator.peek_crl_number().unwrap(), 1);
        assert_eq!(allocator.next_crl_number().unwrap(), 1);
        assert_eq!(allocator.next_crl_number().unwrap(), 2);
        assert_eq!(allocator.peek_serial().unwrap(), Serial(3));
    }

    #[test]
    fn test_openssl_style_counter_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERIAL_FILE), "1000\n").unwrap();
        let allocator = SerialAllocator::open(dir.path());
        assert_eq!(allocator.next_serial().unwrap(), Serial(0x1000));
        assert_eq!(allocator.peek_serial().unwrap().to_string(), "1001");
    }

    #[test]
    fn test_missing_and_corrupt_counters() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = SerialAllocator::open(dir.path());
        assert!(matches!(
            allocator.next_serial(),
            Err(Error::MissingFile(_))
        ));

        fs::write(dir.path().join(CRL_NUMBER_FILE), "zz\n").unwrap();
        assert!(matches!(
            allocator.next_crl_number(),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_exhausted_counter_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERIAL_FILE), "FFFFFFFFFFFFFFFF\n").unwrap();
        let allocator = SerialAllocator::open(dir.path());
        assert!(matches!(allocator.next_serial(), Err(Error::Integrity(_))));
        assert_eq!(allocator.peek_serial().unwrap(), Serial(u64::MAX));
    }
}
