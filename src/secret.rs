//! Where authority passphrases come from.
//!
//! Operations that touch a private key take a `&mut dyn SecretSource`. The
//! command layer builds one per invocation, usually a [`CachedSecret`] around
//! a [`FileSecret`] that falls back to [`PromptSecret`], so the operator is
//! asked at most once.

use crate::error::{Error, Result};
use crate::fsutil::write_private;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use zeroize::Zeroizing;

pub const GENERATED_PASSPHRASE_LEN: usize = 32;

pub trait SecretSource {
    fn passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// A passphrase held in memory.
pub struct StaticSecret(Zeroizing<String>);

impl StaticSecret {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }
}

impl SecretSource for StaticSecret {
    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        Ok(self.0.clone())
    }
}

/// Asks on the terminal.
pub struct PromptSecret {
    prompt: String,
}

impl PromptSecret {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for PromptSecret {
    fn default() -> Self {
        Self::new("CA passphrase: ")
    }
}

impl SecretSource for PromptSecret {
    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        rpassword::prompt_password(&self.prompt)
            .map(Zeroizing::new)
            .map_err(|e| Error::Passphrase(e.to_string()))
    }
}

/// Reads the passphrase from a file, asking `fallback` when the file is absent.
///
/// An empty answer from the fallback generates a random passphrase and
/// persists it to the file with owner-only permissions.
pub struct FileSecret<S> {
    path: PathBuf,
    fallback: S,
}

impl<S: SecretSource> FileSecret<S> {
    pub fn new(path: impl Into<PathBuf>, fallback: S) -> Self {
        Self {
            path: path.into(),
            fallback,
        }
    }
}

impl<S: SecretSource> SecretSource for FileSecret<S> {
    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        if self.path.exists() {
            let text = Zeroizing::new(fs::read_to_string(&self.path)?);
            let line = text.lines().next().unwrap_or("").to_string();
            if line.is_empty() {
                return Err(Error::Passphrase(format!(
                    "{} is empty",
                    self.path.display()
                )));
            }
            return Ok(Zeroizing::new(line));
        }

        let answer = self.fallback.passphrase()?;
        if !answer.is_empty() {
            return Ok(answer);
        }

        let generated = generate_passphrase(GENERATED_PASSPHRASE_LEN);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_private(&self.path, format!("{}\n", generated.as_str()))?;
        info!(path = %self.path.display(), "generated passphrase");
        Ok(generated)
    }
}

/// Remembers the first passphrase for the rest of the invocation.
pub struct CachedSecret<S> {
    inner: S,
    cached: Option<Zeroizing<String>>,
}

impl<S: SecretSource> CachedSecret<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cached: None,
        }
    }
}

impl<S: SecretSource> SecretSource for CachedSecret<S> {
    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        if let Some(ref cached) = self.cached {
            return Ok(cached.clone());
        }
        let value = self.inner.passphrase()?;
        if value.is_empty() {
            return Err(Error::Passphrase("empty passphrase".into()));
        }
        self.cached = Some(value.clone());
        Ok(value)
    }
}

pub fn generate_passphrase(len: usize) -> Zeroizing<String> {
    Zeroizing::new(
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect(),
    )
}
