use crate::error::{Error, Result};

pub const CHAIN_FILE: &str = "chain.pem";

/// Builds intermediate trust chains: nearest certificate first, root never included.
pub struct ChainBuilder;

impl ChainBuilder {
    pub fn build(own_certificate: &str, parent_chain: Option<&str>) -> Result<String> {
        if !own_certificate.contains("-----BEGIN CERTIFICATE-----") {
            return Err(Error::Pem(
                "chain member is not a PEM certificate".to_string(),
            ));
        }

        let mut chain = terminated(own_certificate);
        if let Some(parent) = parent_chain.filter(|p| !p.trim().is_empty()) {
            chain.push_str(&terminated(parent));
        }
        Ok(chain)
    }

    /// Appends `chain` to a PEM document, as used for the `.chained.*` artifacts.
    pub fn concat(document: &str, chain: &str) -> String {
        let mut out = terminated(document);
        out.push_str(&terminated(chain));
        out
    }

    /// Splits a chain file back into its PEM certificates.
    pub fn certificates(chain: &str) -> Result<Vec<Vec<u8>>> {
        Ok(pem::parse_many(chain)?
            .into_iter()
            .filter(|p| p.tag() == "CERTIFICATE")
            .map(|p| p.into_contents())
            .collect())
    }
}

fn terminated(pem: &str) -> String {
    let mut s = pem.trim_end().to_string();
    s.push('\n');
    s
}
