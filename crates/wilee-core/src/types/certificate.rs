use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::{hash_blake3, Hash};

/// Longest domain name accepted (RFC 1035 presentation limit)
pub const MAX_DOMAIN_LEN: usize = 253;

/// Lowercases and validates a domain name.
pub fn normalize_domain(domain: &str) -> Result<String, CoreError> {
    let domain = domain.trim().to_ascii_lowercase();

    if domain.is_empty() {
        return Err(CoreError::InvalidDomain("empty domain".to_string()));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(CoreError::InvalidDomain(format!(
            "{} bytes exceeds {}",
            domain.len(),
            MAX_DOMAIN_LEN
        )));
    }
    if domain.chars().any(char::is_whitespace) {
        return Err(CoreError::InvalidDomain(domain));
    }

    Ok(domain)
}

/// Unix-second interval during which a certificate is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub not_before: u64,
    pub not_after: u64,
}

impl ValidityWindow {
    pub fn new(not_before: u64, not_after: u64) -> Result<Self, CoreError> {
        if not_before > not_after {
            return Err(CoreError::InvalidValidity {
                not_before,
                not_after,
            });
        }
        Ok(ValidityWindow {
            not_before,
            not_after,
        })
    }
}

/// Ordering key used to decide whether an issued certificate supersedes
/// the stored one. Compares the window first, then the fingerprint so that
/// ties resolve identically on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CertificateVersion {
    pub not_before: u64,
    pub not_after: u64,
    pub fingerprint: Hash,
}

/// A certificate held by the store for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Normalized domain name
    pub domain: String,
    /// Encoded certificate (PEM or DER, opaque to the store)
    pub certificate: Vec<u8>,
    /// Validity window
    pub validity: ValidityWindow,
    /// Blake3 hash of `certificate`
    pub fingerprint: Hash,
}

impl CertificateRecord {
    pub fn new(
        domain: &str,
        certificate: Vec<u8>,
        validity: ValidityWindow,
    ) -> Result<Self, CoreError> {
        let domain = normalize_domain(domain)?;
        if certificate.is_empty() {
            return Err(CoreError::InvalidCertificate(format!(
                "empty certificate for {}",
                domain
            )));
        }

        let fingerprint = hash_blake3(&certificate);
        Ok(CertificateRecord {
            domain,
            certificate,
            validity,
            fingerprint,
        })
    }

    pub fn version(&self) -> CertificateVersion {
        CertificateVersion {
            not_before: self.validity.not_before,
            not_after: self.validity.not_after,
            fingerprint: self.fingerprint,
        }
    }

    /// Check if this record should replace `other`
    pub fn supersedes(&self, other: &CertificateRecord) -> bool {
        self.version() > other.version()
    }
}
