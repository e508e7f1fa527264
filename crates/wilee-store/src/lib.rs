//! Wilee Store - Local certificate storage
//!
//! This crate provides the certificate store capability driven by the
//! replicated state machine, with in-memory and file-backed implementations.

pub mod error;
pub mod memory;
pub mod persistent;
pub mod table;

use serde::{Deserialize, Serialize};
use wilee_core::{CertificateRecord, ValidityWindow};

pub use error::StoreError;
pub use memory::MemoryCertStore;
pub use persistent::{write_atomic, FileCertStore};
pub use table::{CertificateTable, StoreImage, STORE_IMAGE_VERSION};

/// Result of an issue request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueOutcome {
    /// Domain had no certificate
    Issued,
    /// A newer certificate replaced the stored one
    Replaced,
    /// The stored certificate is the same version
    Unchanged,
    /// The stored certificate is newer, request ignored
    Superseded,
}

impl IssueOutcome {
    /// Check if the request changed the store
    pub fn mutated(&self) -> bool {
        matches!(self, IssueOutcome::Issued | IssueOutcome::Replaced)
    }
}

/// Result of a revoke request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeOutcome {
    Removed,
    /// Domain had no certificate
    Unknown,
}

/// Certificate store capability.
///
/// `issue` and `revoke` must be idempotent, and `replace_all` must swap the
/// whole content for the exported image.
pub trait CertificateStore: Send + Sync {
    /// Store a certificate unless a newer or identical one is present
    fn issue(
        &mut self,
        domain: &str,
        certificate: &[u8],
        validity: ValidityWindow,
    ) -> Result<IssueOutcome, StoreError>;

    /// Remove the certificate of a domain
    fn revoke(&mut self, domain: &str) -> Result<RevokeOutcome, StoreError>;

    /// Serialize the full store content
    fn export_all(&self) -> Result<Vec<u8>, StoreError>;

    /// Replace the full store content with an exported image
    fn replace_all(&mut self, image: &[u8]) -> Result<(), StoreError>;

    /// Get the certificate of a domain
    fn get(&self, domain: &str) -> Option<CertificateRecord>;

    /// All stored domains, sorted
    fn domains(&self) -> Vec<String>;

    /// Number of stored certificates
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
