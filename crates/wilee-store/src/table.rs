use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use wilee_core::{normalize_domain, CertificateRecord, ValidityWindow};

use crate::error::StoreError;
use crate::{IssueOutcome, RevokeOutcome};

/// Version of the exported store image
pub const STORE_IMAGE_VERSION: u16 = 1;

/// Serialized form of a whole store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
    pub version: u16,
    pub records: Vec<CertificateRecord>,
}

impl StoreImage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let image: StoreImage =
            bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if image.version != STORE_IMAGE_VERSION {
            return Err(StoreError::UnsupportedVersion(image.version));
        }
        Ok(image)
    }
}

/// Domain-keyed certificate table shared by the store implementations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateTable {
    records: BTreeMap<String, CertificateRecord>,
}

impl CertificateTable {
    pub fn new() -> Self {
        CertificateTable {
            records: BTreeMap::new(),
        }
    }

    pub fn issue(
        &mut self,
        domain: &str,
        certificate: &[u8],
        validity: ValidityWindow,
    ) -> Result<IssueOutcome, StoreError> {
        let record = CertificateRecord::new(domain, certificate.to_vec(), validity)?;

        let outcome = match self.records.get(&record.domain) {
            None => IssueOutcome::Issued,
            Some(current) if record.supersedes(current) => IssueOutcome::Replaced,
            Some(current) if current.version() == record.version() => IssueOutcome::Unchanged,
            Some(_) => IssueOutcome::Superseded,
        };

        debug!(
            "issue {} ({}): {:?}",
            record.domain,
            record.fingerprint.short(),
            outcome
        );

        if outcome.mutated() {
            self.records.insert(record.domain.clone(), record);
        }
        Ok(outcome)
    }

    pub fn revoke(&mut self, domain: &str) -> Result<RevokeOutcome, StoreError> {
        let domain = normalize_domain(domain)?;
        let outcome = match self.records.remove(&domain) {
            Some(_) => RevokeOutcome::Removed,
            None => RevokeOutcome::Unknown,
        };
        debug!("revoke {}: {:?}", domain, outcome);
        Ok(outcome)
    }

    pub fn get(&self, domain: &str) -> Option<CertificateRecord> {
        let domain = normalize_domain(domain).ok()?;
        self.records.get(&domain).cloned()
    }

    pub fn domains(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_image(&self) -> StoreImage {
        StoreImage {
            version: STORE_IMAGE_VERSION,
            records: self.records.values().cloned().collect(),
        }
    }

    pub fn export(&self) -> Result<Vec<u8>, StoreError> {
        self.to_image().to_bytes()
    }

    /// Build a table from image bytes without touching any existing table
    pub fn import(bytes: &[u8]) -> Result<Self, StoreError> {
        let image = StoreImage::from_bytes(bytes)?;
        let records = image
            .records
            .into_iter()
            .map(|record| (record.domain.clone(), record))
            .collect();
        Ok(CertificateTable { records })
    }
}
