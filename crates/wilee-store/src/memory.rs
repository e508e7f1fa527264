use wilee_core::{CertificateRecord, ValidityWindow};

use crate::error::StoreError;
use crate::table::CertificateTable;
use crate::{CertificateStore, IssueOutcome, RevokeOutcome};

/// In-memory certificate store
#[derive(Debug, Clone, Default)]
pub struct MemoryCertStore {
    table: CertificateTable,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        MemoryCertStore {
            table: CertificateTable::new(),
        }
    }
}

impl CertificateStore for MemoryCertStore {
    fn issue(
        &mut self,
        domain: &str,
        certificate: &[u8],
        validity: ValidityWindow,
    ) -> Result<IssueOutcome, StoreError> {
        self.table.issue(domain, certificate, validity)
    }

    fn revoke(&mut self, domain: &str) -> Result<RevokeOutcome, StoreError> {
        self.table.revoke(domain)
    }

    fn export_all(&self) -> Result<Vec<u8>, StoreError> {
        self.table.export()
    }

    fn replace_all(&mut self, image: &[u8]) -> Result<(), StoreError> {
        self.table = CertificateTable::import(image)?;
        Ok(())
    }

    fn get(&self, domain: &str) -> Option<CertificateRecord> {
        self.table.get(domain)
    }

    fn domains(&self) -> Vec<String> {
        self.table.domains()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
