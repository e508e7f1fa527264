use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use wilee_core::{CertificateRecord, ValidityWindow};

use crate::error::StoreError;
use crate::table::CertificateTable;
use crate::{CertificateStore, IssueOutcome, RevokeOutcome};

/// File-backed certificate store using a single image file.
///
/// Every mutation rewrites the image through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileCertStore {
    path: PathBuf,
    table: CertificateTable,
}

impl FileCertStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let table = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| StoreError::Storage(e.to_string()))?;
            if bytes.is_empty() {
                CertificateTable::new()
            } else {
                CertificateTable::import(&bytes)?
            }
        } else {
            CertificateTable::new()
        };

        info!(
            "Opened certificate store {} ({} certificates)",
            path.display(),
            table.len()
        );

        Ok(FileCertStore { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `table` and make it current; on failure nothing changes
    fn commit(&mut self, table: CertificateTable) -> Result<(), StoreError> {
        write_atomic(&self.path, &table.export()?)?;
        self.table = table;
        Ok(())
    }
}

/// Write `bytes` to `path` through a synced temporary file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::Storage(e.to_string()))?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|e| StoreError::Storage(e.to_string()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|e| StoreError::Storage(e.to_string()))?;
    Ok(())
}

impl CertificateStore for FileCertStore {
    fn issue(
        &mut self,
        domain: &str,
        certificate: &[u8],
        validity: ValidityWindow,
    ) -> Result<IssueOutcome, StoreError> {
        let mut table = self.table.clone();
        let outcome = table.issue(domain, certificate, validity)?;
        if outcome.mutated() {
            self.commit(table)?;
        }
        Ok(outcome)
    }

    fn revoke(&mut self, domain: &str) -> Result<RevokeOutcome, StoreError> {
        let mut table = self.table.clone();
        let outcome = table.revoke(domain)?;
        if outcome == RevokeOutcome::Removed {
            self.commit(table)?;
        }
        Ok(outcome)
    }

    fn export_all(&self) -> Result<Vec<u8>, StoreError> {
        self.table.export()
    }

    fn replace_all(&mut self, image: &[u8]) -> Result<(), StoreError> {
        let table = CertificateTable::import(image)?;
        self.commit(table)
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn window() -> ValidityWindow {
        ValidityWindow::new(0, 1_000).unwrap()
    }

    #[test]
    fn test_reopen_keeps_certificates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs").join("store.bin");

        {
            let mut store = FileCertStore::open(&path).unwrap();
            store.issue("a.example", b"a", window()).unwrap();
            store.issue("b.example", b"b", window()).unwrap();
            store.revoke("a.example").unwrap();
        }

        let store = FileCertStore::open(&path).unwrap();
        assert_eq!(store.domains(), vec!["b.example"]);
        assert_eq!(store.get("b.example").unwrap().certificate, b"b".to_vec());
    }

    #[test]
    fn test_replace_all_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let mut source = FileCertStore::open(dir.path().join("source.bin")).unwrap();
        source.issue("c.example", b"c", window()).unwrap();

        let mut store = FileCertStore::open(&path).unwrap();
        store.issue("old.example", b"o", window()).unwrap();
        store.replace_all(&source.export_all().unwrap()).unwrap();

        let reopened = FileCertStore::open(&path).unwrap();
        assert_eq!(reopened.domains(), vec!["c.example"]);
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        fs::write(&path, b"garbage").unwrap();

        assert!(FileCertStore::open(&path).is_err());
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let mut store = FileCertStore::open(&path).unwrap();
        store.issue("a.example", b"a", window()).unwrap();

        // A directory in place of the temporary file makes every write fail.
        fs::create_dir(dir.path().join("store.tmp")).unwrap();

        assert!(store.issue("b.example", b"b", window()).is_err());
        assert!(store.get("b.example").is_none());
        assert!(store.revoke("a.example").is_err());
        assert!(store.get("a.example").is_some());

        let image = store.export_all().unwrap();
        assert!(store.replace_all(&image).is_err());
        assert_eq!(store.domains(), vec!["a.example"]);

        fs::remove_dir(dir.path().join("store.tmp")).unwrap();
        let reopened = FileCertStore::open(&path).unwrap();
        assert_eq!(reopened.domains(), vec!["a.example"]);
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        fs::write(&path, b"").unwrap();

        let store = FileCertStore::open(&path).unwrap();
        assert!(store.is_empty());
    }
}
