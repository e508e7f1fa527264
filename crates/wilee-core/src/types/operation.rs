use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::certificate::{normalize_domain, CertificateRecord, ValidityWindow};

/// A mutation of the certificate store, replicated through the cluster log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateOperation {
    /// Store a certificate for a domain
    Issue {
        domain: String,
        certificate: Vec<u8>,
        not_before: u64,
        not_after: u64,
    },
    /// Drop whatever certificate the domain has
    Revoke { domain: String },
}

impl CertificateOperation {
    pub fn issue(
        domain: impl Into<String>,
        certificate: impl Into<Vec<u8>>,
        not_before: u64,
        not_after: u64,
    ) -> Self {
        CertificateOperation::Issue {
            domain: domain.into(),
            certificate: certificate.into(),
            not_before,
            not_after,
        }
    }

    pub fn revoke(domain: impl Into<String>) -> Self {
        CertificateOperation::Revoke {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            CertificateOperation::Issue { domain, .. } => domain,
            CertificateOperation::Revoke { domain } => domain,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CertificateOperation::Issue { .. } => "issue",
            CertificateOperation::Revoke { .. } => "revoke",
        }
    }

    /// Check the operation would be accepted by a store
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            CertificateOperation::Issue { .. } => self.to_record().map(|_| ()),
            CertificateOperation::Revoke { domain } => normalize_domain(domain).map(|_| ()),
        }
    }

    /// Build the record an `Issue` would store
    pub fn to_record(&self) -> Result<CertificateRecord, CoreError> {
        match self {
            CertificateOperation::Issue {
                domain,
                certificate,
                not_before,
                not_after,
            } => {
                let validity = ValidityWindow::new(*not_before, *not_after)?;
                CertificateRecord::new(domain, certificate.clone(), validity)
            }
            CertificateOperation::Revoke { domain } => Err(CoreError::InvalidCertificate(
                format!("revoke of {} carries no certificate", domain),
            )),
        }
    }
}

impl fmt::Display for CertificateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.domain())
    }
}
