pub mod certificate;
pub mod operation;

pub use certificate::{normalize_domain, CertificateRecord, CertificateVersion, ValidityWindow};
pub use operation::CertificateOperation;
