//! Wilee Core - Certificate types, hashing, and serialization
//!
//! This crate provides the foundational types shared by the certificate
//! store and the replicated control plane.

pub mod codec;
pub mod error;
pub mod hash;
pub mod types;

pub use codec::{decode_operation, encode_operation, ENTRY_FORMAT_V1};
pub use error::CoreError;
pub use hash::{hash_blake3, Hash};
pub use types::*;
