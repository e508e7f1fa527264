use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::CertificateOperation;

/// Schema tag prepended to every replicated log entry
pub const ENTRY_FORMAT_V1: u8 = 1;

/// Serialize to deterministic bincode bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Encode an operation as a log entry payload
pub fn encode_operation(op: &CertificateOperation) -> Result<Vec<u8>, CoreError> {
    let body = to_bytes(op)?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(ENTRY_FORMAT_V1);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a log entry payload. Trailing bytes are treated as corruption.
pub fn decode_operation(bytes: &[u8]) -> Result<CertificateOperation, CoreError> {
    let (tag, body) = bytes.split_first().ok_or(CoreError::EmptyEntry)?;
    if *tag != ENTRY_FORMAT_V1 {
        return Err(CoreError::UnknownEntryFormat(*tag));
    }

    let op: CertificateOperation = from_bytes(body)?;
    let consumed = bincode::serialized_size(&op)
        .map_err(|e| CoreError::Deserialization(e.to_string()))?;
    if consumed as usize != body.len() {
        return Err(CoreError::Deserialization(format!(
            "{} trailing bytes",
            body.len() - consumed as usize
        )));
    }

    Ok(op)
}
