//! Record decoding
//!
//! Converts raw backend records into portable JSON values:
//! - Table items from attribute-value wire form
//! - Stream records from their envelope and payload bytes
//! - Raw passthrough for payloads that must not be re-parsed

mod attribute;
mod record;

pub use attribute::{decode_attribute, decode_item};
pub use record::{RawPassthrough, RecordDecoder};

/// Failure to decode a single record
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("attribute value must be an object with a single type tag, got {0}")]
    Malformed(String),

    #[error("unsupported attribute type tag '{0}'")]
    UnknownTag(String),

    #[error("attribute '{tag}' expects {expected}")]
    WrongShape { tag: String, expected: &'static str },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("invalid base64 in '{field}'")]
    InvalidBase64 {
        field: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("field '{0}' is missing or not a string")]
    MissingField(String),

    #[error("payload is neither JSON nor UTF-8 text")]
    OpaquePayload,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
