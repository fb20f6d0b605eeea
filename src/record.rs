//! Raw wire records and their decoded, sink-ready form

use crate::decode::DecodeError;

use base64::Engine;
use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::str::FromStr;

/// An undecoded record as returned by the backend
#[derive(Clone, Debug, PartialEq)]
pub enum RawRecord {
    /// Table item in attribute-value wire form
    Item(Map<String, Value>),
    /// Stream record with its envelope
    Stream(StreamRecord),
}

impl RawRecord {
    /// The record's native bytes, for sinks that must not re-parse them.
    ///
    /// Table items yield their attribute-value JSON; stream records yield
    /// the payload bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>, DecodeError> {
        match self {
            Self::Item(item) => Ok(serde_json::to_vec(&Value::Object(item))?),
            Self::Stream(record) => record.payload(),
        }
    }
}

/// Stream record envelope as carried on the wire
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub sequence_number: String,
    pub partition_key: String,
    /// Arrival time in epoch seconds, with the backend's precision
    pub approximate_arrival: Option<Number>,
    /// Base64 encoded payload
    pub data: String,
}

impl StreamRecord {
    /// Decode the payload bytes
    pub fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| DecodeError::InvalidBase64 {
                field: "Data".to_string(),
                source: e,
            })
    }
}

/// A decoded record ready for a sink.
///
/// Numbers keep the exact digit sequence they had on the wire, so
/// `10.20` is written as `10.20`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DecodedRecord(Value);

impl DecodedRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Exact decimal at a JSON pointer (e.g. `/price`), if it is a number
    pub fn decimal(&self, pointer: &str) -> Option<BigDecimal> {
        let number = self.0.pointer(pointer)?.as_number()?;
        BigDecimal::from_str(&number.to_string()).ok()
    }

    /// Serialize as a single line of JSON text, without trailing newline
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
    }
}
