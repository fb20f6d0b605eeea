//! Record-level decoders used by the extraction loop

use super::{DecodeError, decode_item};
use crate::etl::Transformer;
use crate::record::{DecodedRecord, RawRecord, StreamRecord};
use crate::transform::TransformChain;

use eyre::{Result, WrapErr};
use serde_json::{Map, Value};

/// Decodes raw records into [`DecodedRecord`]s and applies the
/// per-source transform chain.
///
/// # Example
/// ```
/// use store_dump::decode::RecordDecoder;
/// use store_dump::etl::Transformer;
/// use store_dump::record::RawRecord;
/// use serde_json::json;
///
/// let decoder = RecordDecoder::new("users");
/// let item = json!({"id": {"S": "u-1"}});
/// let record = decoder
///     .transform(RawRecord::Item(item.as_object().unwrap().clone()))
///     .unwrap();
/// assert_eq!(record.value()["id"], "u-1");
/// ```
pub struct RecordDecoder {
    source: String,
    transforms: TransformChain,
}

impl RecordDecoder {
    /// Create a decoder without post-decode transforms
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            transforms: TransformChain::default(),
        }
    }

    /// Apply `transforms` to every decoded record
    pub fn with_transforms(mut self, transforms: TransformChain) -> Self {
        self.transforms = transforms;
        self
    }

    /// Decode a stream record envelope and its payload.
    ///
    /// The payload becomes JSON when it parses as JSON, otherwise UTF-8 text.
    pub fn decode_stream(record: &StreamRecord) -> Result<Value, DecodeError> {
        let bytes = record.payload()?;
        let data = match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => value,
            Err(_) => payload_text(bytes)?,
        };
        Ok(envelope(record, data))
    }

    /// Decode a stream record envelope keeping the payload as UTF-8 text
    pub fn decode_stream_text(record: &StreamRecord) -> Result<Value, DecodeError> {
        let data = payload_text(record.payload()?)?;
        Ok(envelope(record, data))
    }
}

fn payload_text(bytes: Vec<u8>) -> Result<Value, DecodeError> {
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| DecodeError::OpaquePayload)
}

fn envelope(record: &StreamRecord, data: Value) -> Value {
    let mut envelope = Map::new();
    envelope.insert(
        "SequenceNumber".to_string(),
        Value::String(record.sequence_number.clone()),
    );
    envelope.insert(
        "PartitionKey".to_string(),
        Value::String(record.partition_key.clone()),
    );
    if let Some(arrival) = &record.approximate_arrival {
        envelope.insert(
            "ApproximateArrivalTimestamp".to_string(),
            Value::Number(arrival.clone()),
        );
    }
    envelope.insert("Data".to_string(), data);
    Value::Object(envelope)
}

impl Transformer for RecordDecoder {
    type Input = RawRecord;
    type Output = DecodedRecord;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        let value = match &input {
            RawRecord::Item(item) => decode_item(item)?,
            // Transforms unwrap the payload text themselves
            RawRecord::Stream(record) if self.transforms.is_empty() => Self::decode_stream(record)?,
            RawRecord::Stream(record) => Self::decode_stream_text(record)?,
        };
        let value = self
            .transforms
            .transform(value)
            .wrap_err_with(|| format!("Failed to transform record from {}", self.source))?;
        Ok(DecodedRecord::new(value))
    }
}

/// Passes each record's native bytes through untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct RawPassthrough;

impl Transformer for RawPassthrough {
    type Input = RawRecord;
    type Output = Vec<u8>;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        Ok(input.into_bytes()?)
    }
}
