//! Nested payload unwrapper
//!
//! Replaces a field holding an encoded document with the parsed document.

use crate::decode::DecodeError;
use crate::etl::Transformer;

use base64::Engine;
use eyre::Result;
use serde_json::Value;

/// How the nested document is encoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Base64 text holding JSON
    Base64Json,
    /// A JSON document serialized into a string
    JsonString,
}

/// Transformer that unwraps an encoded sub-document in place
///
/// # Example
/// ```
/// use store_dump::transform::PayloadUnwrapper;
/// use store_dump::etl::Transformer;
/// use serde_json::json;
///
/// let unwrapper = PayloadUnwrapper::json_string("Data");
/// let output = unwrapper
///     .transform(json!({"Data": "{\"campaign\":\"spring\"}"}))
///     .unwrap();
/// assert_eq!(output["Data"]["campaign"], "spring");
/// ```
#[derive(Clone, Debug)]
pub struct PayloadUnwrapper {
    field: String,
    encoding: PayloadEncoding,
}

impl PayloadUnwrapper {
    pub fn new(field: impl Into<String>, encoding: PayloadEncoding) -> Self {
        Self {
            field: field.into(),
            encoding,
        }
    }

    pub fn base64_json(field: impl Into<String>) -> Self {
        Self::new(field, PayloadEncoding::Base64Json)
    }

    pub fn json_string(field: impl Into<String>) -> Self {
        Self::new(field, PayloadEncoding::JsonString)
    }

    fn unwrap_payload(&self, text: &str) -> Result<Value, DecodeError> {
        match self.encoding {
            PayloadEncoding::Base64Json => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .map_err(|e| DecodeError::InvalidBase64 {
                        field: self.field.clone(),
                        source: e,
                    })?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            PayloadEncoding::JsonString => Ok(serde_json::from_str(text)?),
        }
    }
}

impl Transformer for PayloadUnwrapper {
    type Input = Value;
    type Output = Value;

    fn transform(&self, mut input: Self::Input) -> Result<Self::Output> {
        let field = input
            .get_mut(&self.field)
            .ok_or_else(|| DecodeError::MissingField(self.field.clone()))?;
        let text = field
            .as_str()
            .ok_or_else(|| DecodeError::MissingField(self.field.clone()))?;
        let unwrapped = self.unwrap_payload(text)?;
        *field = unwrapped;
        Ok(input)
    }
}
