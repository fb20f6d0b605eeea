//! Attribute-value wire format decoding
//!
//! Every attribute is an object with a single type tag:
//! `{"S": "text"}`, `{"N": "10.20"}`, `{"M": {...}}` and so on.

use super::DecodeError;

use base64::Engine;
use serde_json::{Map, Number, Value};

/// Decode a table item (attribute name to tagged value) into a JSON object
///
/// # Example
/// ```
/// use store_dump::decode::decode_item;
/// use serde_json::json;
///
/// let item = json!({"id": {"S": "a-1"}, "total": {"N": "10.20"}});
/// let decoded = decode_item(item.as_object().unwrap()).unwrap();
/// assert_eq!(decoded["id"], "a-1");
/// assert_eq!(decoded["total"].to_string(), "10.20");
/// ```
pub fn decode_item(item: &Map<String, Value>) -> Result<Value, DecodeError> {
    item.iter()
        .map(|(name, attribute)| Ok((name.clone(), decode_attribute(attribute)?)))
        .collect::<Result<Map<_, _>, DecodeError>>()
        .map(Value::Object)
}

/// Decode one tagged attribute value
pub fn decode_attribute(attribute: &Value) -> Result<Value, DecodeError> {
    let (tag, inner) = match attribute.as_object() {
        Some(obj) if obj.len() == 1 => obj.iter().next().ok_or_else(|| malformed(attribute))?,
        _ => return Err(malformed(attribute)),
    };

    match tag.as_str() {
        "S" => Ok(Value::String(string(tag, inner)?.to_string())),
        "N" => number(string(tag, inner)?).map(Value::Number),
        "B" => binary(string(tag, inner)?).map(Value::String),
        "BOOL" => inner.as_bool().map(Value::Bool).ok_or_else(|| shape(tag, "a boolean")),
        "NULL" => Ok(Value::Null),
        "M" => inner
            .as_object()
            .ok_or_else(|| shape(tag, "an object"))
            .and_then(decode_item),
        "L" => array(tag, inner)?
            .iter()
            .map(decode_attribute)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "SS" => array(tag, inner)?
            .iter()
            .map(|v| string(tag, v).map(|s| Value::String(s.to_string())))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "NS" => array(tag, inner)?
            .iter()
            .map(|v| string(tag, v).and_then(number).map(Value::Number))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "BS" => array(tag, inner)?
            .iter()
            .map(|v| string(tag, v).and_then(binary).map(Value::String))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(DecodeError::UnknownTag(other.to_string())),
    }
}

fn malformed(attribute: &Value) -> DecodeError {
    DecodeError::Malformed(attribute.to_string())
}

fn shape(tag: &str, expected: &'static str) -> DecodeError {
    DecodeError::WrongShape {
        tag: tag.to_string(),
        expected,
    }
}

fn string<'a>(tag: &str, value: &'a Value) -> Result<&'a str, DecodeError> {
    value.as_str().ok_or_else(|| shape(tag, "a string"))
}

fn array<'a>(tag: &str, value: &'a Value) -> Result<&'a Vec<Value>, DecodeError> {
    value.as_array().ok_or_else(|| shape(tag, "an array"))
}

/// Numbers travel as strings; keep their digits verbatim
fn number(text: &str) -> Result<Number, DecodeError> {
    text.parse::<Number>()
        .map_err(|_| DecodeError::InvalidNumber(text.to_string()))
}

/// Binary stays base64 text once validated
fn binary(text: &str) -> Result<String, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| DecodeError::InvalidBase64 {
            field: "B".to_string(),
            source: e,
        })?;
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<Value, DecodeError> {
        decode_item(value.as_object().unwrap())
    }

    #[test]
    fn test_scalars() {
        let decoded = decode(json!({
            "name": {"S": "Widget"},
            "active": {"BOOL": true},
            "deleted": {"NULL": true},
            "blob": {"B": "aGVsbG8="}
        }))
        .unwrap();

        assert_eq!(decoded["name"], "Widget");
        assert_eq!(decoded["active"], true);
        assert!(decoded["deleted"].is_null());
        assert_eq!(decoded["blob"], "aGVsbG8=");
    }

    #[test]
    fn test_numbers_keep_digits() {
        let decoded = decode(json!({
            "price": {"N": "10.20"},
            "big": {"N": "123456789012345678901234567890.000001"},
            "neg": {"N": "-0.50"}
        }))
        .unwrap();

        let line = serde_json::to_string(&decoded).unwrap();
        assert!(line.contains(r#""price":10.20"#));
        assert!(line.contains(r#""big":123456789012345678901234567890.000001"#));
        assert!(line.contains(r#""neg":-0.50"#));
    }

    #[test]
    fn test_nested_collections() {
        let decoded = decode(json!({
            "tags": {"SS": ["a", "b"]},
            "scores": {"NS": ["1", "2.50"]},
            "address": {"M": {
                "city": {"S": "Oslo"},
                "lines": {"L": [{"S": "1 Main St"}, {"N": "7"}]}
            }}
        }))
        .unwrap();

        assert_eq!(decoded["tags"], json!(["a", "b"]));
        assert_eq!(decoded["scores"].to_string(), "[1,2.50]");
        assert_eq!(decoded["address"]["city"], "Oslo");
        assert_eq!(decoded["address"]["lines"][0], "1 Main St");
        assert_eq!(decoded["address"]["lines"][1].to_string(), "7");
    }

    #[test]
    fn test_malformed_attributes() {
        assert!(matches!(
            decode(json!({"x": "bare"})),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(json!({"x": {"S": "a", "N": "1"}})),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(json!({"x": {"Q": "?"}})),
            Err(DecodeError::UnknownTag(tag)) if tag == "Q"
        ));
        assert!(matches!(
            decode(json!({"x": {"N": "twelve"}})),
            Err(DecodeError::InvalidNumber(_))
        ));
        assert!(matches!(
            decode(json!({"x": {"BOOL": "yes"}})),
            Err(DecodeError::WrongShape { .. })
        ));
        assert!(matches!(
            decode(json!({"x": {"BS": ["%%%"]}})),
            Err(DecodeError::InvalidBase64 { .. })
        ));
    }
}
