//! Request payload serialization
//!
//! Structured payloads are first rendered as JSON text; the text is then
//! turned into bytes under the step's declared encoding. No framing is added.

use std::fmt;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::common::{Error, Result};

/// Payload of a send step
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    /// Text sent as-is (after encoding)
    Text(String),
    /// Any other value, rendered as JSON text before encoding
    Structured(Value),
}

impl Payload {
    /// Render the payload as text
    pub fn to_text(&self) -> Result<String> {
        match self {
            Payload::Text(text) => Ok(text.clone()),
            Payload::Structured(value) => Ok(serde_json::to_string(value)?),
        }
    }

    /// Render and encode the payload into the bytes written to the wire
    pub fn to_bytes(&self, encoding: Encoding) -> Result<Vec<u8>> {
        encoding.encode(&self.to_text()?)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{:?}", text),
            Payload::Structured(value) => write!(f, "{}", value),
        }
    }
}

/// Byte encoding a payload's text is interpreted under
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 bytes of the text
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    /// Low byte of each UTF-16 code unit
    Ascii,
    /// Low byte of each UTF-16 code unit
    #[serde(alias = "binary")]
    Latin1,
    /// Text is a hex string
    Hex,
    /// Text is standard or URL-safe base64, padding optional
    #[serde(alias = "base64url")]
    Base64,
    /// Little-endian UTF-16 code units
    #[serde(alias = "ucs2", alias = "ucs-2", alias = "utf-16le")]
    Utf16le,
}

impl Encoding {
    /// Encode text into bytes
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii | Encoding::Latin1 => {
                Ok(text.encode_utf16().map(|unit| unit as u8).collect())
            }
            Encoding::Hex => hex::decode(text.trim()).map_err(|e| Error::encoding(self, e)),
            Encoding::Base64 => decode_base64(text).map_err(|e| Error::encoding(self, e)),
            Encoding::Utf16le => Ok(text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect()),
        }
    }
}

fn decode_base64(text: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .or_else(|_| URL_SAFE.decode(&cleaned))
        .or_else(|_| URL_SAFE_NO_PAD.decode(&cleaned))
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
            Encoding::Utf16le => "utf16le",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_utf8_text() {
        let bytes = Payload::Text("ping".into()).to_bytes(Encoding::Utf8).unwrap();
        assert_eq!(bytes, b"ping");
    }

    #[test]
    fn test_structured_payload_is_json_text() {
        let payload = Payload::Structured(json!({"op": "get", "id": 7}));
        let text = payload.to_text().unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"op": "get", "id": 7}));
        assert_eq!(payload.to_bytes(Encoding::Utf8).unwrap(), text.into_bytes());
    }

    #[test]
    fn test_hex_encoding() {
        let bytes = Encoding::Hex.encode("706f6e67").unwrap();
        assert_eq!(bytes, vec![0x70, 0x6f, 0x6e, 0x67]);
        assert!(matches!(
            Encoding::Hex.encode("70z"),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn test_base64_variants() {
        assert_eq!(Encoding::Base64.encode("cGluZw==").unwrap(), b"ping");
        assert_eq!(Encoding::Base64.encode("cGluZw").unwrap(), b"ping");
        assert_eq!(Encoding::Base64.encode("_-8").unwrap(), vec![0xff, 0xef]);
    }

    #[test]
    fn test_latin1_takes_low_byte() {
        assert_eq!(Encoding::Latin1.encode("é\u{0101}").unwrap(), vec![0xe9, 0x01]);
        assert_eq!(Encoding::Ascii.encode("ok").unwrap(), b"ok");
    }

    #[test]
    fn test_utf16le() {
        assert_eq!(Encoding::Utf16le.encode("hi").unwrap(), vec![b'h', 0, b'i', 0]);
    }

    #[test]
    fn test_encoding_names() {
        let enc: Encoding = serde_json::from_value(json!("utf-8")).unwrap();
        assert_eq!(enc, Encoding::Utf8);
        let enc: Encoding = serde_json::from_value(json!("binary")).unwrap();
        assert_eq!(enc, Encoding::Latin1);
        let enc: Encoding = serde_json::from_value(json!("ucs2")).unwrap();
        assert_eq!(enc, Encoding::Utf16le);
        assert_eq!(Encoding::Utf16le.to_string(), "utf16le");
    }
}
