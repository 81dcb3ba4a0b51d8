//! JSON codec for line-delimited payloads.
//!
//! The codec is a marker struct with static methods rather than a trait
//! object, allowing compile-time selection and keeping the wire contract
//! in one place: one UTF-8 JSON object per line, terminated by `\n`.
//! `serde_json` escapes any newline inside string values, so a serialized
//! message can never contain a raw delimiter byte.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Newline-delimited JSON codec.
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a value to JSON bytes (no trailing delimiter).
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Serialize a value to JSON bytes with the `\n` frame delimiter appended.
    pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Deserialize a value from the bytes of one frame.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            id: u32,
            name: String,
        }

        let value = Payload {
            id: 7,
            name: "seven".into(),
        };
        let bytes = JsonCodec::encode(&value).unwrap();
        let back: Payload = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_encode_line_appends_delimiter() {
        let bytes = JsonCodec::encode_line(&42u32).unwrap();
        assert_eq!(bytes, b"42\n");
    }

    #[test]
    fn test_embedded_newlines_are_escaped() {
        let bytes = JsonCodec::encode_line(&"line one\nline two").unwrap();
        // Exactly one raw newline: the frame delimiter at the end.
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn test_decode_error_is_json_variant() {
        let result: Result<u32> = JsonCodec::decode(b"not json");
        assert!(matches!(result, Err(crate::error::RpcError::Json(_))));
    }
}
