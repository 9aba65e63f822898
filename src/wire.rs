//! Shared message header and hex encoding for binary payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stamp and coordinate frame carried by every sensor and output message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Capture time in seconds.
    pub stamp: f64,
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: f64, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Serde adapter storing `Vec<u8>` as a lowercase hex string.
pub(crate) mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn hex_payload_rejects_odd_length() {
        let err = serde_json::from_str::<Blob>(r#"{"data":"abc"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn hex_payload_serializes_lowercase() {
        let json = serde_json::to_string(&Blob {
            data: vec![0xde, 0xad, 0x01],
        })
        .unwrap();
        assert_eq!(json, r#"{"data":"dead01"}"#);
    }
}
