//! Messages exchanged with the in-page capture agent.
//!
//! Everything crosses the boundary as JSON; binary payloads are base64.

use serde::{Deserialize, Serialize};

/// Name of the page binding the agent posts to.
pub const BINDING_NAME: &str = "__mailsignBridge";

/// Error string the agent returns for a key it does not hold.
pub const UNKNOWN_KEY: &str = "unknown-key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BridgeMessage {
    /// Request for the content held under `key`.
    FetchBlob {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        key: String,
    },
    /// Reply to a `FetchBlob`; exactly one of `bytes` and `error` is set.
    BlobResult {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The page minted a PDF handle.
    BlobCaptured { key: String },
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
