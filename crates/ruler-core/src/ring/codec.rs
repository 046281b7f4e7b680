use crate::error::{Result, RulerError};

use super::desc::RingDesc;

/// Encoding of the ring descriptor stored in the KV store.
pub trait Codec: Send + Sync {
    /// Short identifier, used in logs.
    fn id(&self) -> &'static str;

    /// Encode a descriptor into a blob.
    fn encode(&self, desc: &RingDesc) -> Result<Vec<u8>>;

    /// Decode a blob into a descriptor.
    fn decode(&self, bytes: &[u8]) -> Result<RingDesc>;
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn id(&self) -> &'static str {
        "json"
    }

    fn encode(&self, desc: &RingDesc) -> Result<Vec<u8>> {
        serde_json::to_vec(desc).map_err(|e| RulerError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<RingDesc> {
        // An empty blob is what a store hands back for a freshly created key.
        if bytes.is_empty() {
            return Ok(RingDesc::new());
        }
        serde_json::from_slice(bytes).map_err(|e| RulerError::Deserialization(e.to_string()))
    }
}
