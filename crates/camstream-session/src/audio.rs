use std::fmt;

/// Error reported by an [`AudioCodec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Converts raw PCM to the compressed format carried in talk frames and back.
///
/// The session only calls [`encode`](AudioCodec::encode), when talk data is
/// sent with compression requested. Implementations hold no state shared with
/// the protocol stack.
pub trait AudioCodec: Send + Sync {
    fn encode(&self, pcm: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError>;
}

impl fmt::Debug for dyn AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AudioCodec")
    }
}
