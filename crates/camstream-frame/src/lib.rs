//! Length-prefixed message framing for the camera streaming protocol.
//!
//! This is the framing layer of camstream. Every message is framed with:
//! - A 4-byte little-endian packet type
//! - A 4-byte big-endian magic number ("FOSC") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! Corrupt or resliced input is recovered by sliding forward one byte at a
//! time until a valid magic lines up again.

pub mod codec;
pub mod error;
pub mod link;
pub mod packet;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, resync, Frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
pub use link::FrameLink;
pub use reader::{CloseReason, FrameHandler};
pub use writer::FrameWriter;
