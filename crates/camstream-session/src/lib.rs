//! Encryption and session layers for the camera streaming protocol.
//!
//! This is the "just works" layer. A [`Session`] queries the device's
//! capabilities, negotiates the RSA-wrapped AES session key when the device
//! asks for one, logs in, keeps the session alive in the background and
//! drives the video and talk-back streams.
//!
//! ```no_run
//! # async fn demo() -> camstream_session::Result<()> {
//! use camstream_session::{Session, SessionConfig};
//!
//! let session = Session::new(SessionConfig::new("192.168.1.20").with_credentials("admin", "pw"));
//! let mut media = session.subscribe_media();
//! session.start_video_stream(true).await?;
//! while let Ok(data) = media.recv().await {
//!     println!("{} bytes of media", data.len());
//! }
//! # Ok(())
//! # }
//! ```

mod attempt;
pub mod audio;
pub mod capability;
pub mod config;
mod dispatch;
pub mod error;
pub mod event;
mod keepalive;
pub mod messages;
pub mod pending;
pub mod secure;
mod session;
pub mod stream;

pub use audio::{AudioCodec, CodecError};
pub use capability::{
    parse_sw_flag, Capabilities, CapabilityProbe, FixedCapabilities, HttpCapabilityProbe,
};
pub use config::SessionConfig;
pub use dispatch::SessionState;
pub use error::{Result, SessionError};
pub use event::SessionEvent;
pub use pending::{PendingTable, Waiter};
pub use secure::{decrypt_inbound, encrypt_outbound, EncryptionLayer, EncryptionState};
pub use session::Session;
pub use stream::{StreamKind, StreamState};
