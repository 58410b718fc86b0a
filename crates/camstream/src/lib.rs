//! Client for the binary streaming protocol spoken by FOSC-framed network
//! cameras.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connection and opening preamble
//! - [`frame`]: Magic-resynchronizing frame codec and the framing link
//! - [`crypto`]: Device-compatible AES-128-CBC and RSA key exchange (behind `session` feature)
//! - [`session`]: Encryption negotiation, login, keepalive and stream control (behind `session` feature)
//! - `logging`: `tracing-subscriber` setup for binaries (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use camstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use camstream_frame::*;
}

/// Re-export cipher primitives (requires `session` feature).
#[cfg(feature = "session")]
pub mod crypto {
    pub use camstream_crypto::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use camstream_session::*;
}

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "session")]
pub use camstream_session::{Session, SessionConfig, SessionError, SessionEvent};
