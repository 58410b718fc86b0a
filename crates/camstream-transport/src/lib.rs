//! TCP transport for the camera streaming protocol.
//!
//! The device will not accept binary frames until it has seen a short
//! HTTP-looking preamble line. This crate opens the socket, writes that
//! preamble and hands back a ready [`tokio::net::TcpStream`].
//!
//! This is the lowest layer of camstream. Everything else builds on top of
//! the stream returned by [`connect`].

pub mod endpoint;
pub mod error;
pub mod tcp;

pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use error::{Result, TransportError};
pub use tcp::{connect, preamble};
