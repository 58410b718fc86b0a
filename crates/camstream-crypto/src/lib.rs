//! Cipher primitives for the camera streaming protocol.
//!
//! - [`SessionCipher`]: AES-128-CBC with a zero IV and no block padding, in
//!   the device's "all" and "some" (partial) variants
//! - [`KeyExchange`]: per-connection RSA-512 key pair, public-key frame
//!   payload and unwrapping of the device's wrapped AES key
//!
//! Nothing here is async or stateful beyond the keys themselves.

pub mod cipher;
pub mod error;
pub mod keyx;

pub use cipher::{
    partial_windows, SessionCipher, BLOCK_LEN, KEY_LEN, PARTIAL_STRIDE, PARTIAL_WINDOW,
};
pub use error::{CryptoError, Result};
pub use keyx::{
    encrypt_raw, parse_wrapped_key, wrap_session_key, KeyExchange, RSA_BITS, RSA_EXPONENT,
};
