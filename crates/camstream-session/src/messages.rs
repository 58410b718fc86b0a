//! Request payload builders and reply parsing.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};

/// Width of the username and password fields.
pub const CREDENTIAL_LEN: usize = 64;

/// Size of login and video start/stop requests.
pub const STREAM_REQUEST_LEN: usize = 161;

/// Size of talk start/stop requests.
pub const TALK_REQUEST_LEN: usize = 160;

/// Username, password and group id carried by most requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub group_id: u32,
}

impl Credentials {
    fn put(&self, buf: &mut BytesMut) {
        put_fixed(buf, self.username.as_bytes());
        put_fixed(buf, self.password.as_bytes());
        buf.put_u32_le(self.group_id);
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("group_id", &self.group_id)
            .finish()
    }
}

// Truncate or zero-pad to the fixed credential width.
fn put_fixed(buf: &mut BytesMut, value: &[u8]) {
    let take = value.len().min(CREDENTIAL_LEN);
    buf.put_slice(&value[..take]);
    buf.put_bytes(0, CREDENTIAL_LEN - take);
}

/// `[selector u8][username 64][password 64][group u32 LE][zero pad]`, used by
/// login and video start/stop. Selector 0 is the main stream, 1 the sub stream.
pub fn stream_request(credentials: &Credentials, main_stream: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(STREAM_REQUEST_LEN);
    buf.put_u8(if main_stream { 0 } else { 1 });
    credentials.put(&mut buf);
    buf.resize(STREAM_REQUEST_LEN, 0);
    buf.freeze()
}

/// `[username 64][password 64][group u32 LE][zero pad]`, used by talk
/// start/stop.
pub fn talk_request(credentials: &Credentials) -> Bytes {
    let mut buf = BytesMut::with_capacity(TALK_REQUEST_LEN);
    credentials.put(&mut buf);
    buf.resize(TALK_REQUEST_LEN, 0);
    buf.freeze()
}

pub fn keepalive_request(group_id: u32) -> Bytes {
    Bytes::copy_from_slice(&group_id.to_le_bytes())
}

/// `[len u32 LE][audio]`.
pub fn talk_data(audio: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + audio.len());
    buf.put_u32_le(audio.len() as u32);
    buf.put_slice(audio);
    buf.freeze()
}

/// Result code in the first four bytes of a reply. Zero means success.
pub fn result_code(reply: &[u8]) -> Result<u32> {
    match reply.get(..4) {
        Some(head) => Ok(u32::from_le_bytes([head[0], head[1], head[2], head[3]])),
        None => Err(SessionError::MalformedFrame(format!(
            "reply of {} bytes has no result code",
            reply.len()
        ))),
    }
}
