//! Packet type constants.
//!
//! Values are fixed by the device firmware. Requests flow client → device,
//! replies and data flow device → client. [`KEY_EXCHANGE`] is used in both
//! directions.

/// Start the video stream (main or sub).
pub const VIDEO_START: u32 = 0;

/// Stop the video stream.
pub const VIDEO_STOP: u32 = 1;

/// Open the talk-back (client → device audio) stream.
pub const TALK_START: u32 = 4;

/// Close the talk-back stream.
pub const TALK_STOP: u32 = 5;

/// Encoded talk-back audio.
pub const TALK_DATA: u32 = 6;

/// Session login.
pub const LOGIN: u32 = 12;

/// Periodic keepalive carrying the group id.
pub const KEEPALIVE: u32 = 15;

/// Result of [`VIDEO_START`].
pub const VIDEO_START_REPLY: u32 = 16;

/// Result of [`VIDEO_STOP`].
pub const VIDEO_STOP_REPLY: u32 = 17;

/// Result of [`TALK_START`].
pub const TALK_START_REPLY: u32 = 20;

/// Result of [`TALK_STOP`].
pub const TALK_STOP_REPLY: u32 = 21;

/// Bulk video/audio data. Large payloads are only partially encrypted.
pub const MEDIA_DATA: u32 = 26;

/// Result of [`LOGIN`].
pub const LOGIN_REPLY: u32 = 28;

/// Unsolicited motion-detection event.
pub const MOTION_EVENT: u32 = 29;

/// Result of [`KEEPALIVE`].
pub const KEEPALIVE_REPLY: u32 = 31;

/// RSA public key (outbound) or wrapped AES key (inbound).
pub const KEY_EXCHANGE: u32 = 600;

/// Returns a human-readable name for a packet type.
pub fn packet_name(packet_type: u32) -> &'static str {
    match packet_type {
        VIDEO_START => "VIDEO_START",
        VIDEO_STOP => "VIDEO_STOP",
        TALK_START => "TALK_START",
        TALK_STOP => "TALK_STOP",
        TALK_DATA => "TALK_DATA",
        LOGIN => "LOGIN",
        KEEPALIVE => "KEEPALIVE",
        VIDEO_START_REPLY => "VIDEO_START_REPLY",
        VIDEO_STOP_REPLY => "VIDEO_STOP_REPLY",
        TALK_START_REPLY => "TALK_START_REPLY",
        TALK_STOP_REPLY => "TALK_STOP_REPLY",
        MEDIA_DATA => "MEDIA_DATA",
        LOGIN_REPLY => "LOGIN_REPLY",
        MOTION_EVENT => "MOTION_EVENT",
        KEEPALIVE_REPLY => "KEEPALIVE_REPLY",
        KEY_EXCHANGE => "KEY_EXCHANGE",
        _ => "UNKNOWN",
    }
}

/// Returns true if the packet type carries a `[code u32 LE]` result.
pub fn is_reply(packet_type: u32) -> bool {
    matches!(
        packet_type,
        VIDEO_START_REPLY
            | VIDEO_STOP_REPLY
            | TALK_START_REPLY
            | TALK_STOP_REPLY
            | LOGIN_REPLY
            | KEEPALIVE_REPLY
    )
}
