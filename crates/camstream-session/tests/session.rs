mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camstream_crypto::{encrypt_raw, SessionCipher};
use camstream_frame::packet::{
    KEEPALIVE, KEEPALIVE_REPLY, KEY_EXCHANGE, LOGIN, LOGIN_REPLY, MEDIA_DATA, MOTION_EVENT,
    TALK_DATA, TALK_START, TALK_START_REPLY, TALK_STOP, TALK_STOP_REPLY, VIDEO_START,
    VIDEO_START_REPLY, VIDEO_STOP, VIDEO_STOP_REPLY,
};
use camstream_session::{
    AudioCodec, Capabilities, CapabilityProbe, CodecError, EncryptionState, FixedCapabilities,
    Session, SessionError, SessionEvent, SessionState, StreamKind, StreamState,
};
use camstream_transport::Endpoint;
use common::{FakeDevice, DEVICE_KEY};
use tokio::sync::{broadcast, oneshot};

fn plain_session(device: &FakeDevice) -> Session {
    Session::with_parts(device.config(), Arc::new(FixedCapabilities::plain()), None)
}

fn encrypted_session(device: &FakeDevice) -> Session {
    Session::with_parts(
        device.config(),
        Arc::new(FixedCapabilities::encrypted()),
        None,
    )
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event channel should stay open")
}

#[tokio::test]
async fn plain_device_logs_in() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let group_id = session.group_id();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        let login = conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        (login, conn)
    });

    session.connect().await.expect("login should succeed");
    let (login, _conn) = script.await.unwrap();

    assert_eq!(login.payload.len(), 161);
    assert_eq!(login.payload[0], 0);
    assert_eq!(&login.payload[1..6], b"admin");
    assert_eq!(&login.payload[65..71], b"s3cret");
    assert_eq!(&login.payload[129..133], &group_id.to_le_bytes());
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(session.encryption_state(), EncryptionState::PlainConfirmed);
    assert!(!session.is_encrypted());
}

#[tokio::test]
async fn encrypted_device_negotiates_before_login() {
    let device = FakeDevice::bind().await;
    let session = encrypted_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.negotiate().await;
        let login = conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        (login, conn)
    });

    session.connect().await.expect("login should succeed");
    let (login, _conn) = script.await.unwrap();

    // Full encryption pads the 161-byte request to a block boundary.
    assert_eq!(login.payload.len(), 176);
    assert_eq!(&login.payload[1..6], b"admin");
    assert!(login.payload[161..].iter().all(|b| *b == 0));
    assert!(session.is_encrypted());
    assert_eq!(session.encryption_state(), EncryptionState::Ready);
}

#[tokio::test]
async fn rejected_login_can_be_retried() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 7).await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn
    });

    assert_eq!(
        session.connect().await.unwrap_err(),
        SessionError::LoginRejected { code: 7 }
    );
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().await.expect("second login should succeed");
    assert_eq!(session.state(), SessionState::LoggedIn);
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn bad_key_padding_fails_connect() {
    let device = FakeDevice::bind().await;
    let session = encrypted_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        let der = conn.recv_public_key().await;
        let mut block = vec![0u8; 64];
        block[0] = 0x01;
        block[4] = 16;
        block[8..24].copy_from_slice(&DEVICE_KEY);
        let wrapped = encrypt_raw(&der, &block).unwrap();
        conn.send_raw(KEY_EXCHANGE, &wrapped).await;
        conn
    });

    assert_eq!(
        session.connect().await.unwrap_err(),
        SessionError::BadKeyPadding
    );
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.encryption_state(), EncryptionState::Unnegotiated);
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn short_wrapped_key_fails_connect() {
    let device = FakeDevice::bind().await;
    let session = encrypted_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        let der = conn.recv_public_key().await;
        let mut block = vec![0u8; 64];
        block[4] = 100;
        let wrapped = encrypt_raw(&der, &block).unwrap();
        conn.send_raw(KEY_EXCHANGE, &wrapped).await;
        conn
    });

    assert_eq!(
        session.connect().await.unwrap_err(),
        SessionError::KeyTooShort {
            declared: 100,
            available: 56
        }
    );
    let _conn = script.await.unwrap();
}

struct Unreachable;

#[async_trait]
impl CapabilityProbe for Unreachable {
    async fn query(&self, _endpoint: &Endpoint) -> camstream_session::Result<Capabilities> {
        Err(SessionError::CapabilityQueryFailed(
            "device returned result -1".to_string(),
        ))
    }
}

#[tokio::test]
async fn capability_failure_fails_connect() {
    let device = FakeDevice::bind().await;
    let session = Session::with_parts(device.config(), Arc::new(Unreachable), None);

    assert!(matches!(
        session.connect().await,
        Err(SessionError::CapabilityQueryFailed(_))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn concurrent_connects_share_one_login() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        // A duplicate login would show up here instead.
        conn.expect(KEEPALIVE).await;
        conn.reply(KEEPALIVE_REPLY, 0).await;
        conn
    });

    let (first, second) = tokio::join!(session.connect(), session.connect());
    first.unwrap();
    second.unwrap();
    session.keepalive().await.unwrap();
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn close_fails_outstanding_keepalive() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let (seen_tx, seen_rx) = oneshot::channel();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn.expect(KEEPALIVE).await;
        let _ = seen_tx.send(());
        conn
    });

    session.connect().await.unwrap();
    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.keepalive().await }
    });
    seen_rx.await.unwrap();

    session.close().await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("keepalive should not hang")
        .unwrap();
    assert_eq!(outcome.unwrap_err(), SessionError::ConnectionClosed);

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.connect().await.unwrap_err(),
        SessionError::AlreadyClosed
    );
    session.close().await;
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn rejected_keepalive_is_not_fatal() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn.expect(KEEPALIVE).await;
        conn.reply(KEEPALIVE_REPLY, 3).await;
        conn.expect(KEEPALIVE).await;
        conn.reply(KEEPALIVE_REPLY, 0).await;
        conn
    });

    assert_eq!(
        session.keepalive().await.unwrap_err(),
        SessionError::KeepAliveRejected { code: 3 }
    );
    assert_eq!(session.state(), SessionState::LoggedIn);
    session.keepalive().await.unwrap();
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn background_keepalive_keeps_running_after_failure() {
    let device = FakeDevice::bind().await;
    let mut config = device.config();
    config.keepalive_interval_ms = 50;
    let session = Session::with_parts(config, Arc::new(FixedCapabilities::plain()), None);
    let group_id = session.group_id();
    let mut events = session.subscribe();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        let first = conn.expect(KEEPALIVE).await;
        conn.reply(KEEPALIVE_REPLY, 9).await;
        let second = conn.expect(KEEPALIVE).await;
        conn.reply(KEEPALIVE_REPLY, 0).await;
        (first, second, conn)
    });

    session.connect().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::KeepAliveFailed(SessionError::KeepAliveRejected { code: 9 })
    );

    let (first, second, _conn) = script.await.unwrap();
    assert_eq!(first.payload.as_ref(), &group_id.to_le_bytes());
    assert_eq!(second.payload.as_ref(), &group_id.to_le_bytes());
    session.close().await;
}

#[tokio::test]
async fn video_stream_lifecycle_with_media_and_motion() {
    let device = FakeDevice::bind().await;
    let session = encrypted_session(&device);
    let mut events = session.subscribe();
    let mut media_rx = session.subscribe_media();
    let media: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    let sent_media = media.clone();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.negotiate().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;

        let start = conn.expect(VIDEO_START).await;
        conn.reply(VIDEO_START_REPLY, 0).await;
        conn.send(MEDIA_DATA, &sent_media).await;
        conn.send(MOTION_EVENT, b"motion").await;

        let stop = conn.expect(VIDEO_STOP).await;
        conn.reply(VIDEO_STOP_REPLY, 0).await;
        (start, stop, conn)
    });

    // No explicit connect: stream operations connect on demand.
    session.start_video_stream(false).await.unwrap();
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Active);
    // Already active: nothing is sent.
    session.start_video_stream(false).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), media_rx.recv())
        .await
        .expect("media should arrive in time")
        .unwrap();
    assert_eq!(received.as_ref(), media.as_slice());
    match next_event(&mut events).await {
        SessionEvent::Motion(payload) => assert!(payload.starts_with(b"motion")),
        other => panic!("expected motion event, got {other:?}"),
    }

    session.stop_video_stream().await.unwrap();
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Idle);
    // Stopping an idle stream is a no-op.
    session.stop_video_stream().await.unwrap();

    let (start, stop, _conn) = script.await.unwrap();
    assert_eq!(start.payload[0], 1);
    assert_eq!(stop.payload[0], 1);
}

#[tokio::test]
async fn talk_stream_uses_partial_cipher_and_recovers_from_rejection() {
    let device = FakeDevice::bind().await;
    let session = encrypted_session(&device);
    let group_id = session.group_id();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.negotiate().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;

        let raw = conn.recv_raw().await;
        conn.reply(TALK_START_REPLY, 2).await;
        conn.expect(TALK_START).await;
        conn.reply(TALK_START_REPLY, 0).await;

        let data = conn.expect(TALK_DATA).await;
        conn.expect(TALK_STOP).await;
        conn.reply(TALK_STOP_REPLY, 0).await;
        (raw, data, conn)
    });

    assert_eq!(
        session.start_talk_stream().await.unwrap_err(),
        SessionError::StreamRejected { code: 2 }
    );
    assert_eq!(session.stream_state(StreamKind::Talk), StreamState::Idle);

    session.start_talk_stream().await.unwrap();
    assert_eq!(session.stream_state(StreamKind::Talk), StreamState::Active);

    session.send_talk_data(b"abc", false).await.unwrap();
    assert_eq!(
        session.send_talk_data(b"abcd", true).await.unwrap_err(),
        SessionError::CodecUnavailable
    );
    session.stop_talk_stream().await.unwrap();
    assert_eq!(session.stream_state(StreamKind::Talk), StreamState::Idle);

    let (raw, data, _conn) = script.await.unwrap();
    assert_eq!(raw.packet_type, TALK_START);
    // Only the first 128 bytes are encrypted; the group id stays in clear.
    assert_eq!(raw.payload.len(), 160);
    assert_eq!(&raw.payload[128..132], &group_id.to_le_bytes());
    let plain = SessionCipher::new(DEVICE_KEY)
        .decrypt_some(&raw.payload)
        .unwrap();
    assert_eq!(&plain[..5], b"admin");
    assert_eq!(&plain[64..70], b"s3cret");

    assert_eq!(&data.payload[..7], b"\x03\x00\x00\x00abc");
}

/// Keeps every other byte.
struct Decimate;

impl AudioCodec for Decimate {
    fn encode(&self, pcm: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(pcm.iter().step_by(2).copied().collect())
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(encoded.iter().flat_map(|b| [*b, *b]).collect())
    }
}

#[tokio::test]
async fn talk_data_runs_through_codec() {
    let device = FakeDevice::bind().await;
    let session = Session::with_parts(
        device.config(),
        Arc::new(FixedCapabilities::plain()),
        Some(Arc::new(Decimate)),
    );

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        let data = conn.expect(TALK_DATA).await;
        (data, conn)
    });

    session.send_talk_data(&[1, 2, 3, 4], true).await.unwrap();
    let (data, _conn) = script.await.unwrap();
    assert_eq!(data.payload.as_ref(), &[2, 0, 0, 0, 1, 3]);
}

#[tokio::test]
async fn concurrent_stream_requests_are_busy() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let (seen_tx, seen_rx) = oneshot::channel();
    let (go_tx, go_rx) = oneshot::channel::<()>();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn.expect(VIDEO_START).await;
        let _ = seen_tx.send(());
        go_rx.await.unwrap();
        conn.reply(VIDEO_START_REPLY, 0).await;
        conn
    });

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.start_video_stream(true).await }
    });
    seen_rx.await.unwrap();

    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Starting);
    assert_eq!(
        session.start_video_stream(true).await.unwrap_err(),
        SessionError::StreamBusy(StreamKind::Video)
    );
    assert_eq!(
        session.stop_video_stream().await.unwrap_err(),
        SessionError::StreamBusy(StreamKind::Video)
    );

    go_tx.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Active);
    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn cancelled_stream_requests_roll_back() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let (late_tx, late_rx) = oneshot::channel::<()>();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;

        conn.expect(VIDEO_START).await;
        seen_tx.send(VIDEO_START).unwrap();
        late_rx.await.unwrap();
        // Answer to the abandoned request; the caller is long gone.
        conn.reply(VIDEO_START_REPLY, 0).await;

        conn.expect(VIDEO_START).await;
        conn.reply(VIDEO_START_REPLY, 0).await;

        conn.expect(VIDEO_STOP).await;
        seen_tx.send(VIDEO_STOP).unwrap();
        conn
    });

    session.connect().await.unwrap();

    let start = tokio::spawn({
        let session = session.clone();
        async move { session.start_video_stream(true).await }
    });
    assert_eq!(seen_rx.recv().await, Some(VIDEO_START));
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Starting);
    start.abort();
    assert!(start.await.unwrap_err().is_cancelled());
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Idle);

    late_tx.send(()).unwrap();
    session
        .start_video_stream(true)
        .await
        .expect("retry after cancellation should not be busy");
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Active);

    let stop = tokio::spawn({
        let session = session.clone();
        async move { session.stop_video_stream().await }
    });
    assert_eq!(seen_rx.recv().await, Some(VIDEO_STOP));
    stop.abort();
    assert!(stop.await.unwrap_err().is_cancelled());
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Active);

    let _conn = script.await.unwrap();
}

#[tokio::test]
async fn motion_events_survive_a_media_burst() {
    let device = FakeDevice::bind().await;
    let mut config = device.config();
    config.media_capacity = 8;
    let session = Session::with_parts(config, Arc::new(FixedCapabilities::plain()), None);
    let mut events = session.subscribe();
    let mut media = session.subscribe_media();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn.send(MOTION_EVENT, b"first").await;
        for _ in 0..300 {
            conn.send(MEDIA_DATA, &[7u8; 64]).await;
        }
        conn.send(MOTION_EVENT, b"last").await;
        conn
    });

    session.connect().await.unwrap();
    let _conn = script.await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Motion(b"first".as_slice().into())
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Motion(b"last".as_slice().into())
    );

    // Only the media subscriber fell behind.
    assert!(matches!(
        media.recv().await,
        Err(broadcast::error::RecvError::Lagged(292))
    ));
    assert_eq!(media.recv().await.unwrap().as_ref(), &[7u8; 64]);
}

#[tokio::test]
async fn silent_device_keepalive_times_out_without_piling_up() {
    let device = FakeDevice::bind().await;
    let mut config = device.config();
    config.keepalive_interval_ms = 20;
    let period = Duration::from_millis(20);
    let session = Session::with_parts(config, Arc::new(FixedCapabilities::plain()), None);
    let mut events = session.subscribe();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        // Never answer; count keepalives until the client hangs up.
        let mut keepalives = 0;
        while let Some(frame) = conn.recv_or_eof().await {
            assert_eq!(frame.packet_type, KEEPALIVE);
            keepalives += 1;
        }
        keepalives
    });

    session.connect().await.unwrap();
    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::KeepAliveFailed(SessionError::KeepAliveTimeout(period))
        );
    }
    let elapsed = started.elapsed();

    // Dropping the last handle stops the loop and releases the socket even
    // with a keepalive outstanding.
    drop(session);
    let keepalives = script.await.unwrap();

    // About one keepalive per period: each waits out its timeout before the
    // next goes out.
    assert!(keepalives >= 3);
    assert!(
        keepalives as u128 <= elapsed.as_millis() / period.as_millis() + 3,
        "{keepalives} keepalives in {elapsed:?}"
    );
}

#[tokio::test]
async fn device_hang_up_fails_waiters_and_publishes_close() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let mut events = session.subscribe();

    let script = tokio::spawn(async move {
        let mut conn = device.accept().await;
        conn.expect(LOGIN).await;
        conn.reply(LOGIN_REPLY, 0).await;
        conn.expect(VIDEO_START).await;
        conn.hang_up().await;
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.start_video_stream(true))
        .await
        .expect("stream start should not hang");
    assert_eq!(outcome.unwrap_err(), SessionError::ConnectionClosed);
    script.await.unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.stream_state(StreamKind::Video), StreamState::Idle);
    assert_eq!(
        session.keepalive().await.unwrap_err(),
        SessionError::ConnectionClosed
    );
}

#[tokio::test]
async fn close_before_connect() {
    let device = FakeDevice::bind().await;
    let session = plain_session(&device);
    let mut events = session.subscribe();

    session.close().await;
    session.close().await;

    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);
    assert!(events.try_recv().is_err());
    assert_eq!(
        session.start_talk_stream().await.unwrap_err(),
        SessionError::AlreadyClosed
    );
}
