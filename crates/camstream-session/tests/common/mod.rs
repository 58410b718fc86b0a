//! Scripted fake camera for session tests.

#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use camstream_crypto::{wrap_session_key, SessionCipher};
use camstream_frame::packet::{KEY_EXCHANGE, MEDIA_DATA, TALK_START};
use camstream_frame::{encode_frame, Frame, FrameCodec};
use camstream_session::SessionConfig;
use camstream_transport::{preamble, Endpoint};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_util::codec::FramedRead;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEVICE_KEY: [u8; 16] = *b"0123456789ABCDEF";

pub struct FakeDevice {
    listener: TcpListener,
    pub endpoint: Endpoint,
}

impl FakeDevice {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("device should bind");
        let port = listener.local_addr().expect("bound address").port();
        Self {
            listener,
            endpoint: Endpoint::new("127.0.0.1", port),
        }
    }

    /// Config pointing at this device with the background keepalive off.
    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.endpoint.host.clone())
            .with_credentials("admin", "s3cret");
        config.port = self.endpoint.port;
        config.keepalive_interval_ms = 0;
        config
    }

    /// Accept one client and consume its preamble.
    pub async fn accept(&self) -> DeviceConn {
        let (mut socket, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client should connect in time")
            .expect("accept should succeed");
        let mut buf = vec![0u8; preamble(&self.endpoint).len()];
        socket
            .read_exact(&mut buf)
            .await
            .expect("preamble should arrive");
        assert_eq!(buf, preamble(&self.endpoint).as_bytes());

        let (read_half, write_half) = socket.into_split();
        DeviceConn {
            frames: FramedRead::new(read_half, FrameCodec::new()),
            writer: write_half,
            cipher: None,
        }
    }
}

pub struct DeviceConn {
    frames: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: OwnedWriteHalf,
    cipher: Option<SessionCipher>,
}

impl DeviceConn {
    /// Next frame exactly as it crossed the wire.
    pub async fn recv_raw(&mut self) -> Frame {
        tokio::time::timeout(STEP_TIMEOUT, self.frames.next())
            .await
            .expect("frame should arrive in time")
            .expect("client should not hang up")
            .expect("frame should decode")
    }

    /// Next raw frame, or `None` once the client has hung up.
    pub async fn recv_or_eof(&mut self) -> Option<Frame> {
        tokio::time::timeout(STEP_TIMEOUT, self.frames.next())
            .await
            .expect("client should send or hang up in time")
            .map(|frame| frame.expect("frame should decode"))
    }

    /// Next frame, decrypted the way the device firmware would.
    pub async fn recv(&mut self) -> Frame {
        let frame = self.recv_raw().await;
        let Some(cipher) = &self.cipher else {
            return frame;
        };
        let decrypted = if frame.packet_type == TALK_START {
            cipher.decrypt_some(&frame.payload)
        } else {
            cipher.decrypt_all(&frame.payload)
        };
        let plain = decrypted.expect("client ciphertext should decrypt");
        Frame::new(frame.packet_type, plain)
    }

    /// Receive a frame and check its type.
    pub async fn expect(&mut self, packet_type: u32) -> Frame {
        let frame = self.recv().await;
        assert_eq!(
            frame.packet_type,
            packet_type,
            "expected {} got {}",
            camstream_frame::packet::packet_name(packet_type),
            frame.name()
        );
        frame
    }

    /// Write a frame without any encryption.
    pub async fn send_raw(&mut self, packet_type: u32, payload: &[u8]) {
        let mut wire = BytesMut::new();
        encode_frame(packet_type, payload, &mut wire).expect("frame should encode");
        self.writer
            .write_all(&wire)
            .await
            .expect("device write should succeed");
    }

    /// Write a frame, encrypted the way the device firmware would.
    pub async fn send(&mut self, packet_type: u32, payload: &[u8]) {
        let payload = match &self.cipher {
            None => payload.to_vec(),
            Some(cipher) if packet_type == MEDIA_DATA && payload.len() > 128 => {
                cipher.encrypt_some(payload)
            }
            Some(cipher) => cipher.encrypt_all(payload),
        };
        self.send_raw(packet_type, &payload).await;
    }

    pub async fn reply(&mut self, packet_type: u32, code: u32) {
        self.send(packet_type, &code.to_le_bytes()).await;
    }

    /// Receive the client's public key and return the PKCS#1 DER bytes.
    pub async fn recv_public_key(&mut self) -> Vec<u8> {
        let frame = self.expect(KEY_EXCHANGE).await;
        let payload = frame.payload;
        assert_eq!(&payload[0..4], &[0, 0, 0, 0]);
        let der_len = u32::from_le_bytes(payload[4..8].try_into().expect("length field")) as usize;
        assert_eq!(&payload[8..12], &[0, 0, 0, 0]);
        assert_eq!(payload.len(), 12 + der_len);
        payload[12..].to_vec()
    }

    /// Run the device side of the key exchange with [`DEVICE_KEY`].
    pub async fn negotiate(&mut self) {
        let der = self.recv_public_key().await;
        let wrapped = wrap_session_key(&der, &DEVICE_KEY).expect("key should wrap");
        self.send_raw(KEY_EXCHANGE, &wrapped).await;
        self.cipher = Some(SessionCipher::new(DEVICE_KEY));
    }

    /// Hang up on the client.
    pub async fn hang_up(self) {
        let mut writer = self.writer;
        let _ = writer.shutdown().await;
        drop(self.frames);
    }
}
