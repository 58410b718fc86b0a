use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// The plaintext line the device expects before any binary frame.
pub fn preamble(endpoint: &Endpoint) -> String {
    format!(
        "SERVERPUSH / HTTP/1.1\r\nHost: {}\r\nAccept:*/*\r\nConnection: Close\r\n\r\n",
        endpoint.authority()
    )
}

/// Open a TCP connection to the device and send the connection preamble.
///
/// The returned stream is positioned right after the preamble, ready for
/// framed traffic in both directions.
pub async fn connect(endpoint: &Endpoint) -> Result<TcpStream> {
    let addr = endpoint.authority();
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
    stream.set_nodelay(true)?;

    stream.write_all(preamble(endpoint).as_bytes()).await?;
    stream.flush().await?;
    debug!(%addr, "transport connected, preamble sent");

    Ok(stream)
}
