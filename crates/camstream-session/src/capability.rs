use async_trait::async_trait;
use camstream_transport::Endpoint;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{Result, SessionError};

/// Path of the device's software-flag query.
pub const SW_FLAG_PATH: &str = "/cgi-bin/CGIProxy.fcgi?cmd=getSWFlag";

/// Flag bit meaning the stream must be encrypted.
pub const ENCRYPTION_FLAG: u32 = 0x10;

/// Device answer to the software-flag query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub flags: u32,
}

impl Capabilities {
    pub fn encryption_required(&self) -> bool {
        self.flags & ENCRYPTION_FLAG != 0
    }
}

/// Out-of-band query telling the encryption layer whether to negotiate.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn query(&self, endpoint: &Endpoint) -> Result<Capabilities>;
}

/// Asks the device over its HTTP control API.
#[derive(Debug, Clone, Default)]
pub struct HttpCapabilityProbe {
    client: reqwest::Client,
}

impl HttpCapabilityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (timeouts, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn url(endpoint: &Endpoint) -> String {
        format!("http://{}{}", endpoint.authority(), SW_FLAG_PATH)
    }
}

#[async_trait]
impl CapabilityProbe for HttpCapabilityProbe {
    async fn query(&self, endpoint: &Endpoint) -> Result<Capabilities> {
        let failed = |e: reqwest::Error| SessionError::CapabilityQueryFailed(e.to_string());
        let body = self
            .client
            .get(Self::url(endpoint))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?
            .text()
            .await
            .map_err(failed)?;
        let caps = parse_sw_flag(&body)?;
        debug!(%endpoint, flags = caps.flags, "queried device capabilities");
        Ok(caps)
    }
}

/// Always answers with the same capabilities. For devices whose mode is
/// known in advance, and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapabilities(pub Capabilities);

impl FixedCapabilities {
    pub fn plain() -> Self {
        Self(Capabilities { flags: 0 })
    }

    pub fn encrypted() -> Self {
        Self(Capabilities {
            flags: ENCRYPTION_FLAG,
        })
    }
}

#[async_trait]
impl CapabilityProbe for FixedCapabilities {
    async fn query(&self, _endpoint: &Endpoint) -> Result<Capabilities> {
        Ok(self.0)
    }
}

/// Parse `<CGI_Result><result>0</result><flag>0010</flag></CGI_Result>`.
///
/// `result` is decimal and must be zero; `flag` is hexadecimal with an
/// optional `0x` prefix.
pub fn parse_sw_flag(xml: &str) -> Result<Capabilities> {
    let failed = SessionError::CapabilityQueryFailed;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<Vec<u8>> = None;
    let mut result = None;
    let mut flag = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => current = Some(start.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(text)) => {
                let value = std::str::from_utf8(&text)
                    .map_err(|e| failed(e.to_string()))?
                    .trim()
                    .to_string();
                match current.as_deref() {
                    Some(b"result") => result = Some(value),
                    Some(b"flag") => flag = Some(value),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(failed(format!("malformed XML: {e}"))),
        }
    }

    let result = result.ok_or_else(|| failed("missing <result>".to_string()))?;
    let code: i64 = result
        .parse()
        .map_err(|_| failed(format!("unparsable result {result:?}")))?;
    if code != 0 {
        return Err(failed(format!("device returned result {code}")));
    }

    let flag = flag.ok_or_else(|| failed("missing <flag>".to_string()))?;
    let digits = flag
        .strip_prefix("0x")
        .or_else(|| flag.strip_prefix("0X"))
        .unwrap_or(&flag);
    let flags = u32::from_str_radix(digits, 16)
        .map_err(|_| failed(format!("unparsable flag {flag:?}")))?;
    Ok(Capabilities { flags })
}
