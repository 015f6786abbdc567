//! Server endpoint address.

use url::Url;

use crate::error::{OpcUaError, Result};

/// Default OPC UA port.
pub const DEFAULT_PORT: u16 = 4840;

const SCHEMES: [&str; 3] = ["opc.tcp", "opc.wss", "opc.https"];

/// Validated endpoint URL, e.g. `opc.tcp://m3:48400/UA/ComServerWrapper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse and validate an endpoint URL.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| OpcUaError::InvalidEndpoint(format!("{}: {}", s, e)))?;

        if !SCHEMES.contains(&url.scheme()) {
            return Err(OpcUaError::InvalidEndpoint(format!(
                "{}: unsupported scheme '{}'",
                s,
                url.scheme()
            )));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => {
                return Err(OpcUaError::InvalidEndpoint(format!("{}: missing host", s)));
            }
        }

        Ok(Self { url })
    }

    /// URL scheme.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port, falling back to [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or(DEFAULT_PORT)
    }

    /// Path component (may be empty or `/`).
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Full URL string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
