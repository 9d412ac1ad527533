//! Stream session bookkeeping

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Camera source address, treated as an opaque connection string.
///
/// `Display` never prints credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamSource {
    uri: String,
}

impl StreamSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Full URI including credentials, for the transport only
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URI with any `user:password@` section replaced
    pub fn redacted(&self) -> String {
        let (scheme, rest) = match self.uri.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, self.uri.as_str()),
        };
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let rest = match rest[..authority_end].rfind('@') {
            Some(at) => format!("***@{}", &rest[at + 1..]),
            None => rest.to_string(),
        };
        match scheme {
            Some(scheme) => format!("{scheme}://{rest}"),
            None => rest,
        }
    }

    /// Host part of the URI, if one can be found
    pub fn host(&self) -> Option<&str> {
        let rest = self.uri.split_once("://").map_or(self.uri.as_str(), |(_, r)| r);
        let authority = rest.split('/').next()?;
        let host_port = authority.rsplit('@').next()?;
        let host = host_port.split(':').next()?;
        (!host.is_empty()).then_some(host)
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamSource").field(&self.redacted()).finish()
    }
}

/// One continuous attempt to read a camera source
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// Session identifier (for logs)
    pub id: Uuid,
    /// Camera source
    pub source: StreamSource,
    /// Current connection state
    pub state: ConnectionState,
    /// Consecutive read failures
    pub consecutive_failures: u32,
    /// When the last frame was delivered
    pub last_frame_at: Option<Instant>,
    /// Transports established during the session, including reconnects
    pub connections: u32,
}

impl StreamSession {
    pub fn new(source: StreamSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            last_frame_at: None,
            connections: 0,
        }
    }
}
