//! Secure channel and session states reported by the transport.

/// Secure channel state.
///
/// Ordered from closed to fully open; the ordering is used to check that a
/// connection attempt only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ChannelState {
    /// No channel
    #[default]
    Closed,
    /// HEL message sent, waiting for ACK
    HandshakeSent,
    /// OPN request sent, waiting for the response
    OpenRequestSent,
    /// Secure channel established
    Open,
}

impl ChannelState {
    /// Check if the channel is open.
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Human readable description, used in log lines.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Closed => "the client is disconnected",
            Self::HandshakeSent => "waiting for ack",
            Self::OpenRequestSent => "waiting for OPN response",
            Self::Open => "a secure channel to the server is open",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::HandshakeSent => "HandshakeSent",
            Self::OpenRequestSent => "OpenRequestSent",
            Self::Open => "Open",
        };
        f.write_str(name)
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SessionState {
    /// No session
    #[default]
    Closed,
    /// CreateSession sent
    CreateRequested,
    /// ActivateSession sent
    Activating,
    /// Session usable for service calls
    Activated,
    /// CloseSession sent
    Closing,
}

impl SessionState {
    /// Check if the session is activated.
    #[inline]
    pub const fn is_activated(&self) -> bool {
        matches!(self, Self::Activated)
    }

    /// Check if the session is being established.
    #[inline]
    pub const fn is_establishing(&self) -> bool {
        matches!(self, Self::CreateRequested | Self::Activating)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::CreateRequested => "CreateRequested",
            Self::Activating => "Activating",
            Self::Activated => "Activated",
            Self::Closing => "Closing",
        };
        f.write_str(name)
    }
}
