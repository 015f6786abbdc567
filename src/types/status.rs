//! OPC UA status codes.
//!
//! A status code is a 32-bit value whose two top bits carry the severity
//! (00 = good, 01 = uncertain, 10 = bad). Only the codes the lifecycle
//! controller reacts to are named here; everything else is carried verbatim.

/// OPC UA status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;
    const SEVERITY_BAD: u32 = 0x8000_0000;

    /// Good (0x00000000)
    pub const GOOD: Self = Self(0x0000_0000);
    /// BadUnexpectedError (0x80010000)
    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);
    /// BadInternalError (0x80020000)
    pub const BAD_INTERNAL_ERROR: Self = Self(0x8002_0000);
    /// BadCommunicationError (0x80050000)
    pub const BAD_COMMUNICATION_ERROR: Self = Self(0x8005_0000);
    /// BadTimeout (0x800A0000)
    pub const BAD_TIMEOUT: Self = Self(0x800A_0000);
    /// BadServiceUnsupported (0x800B0000)
    pub const BAD_SERVICE_UNSUPPORTED: Self = Self(0x800B_0000);
    /// BadShutdown (0x800C0000)
    pub const BAD_SHUTDOWN: Self = Self(0x800C_0000);
    /// BadServerNotConnected (0x800D0000)
    pub const BAD_SERVER_NOT_CONNECTED: Self = Self(0x800D_0000);
    /// BadSessionIdInvalid (0x80250000)
    pub const BAD_SESSION_ID_INVALID: Self = Self(0x8025_0000);
    /// BadSessionClosed (0x80260000)
    pub const BAD_SESSION_CLOSED: Self = Self(0x8026_0000);
    /// BadSubscriptionIdInvalid (0x80280000)
    pub const BAD_SUBSCRIPTION_ID_INVALID: Self = Self(0x8028_0000);
    /// BadNodeIdInvalid (0x80330000)
    pub const BAD_NODE_ID_INVALID: Self = Self(0x8033_0000);
    /// BadNodeIdUnknown (0x80340000)
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);
    /// BadTooManySubscriptions (0x80770000)
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: Self = Self(0x8077_0000);
    /// BadDisconnect (0x80AD0000)
    pub const BAD_DISCONNECT: Self = Self(0x80AD_0000);
    /// BadConnectionClosed (0x80AE0000)
    pub const BAD_CONNECTION_CLOSED: Self = Self(0x80AE_0000);
    /// BadTooManyMonitoredItems (0x80DB0000)
    pub const BAD_TOO_MANY_MONITORED_ITEMS: Self = Self(0x80DB_0000);

    /// Get the raw code.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Severity is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        (self.0 & Self::SEVERITY_MASK) == 0
    }

    /// Severity is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        (self.0 & Self::SEVERITY_MASK) == Self::SEVERITY_UNCERTAIN
    }

    /// Severity is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        (self.0 & Self::SEVERITY_MASK) == Self::SEVERITY_BAD
    }

    /// Symbolic name, if the code is one of the named constants.
    pub const fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            0x0000_0000 => "Good",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8005_0000 => "BadCommunicationError",
            0x800A_0000 => "BadTimeout",
            0x800B_0000 => "BadServiceUnsupported",
            0x800C_0000 => "BadShutdown",
            0x800D_0000 => "BadServerNotConnected",
            0x8025_0000 => "BadSessionIdInvalid",
            0x8026_0000 => "BadSessionClosed",
            0x8028_0000 => "BadSubscriptionIdInvalid",
            0x8033_0000 => "BadNodeIdInvalid",
            0x8034_0000 => "BadNodeIdUnknown",
            0x8077_0000 => "BadTooManySubscriptions",
            0x80AD_0000 => "BadDisconnect",
            0x80AE_0000 => "BadConnectionClosed",
            0x80DB_0000 => "BadTooManyMonitoredItems",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u32> for StatusCode {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl std::fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatusCode({})", self)
    }
}
