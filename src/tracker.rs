//! Channel and session state tracking.
//!
//! The transport reports both states together on every change. The tracker
//! keeps the last reported pair and turns each report into a
//! [`StateTransition`], dropping duplicates so the controller only reacts to
//! real changes.

use tracing::{debug, info, warn};

use crate::types::{ChannelState, SessionState, StatusCode};

/// A change of the (channel, session) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// Channel state before the change
    pub previous_channel: ChannelState,
    /// Session state before the change
    pub previous_session: SessionState,
    /// Channel state after the change
    pub channel: ChannelState,
    /// Session state after the change
    pub session: SessionState,
    /// Recovery status reported with the change
    pub recovery: StatusCode,
}

impl StateTransition {
    /// Check if the channel state changed.
    #[inline]
    pub fn channel_changed(&self) -> bool {
        self.previous_channel != self.channel
    }

    /// Check if the session state changed.
    #[inline]
    pub fn session_changed(&self) -> bool {
        self.previous_session != self.session
    }

    /// The session just became activated.
    #[inline]
    pub fn session_activated(&self) -> bool {
        !self.previous_session.is_activated() && self.session.is_activated()
    }

    /// An activated or establishing session went away.
    #[inline]
    pub fn session_lost(&self) -> bool {
        self.previous_session != SessionState::Closed && self.session == SessionState::Closed
    }
}

/// Last known channel and session state.
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    channel: ChannelState,
    session: SessionState,
    recovery: StatusCode,
    transitions: u64,
}

impl StateTracker {
    /// Create a tracker in the closed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state report from the transport.
    ///
    /// Returns `None` if neither state changed.
    pub fn observe(
        &mut self,
        channel: ChannelState,
        session: SessionState,
        recovery: StatusCode,
    ) -> Option<StateTransition> {
        self.recovery = recovery;
        if channel == self.channel && session == self.session {
            debug!(%channel, %session, "duplicate state report");
            return None;
        }

        let transition = StateTransition {
            previous_channel: self.channel,
            previous_session: self.session,
            channel,
            session,
            recovery,
        };
        self.channel = channel;
        self.session = session;
        self.transitions += 1;

        if transition.channel_changed() {
            info!(%channel, "{}", channel.describe());
        }
        if transition.session_changed() {
            match session {
                SessionState::Activated => info!("a session with the server is activated"),
                SessionState::Closed => info!("session disconnected"),
                other => debug!(session = %other, "session state changed"),
            }
        }
        if !recovery.is_good() {
            warn!(%recovery, "connection status");
        }

        Some(transition)
    }

    /// Current channel state.
    #[inline]
    pub fn channel(&self) -> ChannelState {
        self.channel
    }

    /// Current session state.
    #[inline]
    pub fn session(&self) -> SessionState {
        self.session
    }

    /// Recovery status of the last report.
    #[inline]
    pub fn recovery(&self) -> StatusCode {
        self.recovery
    }

    /// Number of real transitions observed so far.
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// The session is activated.
    #[inline]
    pub fn session_activated(&self) -> bool {
        self.session.is_activated()
    }

    /// Both channel and session are closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.channel == ChannelState::Closed && self.session == SessionState::Closed
    }
}
