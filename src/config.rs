//! Controller configuration.

use std::time::Duration;

use crate::types::SubscriptionParams;

/// Default pump timeout during normal operation in milliseconds.
pub const DEFAULT_PUMP_TIMEOUT_MS: u64 = 1000;

/// Default pump timeout while draining in milliseconds.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 100;

/// Default bound on pump iterations while draining.
pub const DEFAULT_MAX_DRAIN_ITERATIONS: u32 = 50;

/// Default first reconnect delay in seconds.
pub const DEFAULT_RETRY_INITIAL_SECS: u64 = 1;

/// Default longest reconnect delay in seconds.
pub const DEFAULT_RETRY_MAX_SECS: u64 = 30;

/// Default capacity of the controller event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// When to call `connect` again after a failed or lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry on every run-loop iteration
    Immediate,
    /// Exponential backoff: `initial`, doubled per failure, capped at `max`
    Backoff { initial: Duration, max: Duration },
    /// Never retry; stay disconnected until stopped
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Backoff {
            initial: Duration::from_secs(DEFAULT_RETRY_INITIAL_SECS),
            max: Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    /// (at least 1). `None` means no further attempt.
    pub fn delay(&self, failures: u32) -> Option<Duration> {
        match self {
            Self::Immediate => Some(Duration::ZERO),
            Self::Never => None,
            Self::Backoff { initial, max } => {
                let exponent = failures.saturating_sub(1).min(16);
                let delay = initial.saturating_mul(1u32 << exponent);
                Some(delay.min(*max))
            }
        }
    }
}

/// What the controller does once the session is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// Subscribe and monitor indefinitely
    #[default]
    Monitor,
    /// Read every registered node once, then shut down
    ReadOnce,
}

/// Lifecycle controller configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint URL (e.g. `opc.tcp://host:4840/path`)
    pub endpoint: String,
    /// Pump timeout during normal operation
    pub pump_timeout: Duration,
    /// Pump timeout while draining
    pub drain_timeout: Duration,
    /// Maximum pump iterations while draining before giving up
    pub max_drain_iterations: u32,
    /// Reconnect policy
    pub retry: RetryPolicy,
    /// Monitor or read once
    pub mode: OperatingMode,
    /// Requested subscription parameters
    pub subscription: SubscriptionParams,
    /// Capacity of the controller event channel
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Create a new configuration with the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            pump_timeout: Duration::from_millis(DEFAULT_PUMP_TIMEOUT_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
            max_drain_iterations: DEFAULT_MAX_DRAIN_ITERATIONS,
            retry: RetryPolicy::default(),
            mode: OperatingMode::default(),
            subscription: SubscriptionParams::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the pump timeout.
    pub fn pump_timeout(mut self, timeout: Duration) -> Self {
        self.pump_timeout = timeout;
        self
    }

    /// Set the drain pump timeout.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the drain iteration bound.
    pub fn max_drain_iterations(mut self, iterations: u32) -> Self {
        self.max_drain_iterations = iterations;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the operating mode.
    pub fn mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the subscription parameters.
    pub fn subscription(mut self, params: SubscriptionParams) -> Self {
        self.subscription = params;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
