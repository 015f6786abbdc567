//! Service requests and responses exchanged with the transport.
//!
//! These are the decoded forms only; encoding is the transport's business.

use std::time::Duration;

use super::{DataValue, NodeId, StatusCode};

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Services the lifecycle controller issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    CreateSubscription,
    CreateMonitoredItems,
    DeleteSubscriptions,
    Read,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreateSubscription => "CreateSubscription",
            Self::CreateMonitoredItems => "CreateMonitoredItems",
            Self::DeleteSubscriptions => "DeleteSubscriptions",
            Self::Read => "Read",
        };
        f.write_str(name)
    }
}

/// Default requested publishing interval in milliseconds.
pub const DEFAULT_PUBLISHING_INTERVAL_MS: f64 = 500.0;

/// Default requested lifetime count.
pub const DEFAULT_LIFETIME_COUNT: u32 = 10_000;

/// Default requested max keep-alive count.
pub const DEFAULT_MAX_KEEP_ALIVE_COUNT: u32 = 10;

/// Default sampling interval for monitored items in milliseconds.
pub const DEFAULT_SAMPLING_INTERVAL_MS: f64 = 250.0;

/// Default monitored item queue size.
pub const DEFAULT_QUEUE_SIZE: u32 = 1;

/// Requested subscription parameters (the server may revise them).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionParams {
    /// Requested publishing interval in milliseconds
    pub publishing_interval_ms: f64,
    /// Requested lifetime count
    pub lifetime_count: u32,
    /// Requested max keep-alive count
    pub max_keep_alive_count: u32,
    /// Max notifications per publish (0 = unlimited)
    pub max_notifications_per_publish: u32,
    /// Publishing enabled
    pub publishing_enabled: bool,
    /// Relative priority
    pub priority: u8,
}

impl Default for SubscriptionParams {
    fn default() -> Self {
        Self {
            publishing_interval_ms: DEFAULT_PUBLISHING_INTERVAL_MS,
            lifetime_count: DEFAULT_LIFETIME_COUNT,
            max_keep_alive_count: DEFAULT_MAX_KEEP_ALIVE_COUNT,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }
}

impl SubscriptionParams {
    /// Time without a publish response after which the subscription is
    /// considered inactive: publishing interval times max keep-alive count.
    pub fn inactivity_timeout(&self) -> Duration {
        let ms = self.publishing_interval_ms * f64::from(self.max_keep_alive_count);
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }
}

/// Monitoring mode of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitoringMode {
    Disabled,
    Sampling,
    #[default]
    Reporting,
}

/// Parameters for creating one monitored item on the value attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemParams {
    /// Node to monitor
    pub node_id: NodeId,
    /// Requested sampling interval in milliseconds
    pub sampling_interval_ms: f64,
    /// Server-side queue size
    pub queue_size: u32,
    /// Discard the oldest value when the queue is full
    pub discard_oldest: bool,
    /// Monitoring mode
    pub mode: MonitoringMode,
    /// Client-chosen handle echoed in notifications
    pub client_handle: u32,
}

impl MonitoredItemParams {
    /// Default monitored item for a node: 250 ms sampling, queue of one,
    /// discard oldest, reporting.
    pub fn default_for(node_id: NodeId, client_handle: u32) -> Self {
        Self {
            node_id,
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            queue_size: DEFAULT_QUEUE_SIZE,
            discard_oldest: true,
            mode: MonitoringMode::Reporting,
            client_handle,
        }
    }

    /// Override the sampling interval.
    pub fn sampling_interval(mut self, ms: f64) -> Self {
        self.sampling_interval_ms = ms;
        self
    }
}

/// Service request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    /// Create a subscription
    CreateSubscription(SubscriptionParams),
    /// Create one monitored item in a subscription
    CreateMonitoredItem {
        subscription_id: u32,
        item: MonitoredItemParams,
    },
    /// Delete a subscription
    DeleteSubscription { subscription_id: u32 },
    /// Read the value attribute of a node
    Read { node_id: NodeId },
}

impl ServiceRequest {
    /// Service this request belongs to.
    pub const fn service(&self) -> Service {
        match self {
            Self::CreateSubscription(_) => Service::CreateSubscription,
            Self::CreateMonitoredItem { .. } => Service::CreateMonitoredItems,
            Self::DeleteSubscription { .. } => Service::DeleteSubscriptions,
            Self::Read { .. } => Service::Read,
        }
    }
}

/// Service response delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse {
    CreateSubscription {
        /// Service result from the response header
        service_result: StatusCode,
        subscription_id: u32,
        revised_publishing_interval_ms: f64,
        revised_lifetime_count: u32,
        revised_max_keep_alive_count: u32,
    },
    CreateMonitoredItem {
        service_result: StatusCode,
        /// Per-item result
        status: StatusCode,
        monitored_item_id: u32,
        revised_sampling_interval_ms: f64,
    },
    DeleteSubscription {
        service_result: StatusCode,
        /// Per-subscription result
        status: StatusCode,
    },
    Read {
        service_result: StatusCode,
        value: DataValue,
    },
    /// The server answered with a ServiceFault
    ServiceFault { service_result: StatusCode },
}

impl ServiceResponse {
    /// Service result from the response header.
    pub const fn service_result(&self) -> StatusCode {
        match self {
            Self::CreateSubscription { service_result, .. }
            | Self::CreateMonitoredItem { service_result, .. }
            | Self::DeleteSubscription { service_result, .. }
            | Self::Read { service_result, .. }
            | Self::ServiceFault { service_result } => *service_result,
        }
    }
}
