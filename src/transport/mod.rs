//! Transport stack interface.
//!
//! The transport owns socket I/O, message framing and security. The
//! lifecycle controller only sees decoded requests, responses and
//! notifications through the [`Transport`] trait.
//!
//! All protocol work advances inside [`Transport::pump`]. Whatever completed
//! during the pump (state changes, service responses, data changes,
//! inactivity) is returned as an ordered list of [`TransportEvent`]s, which
//! the controller handles before pumping again. A transport is expected to
//! re-establish a lost channel on its own while pumping, the way
//! `run_iterate`-style client stacks do.

pub mod sim;

use std::time::Duration;

use crate::error::Result;
use crate::types::{
    ChannelState, DataValue, Endpoint, RequestId, ServiceRequest, ServiceResponse, SessionState,
    StatusCode,
};

/// Something that happened inside a pump call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Channel and/or session state changed. Both values are always
    /// delivered together.
    StateChanged {
        channel: ChannelState,
        session: SessionState,
        /// Status of the last connection attempt or loss
        recovery: StatusCode,
    },
    /// Response to an earlier [`Transport::send`]
    Response {
        request_id: RequestId,
        response: ServiceResponse,
    },
    /// Data-change notification for a monitored item
    DataChange {
        subscription_id: u32,
        monitored_item_id: u32,
        value: DataValue,
    },
    /// No publish response arrived within the keep-alive window
    Inactivity { subscription_id: u32 },
    /// The server removed a subscription on its own
    SubscriptionDeleted { subscription_id: u32 },
}

/// Asynchronous request/response transport with a pump.
///
/// Implementations are driven from a single task; none of the methods are
/// called concurrently.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Start connecting to the endpoint.
    ///
    /// Returns `Ok(())` once the attempt is under way, or immediately if the
    /// transport is already connected or connecting. Failures to even start
    /// (name resolution, unreachable network) are returned as
    /// [`OpcUaError::Connect`](crate::OpcUaError::Connect).
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Begin an asynchronous disconnect. Completion is observed as
    /// `StateChanged` events reaching `Closed`/`Closed`.
    fn disconnect(&mut self) -> Result<()>;

    /// Queue a service request. The response arrives from a later pump.
    fn send(&mut self, request: ServiceRequest) -> Result<RequestId>;

    /// Advance all pending work, waiting at most `timeout` for something to
    /// happen.
    async fn pump(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>>;

    /// Current channel and session state.
    fn state(&self) -> (ChannelState, SessionState);
}
