//! In-process simulated server.
//!
//! [`SimTransport`] implements [`Transport`] without any I/O. It walks
//! through the channel and session handshake one step per pump, answers
//! service requests on the next pump, and turns [`SimTransport::set_value`]
//! calls into data-change notifications for every monitored item on that
//! node. Failure injection covers the cases the lifecycle controller must
//! survive: connect failures, rejected subscriptions and nodes, lost
//! connections and server-side session closure.
//!
//! ```rust,ignore
//! let mut sim = SimTransport::new().with_first_subscription_id(7);
//! sim.set_value(NodeId::string(2, "0:X"), DataValue::new(42.5));
//! let controller = LifecycleController::new(config, sim);
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::{Transport, TransportEvent};
use crate::error::{OpcUaError, Result};
use crate::types::{
    ChannelState, DataValue, Endpoint, NodeId, RequestId, ServiceRequest, ServiceResponse,
    SessionState, StatusCode,
};

/// Call counters and request log.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    /// Number of `connect` calls, including failed and no-op ones
    pub connect_calls: usize,
    /// Number of `disconnect` calls
    pub disconnect_calls: usize,
    /// Every request accepted by `send`, in order
    pub requests: Vec<ServiceRequest>,
}

#[derive(Debug, Clone)]
struct SimItem {
    monitored_item_id: u32,
    node_id: NodeId,
}

type Step = (ChannelState, SessionState, StatusCode);

const HANDSHAKE: [(ChannelState, SessionState); 6] = [
    (ChannelState::HandshakeSent, SessionState::Closed),
    (ChannelState::OpenRequestSent, SessionState::Closed),
    (ChannelState::Open, SessionState::Closed),
    (ChannelState::Open, SessionState::CreateRequested),
    (ChannelState::Open, SessionState::Activating),
    (ChannelState::Open, SessionState::Activated),
];

/// Simulated OPC UA server behind the [`Transport`] interface.
#[derive(Debug)]
pub struct SimTransport {
    channel: ChannelState,
    session: SessionState,
    script: VecDeque<Step>,
    inflight: VecDeque<(RequestId, ServiceRequest)>,
    outbox: VecDeque<TransportEvent>,
    changes: VecDeque<NodeId>,
    values: HashMap<NodeId, DataValue>,
    subscriptions: HashMap<u32, Vec<SimItem>>,
    rejected_nodes: HashMap<NodeId, StatusCode>,
    subscription_status: StatusCode,
    next_request_id: u32,
    next_subscription_id: u32,
    next_monitored_item_id: u32,
    connect_failures: u32,
    auto_reconnect: bool,
    stats: SimStats,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    /// Create a simulated server with no values.
    pub fn new() -> Self {
        Self {
            channel: ChannelState::Closed,
            session: SessionState::Closed,
            script: VecDeque::new(),
            inflight: VecDeque::new(),
            outbox: VecDeque::new(),
            changes: VecDeque::new(),
            values: HashMap::new(),
            subscriptions: HashMap::new(),
            rejected_nodes: HashMap::new(),
            subscription_status: StatusCode::GOOD,
            next_request_id: 1,
            next_subscription_id: 1,
            next_monitored_item_id: 1,
            connect_failures: 0,
            auto_reconnect: true,
            stats: SimStats::default(),
        }
    }

    /// Id handed to the next created subscription (0 simulates a broken
    /// server).
    pub fn with_first_subscription_id(mut self, id: u32) -> Self {
        self.next_subscription_id = id;
        self
    }

    /// Id handed to the next created monitored item.
    pub fn with_first_monitored_item_id(mut self, id: u32) -> Self {
        self.next_monitored_item_id = id;
        self
    }

    /// Fail the next `count` connect calls.
    pub fn with_connect_failures(mut self, count: u32) -> Self {
        self.connect_failures = count;
        self
    }

    /// Answer every CreateSubscription with this service result.
    pub fn with_subscription_status(mut self, status: StatusCode) -> Self {
        self.subscription_status = status;
        self
    }

    /// Change the CreateSubscription service result for later requests.
    pub fn set_subscription_status(&mut self, status: StatusCode) {
        self.subscription_status = status;
    }

    /// Reject monitored items on `node_id` with `status`.
    pub fn with_rejected_node(mut self, node_id: NodeId, status: StatusCode) -> Self {
        self.rejected_nodes.insert(node_id, status);
        self
    }

    /// Reconnect on its own after a lost connection (default: on).
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Call counters.
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Number of subscriptions alive on the server side.
    pub fn server_subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Update a node value; monitored items on the node are notified on the
    /// next pump.
    pub fn set_value(&mut self, node_id: NodeId, value: DataValue) {
        self.values.insert(node_id.clone(), value);
        self.changes.push_back(node_id);
    }

    /// Queue an arbitrary event for the next pump.
    pub fn inject(&mut self, event: TransportEvent) {
        self.outbox.push_back(event);
    }

    /// Report inactivity for every live subscription on the next pump.
    pub fn trigger_inactivity(&mut self) {
        let mut ids: Vec<u32> = self.subscriptions.keys().copied().collect();
        ids.sort_unstable();
        for subscription_id in ids {
            self.outbox
                .push_back(TransportEvent::Inactivity { subscription_id });
        }
    }

    /// Delete a subscription on the server side and notify the client.
    pub fn delete_server_subscription(&mut self, subscription_id: u32) {
        if self.subscriptions.remove(&subscription_id).is_some() {
            self.outbox
                .push_back(TransportEvent::SubscriptionDeleted { subscription_id });
        }
    }

    /// Simulate network loss: pending requests are lost and both states
    /// collapse to `Closed`.
    pub fn drop_connection(&mut self) {
        self.lose_server_state();
        self.script.push_back((
            ChannelState::Closed,
            SessionState::Closed,
            StatusCode::BAD_CONNECTION_CLOSED,
        ));
        if self.auto_reconnect {
            self.schedule_handshake(0);
        }
    }

    /// Simulate the server closing the session while the channel stays open.
    pub fn close_session(&mut self) {
        self.lose_server_state();
        self.script.push_back((
            ChannelState::Open,
            SessionState::Closed,
            StatusCode::BAD_SESSION_CLOSED,
        ));
        if self.auto_reconnect {
            // Session part of the handshake only.
            self.schedule_handshake(3);
        }
    }

    fn lose_server_state(&mut self) {
        self.script.clear();
        self.inflight.clear();
        self.changes.clear();
        self.subscriptions.clear();
    }

    fn schedule_handshake(&mut self, from: usize) {
        for (channel, session) in HANDSHAKE.iter().skip(from) {
            self.script.push_back((*channel, *session, StatusCode::GOOD));
        }
    }

    fn is_idle(&self) -> bool {
        self.channel == ChannelState::Closed
            && self.session == SessionState::Closed
            && self.script.is_empty()
    }

    fn answer(&mut self, request: ServiceRequest) -> ServiceResponse {
        match request {
            ServiceRequest::CreateSubscription(params) => {
                if !self.subscription_status.is_good() {
                    return ServiceResponse::CreateSubscription {
                        service_result: self.subscription_status,
                        subscription_id: 0,
                        revised_publishing_interval_ms: 0.0,
                        revised_lifetime_count: 0,
                        revised_max_keep_alive_count: 0,
                    };
                }
                let subscription_id = self.next_subscription_id;
                self.next_subscription_id = self.next_subscription_id.wrapping_add(1);
                if subscription_id != 0 {
                    self.subscriptions.insert(subscription_id, Vec::new());
                }
                ServiceResponse::CreateSubscription {
                    service_result: StatusCode::GOOD,
                    subscription_id,
                    revised_publishing_interval_ms: params.publishing_interval_ms,
                    revised_lifetime_count: params.lifetime_count,
                    revised_max_keep_alive_count: params.max_keep_alive_count,
                }
            }
            ServiceRequest::CreateMonitoredItem {
                subscription_id,
                item,
            } => {
                let rejected = self.rejected_nodes.get(&item.node_id).copied();
                let status = match (self.subscriptions.get(&subscription_id), rejected) {
                    (None, _) => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    (Some(_), Some(status)) => status,
                    (Some(_), None) => StatusCode::GOOD,
                };
                if !status.is_good() {
                    return ServiceResponse::CreateMonitoredItem {
                        service_result: StatusCode::GOOD,
                        status,
                        monitored_item_id: 0,
                        revised_sampling_interval_ms: 0.0,
                    };
                }

                let monitored_item_id = self.next_monitored_item_id;
                self.next_monitored_item_id = self.next_monitored_item_id.wrapping_add(1);
                if let Some(items) = self.subscriptions.get_mut(&subscription_id) {
                    items.push(SimItem {
                        monitored_item_id,
                        node_id: item.node_id.clone(),
                    });
                }
                // A new item reports its current value right away.
                if self.values.contains_key(&item.node_id) {
                    self.changes.push_back(item.node_id);
                }
                ServiceResponse::CreateMonitoredItem {
                    service_result: StatusCode::GOOD,
                    status,
                    monitored_item_id,
                    revised_sampling_interval_ms: item.sampling_interval_ms,
                }
            }
            ServiceRequest::DeleteSubscription { subscription_id } => {
                let status = if self.subscriptions.remove(&subscription_id).is_some() {
                    StatusCode::GOOD
                } else {
                    StatusCode::BAD_SUBSCRIPTION_ID_INVALID
                };
                ServiceResponse::DeleteSubscription {
                    service_result: StatusCode::GOOD,
                    status,
                }
            }
            ServiceRequest::Read { node_id } => {
                let value = self.values.get(&node_id).cloned().unwrap_or_else(|| {
                    DataValue::default().with_status(StatusCode::BAD_NODE_ID_UNKNOWN)
                });
                ServiceResponse::Read {
                    service_result: StatusCode::GOOD,
                    value,
                }
            }
        }
    }

    fn collect_data_changes(&mut self, events: &mut Vec<TransportEvent>) {
        while let Some(node_id) = self.changes.pop_front() {
            let Some(value) = self.values.get(&node_id) else {
                continue;
            };
            let mut ids: Vec<&u32> = self.subscriptions.keys().collect();
            ids.sort_unstable();
            for subscription_id in ids {
                for item in &self.subscriptions[subscription_id] {
                    if item.node_id == node_id {
                        events.push(TransportEvent::DataChange {
                            subscription_id: *subscription_id,
                            monitored_item_id: item.monitored_item_id,
                            value: value.clone(),
                        });
                    }
                }
            }
        }
    }
}

impl Transport for SimTransport {
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.stats.connect_calls += 1;

        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(OpcUaError::connect(format!(
                "{}: name resolution failed",
                endpoint.host()
            )));
        }

        if self.is_idle() {
            self.schedule_handshake(0);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stats.disconnect_calls += 1;

        if self.is_idle() {
            return Ok(());
        }

        // Requests already in flight are still answered before CloseSession.
        self.script.clear();
        if self.session != SessionState::Closed {
            self.script
                .push_back((self.channel, SessionState::Closing, StatusCode::GOOD));
        }
        self.script.push_back((
            ChannelState::Closed,
            SessionState::Closed,
            StatusCode::GOOD,
        ));
        Ok(())
    }

    fn send(&mut self, request: ServiceRequest) -> Result<RequestId> {
        if !self.session.is_activated() {
            return Err(OpcUaError::NotConnected);
        }
        let request_id = RequestId(self.next_request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.stats.requests.push(request.clone());
        self.inflight.push_back((request_id, request));
        Ok(request_id)
    }

    async fn pump(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>> {
        let mut events = Vec::new();

        if self.session.is_activated() {
            while let Some((request_id, request)) = self.inflight.pop_front() {
                let response = self.answer(request);
                events.push(TransportEvent::Response {
                    request_id,
                    response,
                });
            }
            self.collect_data_changes(&mut events);
        }

        events.extend(self.outbox.drain(..));

        if let Some((channel, session, recovery)) = self.script.pop_front() {
            self.channel = channel;
            self.session = session;
            if session == SessionState::Closed {
                self.inflight.clear();
                self.subscriptions.clear();
            }
            events.push(TransportEvent::StateChanged {
                channel,
                session,
                recovery,
            });
        }

        if events.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(events)
    }

    fn state(&self) -> (ChannelState, SessionState) {
        (self.channel, self.session)
    }
}
