//! Connection and subscription lifecycle controller.
//!
//! The controller owns the transport and drives it from a single task:
//! connect, wait for the session, create the subscription and its monitored
//! items, pump notifications to the registered handlers, and drain the
//! connection on stop. Every transport event is handled synchronously
//! between two pump calls; nothing here awaits except the pump itself.
//!
//! ```text
//! Disconnected -> Connecting -> ChannelOpen -> SessionActivating
//!     -> Subscribing -> Monitoring -> Draining -> Disconnected
//! ```

use std::num::NonZeroU32;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, OperatingMode};
use crate::dispatcher::{channel_handler, DataChange, DataChangeHandler, NotificationDispatcher};
use crate::error::{OpcUaError, Result};
use crate::subscription::{Completion, SubscriptionGrant, SubscriptionManager, SubscriptionRecord};
use crate::tracker::StateTracker;
use crate::transport::{Transport, TransportEvent};
use crate::types::{
    ChannelState, DataValue, Endpoint, MonitoredItemParams, NodeId, SessionState, StatusCode,
};

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No connection and no attempt under way
    Disconnected,
    /// Connect issued, channel not open yet
    Connecting,
    /// Secure channel open, no session
    ChannelOpen,
    /// Session being created or activated
    SessionActivating,
    /// Session activated, subscription being set up
    Subscribing,
    /// Session activated, one-shot reads outstanding
    Reading,
    /// Subscription and at least one monitored item live
    Monitoring,
    /// Stop requested, disconnect in progress
    Draining,
}

impl LifecycleState {
    /// Lifecycle state implied by a (channel, session) pair.
    ///
    /// An activated session maps to `Subscribing`; how far past that the
    /// controller gets depends on service responses, not on state reports.
    pub const fn derive(channel: ChannelState, session: SessionState) -> Self {
        match (channel, session) {
            (_, SessionState::Activated) => Self::Subscribing,
            (_, SessionState::CreateRequested | SessionState::Activating) => {
                Self::SessionActivating
            }
            (ChannelState::Open, _) => Self::ChannelOpen,
            _ => Self::Connecting,
        }
    }

    /// Position along the connection path. `Subscribing` and `Reading`
    /// share a rank.
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::ChannelOpen => 2,
            Self::SessionActivating => 3,
            Self::Subscribing | Self::Reading => 4,
            Self::Monitoring => 5,
            Self::Draining => 6,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::ChannelOpen => "ChannelOpen",
            Self::SessionActivating => "SessionActivating",
            Self::Subscribing => "Subscribing",
            Self::Reading => "Reading",
            Self::Monitoring => "Monitoring",
            Self::Draining => "Draining",
        };
        f.write_str(name)
    }
}

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Lifecycle state changed
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Connect could not be started
    ConnectFailed(String),
    /// Channel or session lost; records were reset
    ConnectionLost(StatusCode),
    /// Subscription created
    SubscriptionCreated { subscription_id: u32 },
    /// Subscription could not be created
    SubscriptionFailed(String),
    /// Monitored item created
    MonitoredItemCreated {
        node_id: NodeId,
        monitored_item_id: u32,
    },
    /// Monitored item could not be created
    MonitoredItemFailed { node_id: NodeId, error: String },
    /// Subscription deleted (confirmed, local or by session loss)
    SubscriptionDeleted { subscription_id: u32 },
    /// No publish response within the keep-alive window
    Inactivity { subscription_id: u32 },
    /// One-shot read delivered
    ReadCompleted(DataChange),
    /// One-shot read failed
    ReadFailed { node_id: NodeId, error: String },
}

/// Connection and subscription lifecycle controller.
pub struct LifecycleController<T: Transport> {
    config: ClientConfig,
    transport: T,
    endpoint: Option<Endpoint>,
    state: LifecycleState,
    tracker: StateTracker,
    subscriptions: SubscriptionManager,
    dispatcher: NotificationDispatcher,
    connect_failures: u32,
    next_attempt: Option<Instant>,
    reads_outstanding: usize,
    reads_done: bool,
    event_tx: mpsc::Sender<ControllerEvent>,
    event_rx: Option<mpsc::Receiver<ControllerEvent>>,
}

impl<T: Transport> LifecycleController<T> {
    /// Create a controller owning `transport`.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let subscriptions = SubscriptionManager::new(config.subscription.clone());
        Self {
            config,
            transport,
            endpoint: None,
            state: LifecycleState::Disconnected,
            tracker: StateTracker::new(),
            subscriptions,
            dispatcher: NotificationDispatcher::new(),
            connect_failures: 0,
            next_attempt: None,
            reads_outstanding: 0,
            reads_done: false,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Last reported channel and session state.
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// The live subscription, if any.
    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        self.subscriptions.subscription()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.subscriptions.pending().len()
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Subscribe to controller events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<ControllerEvent>> {
        self.event_rx.take()
    }

    /// Read-once mode finished all its reads.
    pub fn is_finished(&self) -> bool {
        self.reads_done
    }

    /// Register a data-change handler for a node. Returns its client handle.
    ///
    /// The monitored item is created with the subscription, or right away
    /// if the subscription already exists. `sampling_interval_ms` of `None`
    /// uses the default monitored item settings.
    pub fn monitor<F>(
        &mut self,
        node_id: NodeId,
        sampling_interval_ms: Option<f64>,
        handler: F,
    ) -> Result<u32>
    where
        F: FnMut(&DataChange) + Send + 'static,
    {
        self.register(node_id, sampling_interval_ms, Box::new(handler))
    }

    /// Register a node whose data changes are delivered into a bounded
    /// channel. Records are dropped when the channel is full.
    pub fn monitor_channel(
        &mut self,
        node_id: NodeId,
        sampling_interval_ms: Option<f64>,
        capacity: usize,
    ) -> Result<mpsc::Receiver<DataChange>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.register(node_id, sampling_interval_ms, channel_handler(tx))?;
        Ok(rx)
    }

    fn register(
        &mut self,
        node_id: NodeId,
        sampling_interval_ms: Option<f64>,
        handler: DataChangeHandler,
    ) -> Result<u32> {
        let client_handle = self
            .dispatcher
            .register(node_id.clone(), sampling_interval_ms, handler)?;

        let live = matches!(self.state, LifecycleState::Subscribing | LifecycleState::Monitoring);
        if self.config.mode == OperatingMode::Monitor && live && self.tracker.session_activated() {
            let subscription_id = self
                .subscriptions
                .subscription()
                .filter(|record| !record.is_deleting())
                .map(SubscriptionRecord::id);
            if let Some(subscription_id) = subscription_id {
                self.request_monitored_item(
                    subscription_id,
                    client_handle,
                    node_id,
                    sampling_interval_ms,
                );
            }
        }
        Ok(client_handle)
    }

    /// Start connecting. A no-op unless disconnected.
    ///
    /// Failures are logged and emitted as [`ControllerEvent::ConnectFailed`];
    /// the controller stays usable and [`run`](Self::run) retries according
    /// to the configured [`RetryPolicy`](crate::RetryPolicy).
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != LifecycleState::Disconnected {
            return Ok(());
        }
        self.start_connect().await
    }

    async fn start_connect(&mut self) -> Result<()> {
        self.set_state(LifecycleState::Connecting);

        let result = match self.resolve_endpoint() {
            Ok(endpoint) => self.transport.connect(&endpoint).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.next_attempt = None;
                Ok(())
            }
            Err(e) => {
                self.connect_failures = self.connect_failures.saturating_add(1);
                self.next_attempt = self
                    .config
                    .retry
                    .delay(self.connect_failures)
                    .map(|d| Instant::now() + d);
                warn!(
                    endpoint = %self.config.endpoint,
                    failures = self.connect_failures,
                    error = %e,
                    "not connected"
                );
                self.set_state(LifecycleState::Disconnected);
                self.emit(ControllerEvent::ConnectFailed(e.to_string()));
                Err(e)
            }
        }
    }

    fn resolve_endpoint(&mut self) -> Result<Endpoint> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let endpoint = Endpoint::parse(&self.config.endpoint)?;
        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Run until `cancel` fires (or, in read-once mode, until every read
    /// completed), then drain the connection.
    ///
    /// Cancellation is checked once per iteration, so it takes effect
    /// within one pump timeout.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(endpoint = %self.config.endpoint, mode = ?self.config.mode, "starting");

        if let Err(e) = self.connect().await {
            debug!(error = %e, "initial connect failed");
        }

        while !cancel.is_cancelled() {
            if self.is_finished() {
                info!("all reads completed");
                break;
            }
            self.retry_if_due().await;
            self.iterate(self.config.pump_timeout).await;
        }

        self.shutdown().await;
    }

    async fn retry_if_due(&mut self) {
        let idle = match self.state {
            LifecycleState::Disconnected => true,
            LifecycleState::Connecting => self.transport_closed(),
            _ => false,
        };
        if !idle {
            return;
        }

        match self.next_attempt {
            Some(at) if Instant::now() >= at => {
                if let Err(e) = self.start_connect().await {
                    debug!(error = %e, "reconnect failed");
                }
            }
            _ => {}
        }
    }

    /// Pump the transport once and handle everything it delivered.
    pub async fn iterate(&mut self, timeout: Duration) {
        let events = match self.transport.pump(timeout).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "pump failed");
                let (channel, session) = self.transport.state();
                self.on_state_change(channel, session, StatusCode::BAD_COMMUNICATION_ERROR);
                return;
            }
        };

        for event in events {
            self.handle_event(event);
        }
    }

    /// Request a stop: delete the subscription (best effort) and start an
    /// asynchronous disconnect.
    ///
    /// A no-op when disconnected or already draining.
    pub fn stop(&mut self) {
        if matches!(self.state, LifecycleState::Disconnected | LifecycleState::Draining) {
            debug!(state = %self.state, "stop ignored");
            return;
        }

        info!(state = %self.state, "stopping");
        self.set_state(LifecycleState::Draining);
        self.next_attempt = None;
        self.delete_subscription();

        if let Err(e) = self.transport.disconnect() {
            warn!(error = %e, "disconnect failed");
        }
    }

    /// Delete the live subscription, best effort.
    ///
    /// Exactly one [`ControllerEvent::SubscriptionDeleted`] follows, from
    /// the response, from session closure, or immediately if the session is
    /// already gone.
    pub fn delete_subscription(&mut self) {
        let usable = self.tracker.session_activated();
        if let Some(subscription_id) = self
            .subscriptions
            .delete_subscription(&mut self.transport, usable)
        {
            self.notify_deleted(subscription_id);
        }
    }

    /// Create the subscription again after it failed or was deleted.
    ///
    /// Only valid in monitor mode while `Subscribing` on an activated
    /// session with no subscription live or being created. Registered
    /// nodes get their monitored items once the server answers.
    pub fn resubscribe(&mut self) -> Result<()> {
        if self.config.mode != OperatingMode::Monitor || self.state != LifecycleState::Subscribing {
            return Err(OpcUaError::InvalidState(self.state.to_string()));
        }
        if !self.tracker.session_activated() {
            return Err(OpcUaError::NotConnected);
        }
        info!("re-creating subscription");
        self.request_subscription()
    }

    /// Stop, then pump with the drain timeout until the transport reports
    /// both channel and session closed or the iteration bound is reached.
    pub async fn shutdown(&mut self) {
        self.stop();
        if self.state != LifecycleState::Draining {
            return;
        }

        let mut iterations = 0;
        while !self.transport_closed() {
            if iterations >= self.config.max_drain_iterations {
                warn!(iterations, "drain did not complete, giving up");
                break;
            }
            self.iterate(self.config.drain_timeout).await;
            iterations += 1;
        }

        self.teardown();
        self.set_state(LifecycleState::Disconnected);
        info!(iterations, "disconnected");
    }

    fn transport_closed(&self) -> bool {
        self.transport.state() == (ChannelState::Closed, SessionState::Closed)
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged {
                channel,
                session,
                recovery,
            } => self.on_state_change(channel, session, recovery),

            TransportEvent::Response {
                request_id,
                response,
            } => {
                if let Some(completion) = self.subscriptions.complete(request_id, response) {
                    self.on_completion(completion);
                }
            }

            TransportEvent::DataChange {
                subscription_id,
                monitored_item_id,
                value,
            } => self.on_data_change(subscription_id, monitored_item_id, value),

            TransportEvent::Inactivity { subscription_id } => {
                if self.subscriptions.on_inactivity(subscription_id) {
                    warn!(subscription_id, "inactivity for subscription");
                    self.emit(ControllerEvent::Inactivity { subscription_id });
                } else {
                    debug!(subscription_id, "inactivity for unknown subscription");
                }
            }

            TransportEvent::SubscriptionDeleted { subscription_id } => {
                if let Some(id) = self.subscriptions.on_server_deleted(subscription_id) {
                    self.notify_deleted(id);
                    self.fall_back_to_subscribing();
                }
            }
        }
    }

    fn on_state_change(
        &mut self,
        channel: ChannelState,
        session: SessionState,
        recovery: StatusCode,
    ) {
        let Some(transition) = self.tracker.observe(channel, session, recovery) else {
            return;
        };

        if self.state == LifecycleState::Draining {
            if session == SessionState::Closed {
                self.teardown();
            }
            return;
        }

        let target = LifecycleState::derive(channel, session);
        let reached = self.state.rank().min(LifecycleState::Subscribing.rank());
        if self.state != LifecycleState::Disconnected && target.rank() < reached {
            warn!(
                state = %self.state,
                %channel,
                %session,
                %recovery,
                "connection lost, resetting"
            );
            self.emit(ControllerEvent::ConnectionLost(recovery));
            self.teardown();
            self.reads_outstanding = 0;
            self.set_state(LifecycleState::Connecting);
        }

        if channel == ChannelState::Closed && self.state != LifecycleState::Disconnected {
            self.schedule_retry(transition.previous_channel.is_open());
        }

        if transition.session_activated() {
            self.connect_failures = 0;
            self.on_session_activated();
        } else if target.rank() > self.state.rank()
            && target.rank() < LifecycleState::Subscribing.rank()
        {
            self.set_state(target);
        }
    }

    /// Plan the next connect after the channel closed. A channel that never
    /// opened counts as a failed attempt, so repeated handshake failures
    /// back off like failed connects.
    fn schedule_retry(&mut self, channel_was_open: bool) {
        if !channel_was_open {
            self.connect_failures = self.connect_failures.saturating_add(1);
        }
        let delay = self.config.retry.delay(self.connect_failures.max(1));
        self.next_attempt = delay.map(|d| Instant::now() + d);
        debug!(failures = self.connect_failures, ?delay, "reconnect scheduled");
    }

    fn on_session_activated(&mut self) {
        match self.config.mode {
            OperatingMode::Monitor => {
                self.set_state(LifecycleState::Subscribing);
                if let Err(e) = self.request_subscription() {
                    error!(error = %e, "create subscription not sent");
                    self.emit(ControllerEvent::SubscriptionFailed(e.to_string()));
                }
            }
            OperatingMode::ReadOnce => {
                self.set_state(LifecycleState::Reading);
                let nodes: Vec<(u32, NodeId)> = self
                    .dispatcher
                    .registrations()
                    .map(|(handle, node_id, _)| (handle, node_id.clone()))
                    .collect();

                self.reads_outstanding = 0;
                for (client_handle, node_id) in nodes {
                    match self.subscriptions.read_value(
                        &mut self.transport,
                        node_id.clone(),
                        client_handle,
                    ) {
                        Ok(_) => self.reads_outstanding += 1,
                        Err(e) => {
                            error!(%node_id, error = %e, "read not sent");
                            self.emit(ControllerEvent::ReadFailed {
                                node_id,
                                error: e.to_string(),
                            });
                        }
                    }
                }
                if self.reads_outstanding == 0 {
                    self.reads_done = true;
                }
            }
        }
    }

    fn request_subscription(&mut self) -> Result<()> {
        self.subscriptions.create_subscription(&mut self.transport)?;
        Ok(())
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::SubscriptionCreated(result) => self.on_subscription_created(result),
            Completion::MonitoredItemCreated {
                client_handle,
                node_id,
                result,
            } => self.on_monitored_item_created(client_handle, node_id, result),
            Completion::SubscriptionDeleted(subscription_id) => {
                self.notify_deleted(subscription_id);
                self.fall_back_to_subscribing();
            }
            Completion::ReadCompleted {
                client_handle,
                node_id,
                result,
            } => self.on_read_completed(client_handle, node_id, result),
        }
    }

    fn on_subscription_created(&mut self, result: Result<SubscriptionGrant>) {
        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                error!(error = %e, "create subscription failed");
                self.emit(ControllerEvent::SubscriptionFailed(e.to_string()));
                return;
            }
        };

        if !self.tracker.session_activated() || self.state != LifecycleState::Subscribing {
            warn!(
                subscription_id = grant.subscription_id.get(),
                state = %self.state,
                "ignoring subscription created outside an activated session"
            );
            return;
        }

        let subscription_id = self.subscriptions.install(grant).id();
        info!(
            subscription_id = subscription_id.get(),
            "create subscription succeeded"
        );
        self.emit(ControllerEvent::SubscriptionCreated {
            subscription_id: subscription_id.get(),
        });

        let nodes: Vec<(u32, NodeId, Option<f64>)> = self
            .dispatcher
            .registrations()
            .map(|(handle, node_id, sampling)| (handle, node_id.clone(), sampling))
            .collect();
        if nodes.is_empty() {
            self.set_state(LifecycleState::Monitoring);
            return;
        }
        for (client_handle, node_id, sampling) in nodes {
            self.request_monitored_item(subscription_id, client_handle, node_id, sampling);
        }
    }

    fn request_monitored_item(
        &mut self,
        subscription_id: NonZeroU32,
        client_handle: u32,
        node_id: NodeId,
        sampling_interval_ms: Option<f64>,
    ) {
        let mut item = MonitoredItemParams::default_for(node_id.clone(), client_handle);
        if let Some(ms) = sampling_interval_ms {
            item = item.sampling_interval(ms);
        }

        if let Err(e) = self
            .subscriptions
            .add_monitored_item(&mut self.transport, subscription_id, item)
        {
            error!(%node_id, error = %e, "create monitored item not sent");
            self.emit(ControllerEvent::MonitoredItemFailed {
                node_id,
                error: e.to_string(),
            });
        }
    }

    fn on_monitored_item_created(
        &mut self,
        client_handle: u32,
        node_id: NodeId,
        result: Result<u32>,
    ) {
        match result {
            Ok(monitored_item_id) => {
                self.dispatcher.bind(monitored_item_id, client_handle);
                info!(%node_id, monitored_item_id, "monitoring");
                self.emit(ControllerEvent::MonitoredItemCreated {
                    node_id,
                    monitored_item_id,
                });
                if self.state == LifecycleState::Subscribing {
                    self.set_state(LifecycleState::Monitoring);
                }
            }
            Err(e) => {
                error!(%node_id, error = %e, "create monitored item failed");
                self.emit(ControllerEvent::MonitoredItemFailed {
                    node_id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn on_read_completed(
        &mut self,
        client_handle: u32,
        node_id: NodeId,
        result: Result<DataValue>,
    ) {
        match result {
            Ok(value) => {
                if let Some(change) = self.dispatcher.deliver(client_handle, None, &value) {
                    info!(%node_id, value = ?change.value, "value read");
                    self.emit(ControllerEvent::ReadCompleted(change));
                }
            }
            Err(e) => {
                error!(%node_id, error = %e, "read failed");
                self.emit(ControllerEvent::ReadFailed {
                    node_id,
                    error: e.to_string(),
                });
            }
        }

        self.reads_outstanding = self.reads_outstanding.saturating_sub(1);
        if self.reads_outstanding == 0 && self.state == LifecycleState::Reading {
            self.reads_done = true;
        }
    }

    fn on_data_change(&mut self, subscription_id: u32, monitored_item_id: u32, value: DataValue) {
        if !self
            .subscriptions
            .record_value(subscription_id, monitored_item_id, &value.value)
        {
            debug!(
                subscription_id,
                monitored_item_id, "data change for unknown monitored item"
            );
            return;
        }
        self.dispatcher.dispatch(monitored_item_id, &value);
    }

    /// Drop subscription state after the session is gone.
    fn teardown(&mut self) {
        if let Some(subscription_id) = self.subscriptions.reset() {
            self.notify_deleted(subscription_id);
        }
        self.dispatcher.unbind_all();
    }

    fn notify_deleted(&mut self, subscription_id: NonZeroU32) {
        info!(
            subscription_id = subscription_id.get(),
            "subscription was deleted"
        );
        self.dispatcher.unbind_all();
        self.emit(ControllerEvent::SubscriptionDeleted {
            subscription_id: subscription_id.get(),
        });
    }

    /// No automatic resubscription: the session stays up without a
    /// subscription until the operator acts.
    fn fall_back_to_subscribing(&mut self) {
        if self.state == LifecycleState::Monitoring {
            self.set_state(LifecycleState::Subscribing);
        }
    }

    fn set_state(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "lifecycle state changed");
        self.emit(ControllerEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ControllerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("controller event dropped: {}", e);
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for LifecycleController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state)
            .field("tracker", &self.tracker)
            .field("subscriptions", &self.subscriptions)
            .field("dispatcher", &self.dispatcher)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::transport::sim::SimTransport;
    use crate::types::{RequestId, ServiceRequest, ServiceResponse};
    use std::sync::{Arc, Mutex};

    const ENDPOINT: &str = "opc.tcp://sim:4840/UA/Test";
    const STEP: Duration = Duration::from_millis(100);

    fn config() -> ClientConfig {
        ClientConfig::new(ENDPOINT).retry(RetryPolicy::Immediate)
    }

    fn node() -> NodeId {
        NodeId::parse("ns=2;s=0:X").unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn deleted_ids(events: &[ControllerEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::SubscriptionDeleted { subscription_id } => Some(*subscription_id),
                _ => None,
            })
            .collect()
    }

    fn visited(events: &[ControllerEvent]) -> Vec<LifecycleState> {
        events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn creates_sent(sim: &SimTransport) -> usize {
        sim.stats()
            .requests
            .iter()
            .filter(|r| matches!(r, ServiceRequest::CreateSubscription(_)))
            .count()
    }

    fn items_sent(sim: &SimTransport) -> usize {
        sim.stats()
            .requests
            .iter()
            .filter(|r| matches!(r, ServiceRequest::CreateMonitoredItem { .. }))
            .count()
    }

    async fn pump_until(
        controller: &mut LifecycleController<SimTransport>,
        state: LifecycleState,
    ) {
        for _ in 0..50 {
            if controller.state() == state {
                return;
            }
            controller.iterate(STEP).await;
        }
        panic!("never reached {}, stuck in {}", state, controller.state());
    }

    async fn pump_n(controller: &mut LifecycleController<SimTransport>, n: usize) {
        for _ in 0..n {
            controller.iterate(STEP).await;
        }
    }

    async fn monitoring(sim: SimTransport) -> LifecycleController<SimTransport> {
        let mut controller = LifecycleController::new(config(), sim);
        controller.monitor(node(), None, |_| {}).unwrap();
        tokio_test::assert_ok!(controller.connect().await);
        pump_until(&mut controller, LifecycleState::Monitoring).await;
        controller
    }

    async fn replay(
        steps: &[(ChannelState, SessionState)],
    ) -> (LifecycleState, Vec<LifecycleState>) {
        let mut controller = LifecycleController::new(config(), SimTransport::new());
        let mut rx = controller.subscribe().unwrap();
        for (channel, session) in steps {
            controller.transport_mut().inject(TransportEvent::StateChanged {
                channel: *channel,
                session: *session,
                recovery: StatusCode::GOOD,
            });
            controller.iterate(STEP).await;
        }
        (controller.state(), visited(&drain(&mut rx)))
    }

    #[test]
    fn test_derive() {
        use ChannelState as C;
        use SessionState as S;

        assert_eq!(LifecycleState::derive(C::Closed, S::Closed), LifecycleState::Connecting);
        assert_eq!(
            LifecycleState::derive(C::HandshakeSent, S::Closed),
            LifecycleState::Connecting
        );
        assert_eq!(LifecycleState::derive(C::Open, S::Closed), LifecycleState::ChannelOpen);
        assert_eq!(
            LifecycleState::derive(C::Open, S::Activating),
            LifecycleState::SessionActivating
        );
        assert_eq!(
            LifecycleState::derive(C::Open, S::Activated),
            LifecycleState::Subscribing
        );
        assert_eq!(LifecycleState::derive(C::Open, S::Closing), LifecycleState::ChannelOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_is_deterministic() {
        use ChannelState as C;
        use SessionState as S;

        let steps = [
            (C::HandshakeSent, S::Closed),
            (C::OpenRequestSent, S::Closed),
            (C::Open, S::Closed),
            (C::Open, S::CreateRequested),
            (C::Open, S::Activating),
            (C::Open, S::Activated),
            (C::Closed, S::Closed),
            (C::HandshakeSent, S::Closed),
            (C::Open, S::Closed),
        ];

        let first = replay(&steps).await;
        let second = replay(&steps).await;
        assert_eq!(first, second);
        assert_eq!(first.0, LifecycleState::ChannelOpen);
        assert_eq!(
            first.1,
            vec![
                LifecycleState::Connecting,
                LifecycleState::ChannelOpen,
                LifecycleState::SessionActivating,
                LifecycleState::Subscribing,
                LifecycleState::Connecting,
                LifecycleState::ChannelOpen,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_created_before_activation_is_ignored() {
        let mut controller = LifecycleController::new(config(), SimTransport::new());
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();
        controller.connect().await.unwrap();

        controller.transport_mut().inject(TransportEvent::Response {
            request_id: RequestId(1),
            response: ServiceResponse::CreateSubscription {
                service_result: StatusCode::GOOD,
                subscription_id: 7,
                revised_publishing_interval_ms: 500.0,
                revised_lifetime_count: 10_000,
                revised_max_keep_alive_count: 10,
            },
        });
        controller.iterate(STEP).await;

        assert!(controller.subscription().is_none());
        assert_eq!(controller.state(), LifecycleState::Connecting);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ControllerEvent::SubscriptionCreated { .. })));

        // The real subscription, requested after activation, wins.
        pump_until(&mut controller, LifecycleState::Monitoring).await;
        assert_eq!(controller.subscription().unwrap().id().get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_monitored_item_keeps_subscription() {
        let sim = SimTransport::new()
            .with_first_subscription_id(7)
            .with_rejected_node(node(), StatusCode::BAD_NODE_ID_UNKNOWN);
        let mut controller = LifecycleController::new(config(), sim);
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();
        controller.connect().await.unwrap();

        pump_until(&mut controller, LifecycleState::Subscribing).await;
        pump_n(&mut controller, 5).await;

        assert_eq!(controller.state(), LifecycleState::Subscribing);
        let record = controller.subscription().unwrap();
        assert_eq!(record.id().get(), 7);
        assert!(record.monitored_items().is_empty());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ControllerEvent::MonitoredItemFailed { node_id, .. } if *node_id == node()
        )));
        assert!(!visited(&events).contains(&LifecycleState::Monitoring));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_good_item_is_enough_to_monitor() {
        let bad = NodeId::string(2, "0:MISSING");
        let sim =
            SimTransport::new().with_rejected_node(bad.clone(), StatusCode::BAD_NODE_ID_UNKNOWN);
        let mut controller = LifecycleController::new(config(), sim);
        controller.monitor(bad, None, |_| {}).unwrap();
        controller.monitor(node(), Some(1000.0), |_| {}).unwrap();
        controller.connect().await.unwrap();

        pump_until(&mut controller, LifecycleState::Monitoring).await;
        let items = controller.subscription().unwrap().monitored_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node_id, node());
        assert_eq!(items[0].sampling_interval_ms, 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_disconnects_once() {
        let mut controller = monitoring(SimTransport::new()).await;

        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert_eq!(controller.transport().stats().disconnect_calls, 1);

        controller.shutdown().await;
        assert_eq!(controller.state(), LifecycleState::Disconnected);
        assert_eq!(controller.transport().stats().disconnect_calls, 1);

        // Stopping a disconnected controller does nothing either.
        controller.stop();
        assert_eq!(controller.transport().stats().disconnect_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_data_change() {
        let sim = SimTransport::new()
            .with_first_subscription_id(7)
            .with_first_monitored_item_id(3);
        let mut controller = LifecycleController::new(config(), sim);
        let mut rx = controller.subscribe().unwrap();
        let mut changes = controller
            .monitor_channel(NodeId::parse("ns=2;s=0:X").unwrap(), None, 16)
            .unwrap();

        controller.connect().await.unwrap();
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        let events = drain(&mut rx);
        assert!(events.contains(&ControllerEvent::SubscriptionCreated { subscription_id: 7 }));
        assert!(events.contains(&ControllerEvent::MonitoredItemCreated {
            node_id: node(),
            monitored_item_id: 3,
        }));

        controller.transport_mut().set_value(node(), DataValue::new(42.5));
        controller.iterate(STEP).await;

        let change = changes.try_recv().unwrap();
        assert_eq!(change.numeric_value, Some(42.5));
        assert_eq!(change.type_name, "Double");
        assert_eq!(change.monitored_item_id, Some(3));
        assert_eq!(change.node_id, node());

        let item = controller.subscription().unwrap().monitored_item(3).unwrap();
        assert_eq!(item.last_value, Some(crate::types::Variant::Double(42.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_value_is_delivered_degraded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut controller = LifecycleController::new(config(), SimTransport::new());
        controller.monitor(node(), None, move |change| {
            sink.lock().unwrap().push(change.clone());
        })
        .unwrap();
        controller.connect().await.unwrap();
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        controller.transport_mut().set_value(node(), DataValue::new(17i32));
        controller.iterate(STEP).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_degraded());
        assert_eq!(seen[0].type_name, "Int32");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_never_reach_monitoring() {
        let sim = SimTransport::new().with_connect_failures(u32::MAX);
        let mut controller = LifecycleController::new(config(), sim);
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        controller.run(cancel).await;

        assert_eq!(controller.state(), LifecycleState::Disconnected);
        let events = drain(&mut rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, ControllerEvent::ConnectFailed(_)))
            .count();
        assert!(failures >= 2, "expected repeated attempts, got {}", failures);

        let states = visited(&events);
        assert!(states
            .iter()
            .all(|s| matches!(s, LifecycleState::Connecting | LifecycleState::Disconnected)));
        assert_eq!(controller.transport().stats().disconnect_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_spaces_out_attempts() {
        let sim = SimTransport::new().with_connect_failures(u32::MAX);
        let retry = RetryPolicy::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(4),
        };
        let config = config().retry(retry).pump_timeout(Duration::from_secs(1));
        let mut controller = LifecycleController::new(config, sim);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });
        controller.run(cancel).await;

        // t=0 (initial), t=1 (after 1s), t=3 (after 2s); the next is due at t=7.
        assert_eq!(controller.transport().stats().connect_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retry() {
        let sim = SimTransport::new().with_connect_failures(u32::MAX);
        let config = config().retry(RetryPolicy::Never);
        let mut controller = LifecycleController::new(config, sim);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        controller.run(cancel).await;

        assert_eq!(controller.transport().stats().connect_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_endpoint_is_a_connect_error() {
        let mut controller =
            LifecycleController::new(ClientConfig::new("http://sim:4840"), SimTransport::new());
        let err = tokio_test::assert_err!(controller.connect().await);
        assert!(err.is_connection_error());
        assert_eq!(controller.state(), LifecycleState::Disconnected);
        assert_eq!(controller.transport().stats().connect_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_then_session_close_notifies_once() {
        let sim = SimTransport::new()
            .with_first_subscription_id(7)
            .with_auto_reconnect(false);
        let mut controller = monitoring(sim).await;
        let mut rx = controller.subscribe().unwrap();

        controller.delete_subscription();
        // The session goes away before the delete response is delivered.
        controller.transport_mut().close_session();
        pump_n(&mut controller, 5).await;

        assert_eq!(deleted_ids(&drain(&mut rx)), vec![7]);
        assert!(controller.subscription().is_none());
        assert_eq!(controller.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_delete_then_session_close_notifies_once() {
        let sim = SimTransport::new()
            .with_first_subscription_id(7)
            .with_auto_reconnect(false);
        let mut controller = monitoring(sim).await;
        let mut rx = controller.subscribe().unwrap();

        controller.delete_subscription();
        controller.iterate(STEP).await;
        assert_eq!(controller.state(), LifecycleState::Subscribing);

        controller.transport_mut().close_session();
        pump_n(&mut controller, 5).await;

        assert_eq!(deleted_ids(&drain(&mut rx)), vec![7]);
        assert_eq!(controller.transport().server_subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_delete() {
        let mut controller = monitoring(SimTransport::new()).await;
        let mut rx = controller.subscribe().unwrap();

        controller.shutdown().await;

        assert_eq!(controller.state(), LifecycleState::Disconnected);
        assert_eq!(deleted_ids(&drain(&mut rx)), vec![1]);
        // The delete was answered before the session closed.
        assert_eq!(controller.transport().server_subscription_count(), 0);
        assert_eq!(
            controller.transport().state(),
            (ChannelState::Closed, SessionState::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_connection_loss() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut controller = LifecycleController::new(config(), SimTransport::new());
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, move |change| {
            sink.lock().unwrap().push(change.numeric_value);
        })
        .unwrap();
        controller.connect().await.unwrap();
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        controller.transport_mut().drop_connection();
        controller.iterate(STEP).await;
        assert_eq!(controller.state(), LifecycleState::Connecting);
        assert_eq!(controller.pending_requests(), 0);

        pump_until(&mut controller, LifecycleState::Monitoring).await;
        let events = drain(&mut rx);
        assert!(events.contains(&ControllerEvent::ConnectionLost(
            StatusCode::BAD_CONNECTION_CLOSED
        )));
        assert_eq!(deleted_ids(&events), vec![1]);
        assert!(events.contains(&ControllerEvent::SubscriptionCreated { subscription_id: 2 }));

        controller.transport_mut().set_value(node(), DataValue::new(1.5f32));
        controller.iterate(STEP).await;
        assert_eq!(*seen.lock().unwrap(), vec![Some(1.5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_reconnects_idle_transport() {
        let sim = SimTransport::new().with_auto_reconnect(false);
        let mut controller = LifecycleController::new(config(), sim);
        controller.monitor(node(), None, |_| {}).unwrap();
        controller.connect().await.unwrap();
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        controller.transport_mut().drop_connection();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        controller.run(cancel).await;

        // Initial connect, then one reconnect issued by the run-loop.
        assert_eq!(controller.transport().stats().connect_calls, 2);
        assert_eq!(creates_sent(controller.transport()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_failure_is_not_retried() {
        let sim = SimTransport::new()
            .with_subscription_status(StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);
        let mut controller = LifecycleController::new(config(), sim);
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();
        controller.connect().await.unwrap();

        pump_until(&mut controller, LifecycleState::Subscribing).await;
        pump_n(&mut controller, 10).await;

        assert_eq!(controller.state(), LifecycleState::Subscribing);
        assert!(controller.subscription().is_none());
        assert_eq!(creates_sent(controller.transport()), 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ControllerEvent::SubscriptionFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_subscription_id_is_rejected() {
        let sim = SimTransport::new().with_first_subscription_id(0);
        let mut controller = LifecycleController::new(config(), sim);
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();
        controller.connect().await.unwrap();

        pump_until(&mut controller, LifecycleState::Subscribing).await;
        pump_n(&mut controller, 3).await;

        assert!(controller.subscription().is_none());
        let failed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ControllerEvent::SubscriptionFailed(msg) => Some(msg),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["Server assigned subscription id 0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_is_reported() {
        let mut controller = monitoring(SimTransport::new()).await;
        let mut rx = controller.subscribe().unwrap();

        controller.transport_mut().trigger_inactivity();
        controller.iterate(STEP).await;

        assert!(drain(&mut rx).contains(&ControllerEvent::Inactivity { subscription_id: 1 }));
        assert!(controller.subscription().unwrap().last_inactivity().is_some());
        assert_eq!(controller.state(), LifecycleState::Monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_deleted_subscription_is_not_recreated() {
        let mut controller = monitoring(SimTransport::new()).await;
        let mut rx = controller.subscribe().unwrap();

        controller.transport_mut().delete_server_subscription(1);
        pump_n(&mut controller, 3).await;

        assert_eq!(deleted_ids(&drain(&mut rx)), vec![1]);
        assert_eq!(controller.state(), LifecycleState::Subscribing);
        assert_eq!(creates_sent(controller.transport()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_loss_is_retried() {
        let sim = SimTransport::new().with_auto_reconnect(false);
        let mut controller = LifecycleController::new(config(), sim);
        controller.monitor(node(), None, |_| {}).unwrap();
        tokio_test::assert_ok!(controller.connect().await);
        controller.iterate(STEP).await;
        assert_eq!(controller.tracker().channel(), ChannelState::HandshakeSent);

        // The channel never opens; the transport does not retry on its own.
        controller.transport_mut().drop_connection();
        for _ in 0..60 {
            if controller.state() == LifecycleState::Monitoring {
                break;
            }
            controller.retry_if_due().await;
            controller.iterate(STEP).await;
        }

        assert_eq!(controller.state(), LifecycleState::Monitoring);
        assert_eq!(controller.transport().stats().connect_calls, 2);
        assert_eq!(creates_sent(controller.transport()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_loss_schedules_backoff() {
        use ChannelState as C;
        use SessionState as S;

        let config = config().retry(RetryPolicy::default());
        let mut controller = LifecycleController::new(config, SimTransport::new());
        let start = Instant::now();

        for failures in 1..=2u32 {
            for (channel, session) in [(C::HandshakeSent, S::Closed), (C::Closed, S::Closed)] {
                controller.transport_mut().inject(TransportEvent::StateChanged {
                    channel,
                    session,
                    recovery: StatusCode::BAD_COMMUNICATION_ERROR,
                });
                controller.iterate(STEP).await;
            }
            assert_eq!(controller.state(), LifecycleState::Connecting);
            assert_eq!(controller.connect_failures, failures);
        }

        // Second consecutive failure: 1 s doubled.
        let next = controller.next_attempt.unwrap();
        assert!(next >= start + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_loss_without_retry_policy() {
        let config = config().retry(RetryPolicy::Never);
        let mut controller = LifecycleController::new(config, SimTransport::new());
        for (channel, session) in [
            (ChannelState::HandshakeSent, SessionState::Closed),
            (ChannelState::Closed, SessionState::Closed),
        ] {
            controller.transport_mut().inject(TransportEvent::StateChanged {
                channel,
                session,
                recovery: StatusCode::GOOD,
            });
            controller.iterate(STEP).await;
        }
        assert!(controller.next_attempt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_after_server_deletion() {
        let mut controller = monitoring(SimTransport::new()).await;

        controller.transport_mut().delete_server_subscription(1);
        pump_n(&mut controller, 3).await;
        assert_eq!(controller.state(), LifecycleState::Subscribing);

        tokio_test::assert_ok!(controller.resubscribe());
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        let record = controller.subscription().unwrap();
        assert_eq!(record.id().get(), 2);
        assert_eq!(record.monitored_items().len(), 1);
        assert_eq!(creates_sent(controller.transport()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_after_failure() {
        let sim = SimTransport::new()
            .with_subscription_status(StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);
        let mut controller = LifecycleController::new(config(), sim);
        controller.monitor(node(), None, |_| {}).unwrap();
        tokio_test::assert_ok!(controller.connect().await);
        pump_until(&mut controller, LifecycleState::Subscribing).await;
        pump_n(&mut controller, 3).await;
        assert!(controller.subscription().is_none());

        controller.transport_mut().set_subscription_status(StatusCode::GOOD);
        tokio_test::assert_ok!(controller.resubscribe());
        pump_until(&mut controller, LifecycleState::Monitoring).await;

        assert_eq!(creates_sent(controller.transport()), 2);
        assert_eq!(controller.subscription().unwrap().monitored_items().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_is_refused_outside_subscribing() {
        let mut idle = LifecycleController::new(config(), SimTransport::new());
        let err = tokio_test::assert_err!(idle.resubscribe());
        assert!(matches!(err, OpcUaError::InvalidState(_)));

        let mut controller = monitoring(SimTransport::new()).await;
        let err = tokio_test::assert_err!(controller.resubscribe());
        assert!(matches!(err, OpcUaError::InvalidState(_)));

        controller.transport_mut().delete_server_subscription(1);
        pump_n(&mut controller, 3).await;
        tokio_test::assert_ok!(controller.resubscribe());
        // A create is already outstanding.
        let err = tokio_test::assert_err!(controller.resubscribe());
        assert_eq!(err.status(), Some(StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS));
        assert_eq!(creates_sent(controller.transport()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_item_requests_while_deleting_or_draining() {
        let mut controller = monitoring(SimTransport::new()).await;
        assert_eq!(items_sent(controller.transport()), 1);

        controller.delete_subscription();
        controller.monitor(NodeId::numeric(0, 2258), None, |_| {}).unwrap();
        assert_eq!(items_sent(controller.transport()), 1);

        controller.stop();
        assert_eq!(controller.state(), LifecycleState::Draining);
        controller.monitor(NodeId::numeric(0, 2259), None, |_| {}).unwrap();
        assert_eq!(items_sent(controller.transport()), 1);

        controller.shutdown().await;
        assert_eq!(controller.state(), LifecycleState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_registration_creates_item() {
        let mut controller = monitoring(SimTransport::new()).await;
        let other = NodeId::numeric(0, 2258);

        controller.monitor(other.clone(), None, |_| {}).unwrap();
        controller.iterate(STEP).await;

        let items = controller.subscription().unwrap().monitored_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].node_id, other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_once_mode() {
        let mut sim = SimTransport::new();
        sim.set_value(node(), DataValue::new(42.5));
        let config = config().mode(OperatingMode::ReadOnce);
        let mut controller = LifecycleController::new(config, sim);
        let mut rx = controller.subscribe().unwrap();
        let mut values = controller.monitor_channel(node(), None, 4).unwrap();

        controller.run(CancellationToken::new()).await;

        assert!(controller.is_finished());
        assert_eq!(controller.state(), LifecycleState::Disconnected);
        assert_eq!(creates_sent(controller.transport()), 0);

        let change = values.try_recv().unwrap();
        assert_eq!(change.numeric_value, Some(42.5));
        assert_eq!(change.monitored_item_id, None);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ControllerEvent::ReadCompleted(c) if c.node_id == node())));
        assert!(visited(&events).contains(&LifecycleState::Reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_once_unknown_node() {
        let config = config().mode(OperatingMode::ReadOnce);
        let mut controller = LifecycleController::new(config, SimTransport::new());
        let mut rx = controller.subscribe().unwrap();
        controller.monitor(node(), None, |_| {}).unwrap();

        controller.run(CancellationToken::new()).await;

        assert!(controller.is_finished());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ControllerEvent::ReadFailed { .. })));
    }

    #[test]
    fn test_subscribe_once() {
        let mut controller = LifecycleController::new(config(), SimTransport::new());
        assert!(controller.subscribe().is_some());
        assert!(controller.subscribe().is_none());
    }
}
