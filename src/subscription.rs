//! Subscription and monitored item management.
//!
//! The manager issues the service requests for the single subscription of a
//! connection and keeps every outstanding request in a [`PendingRequests`]
//! table. Responses are matched back through [`SubscriptionManager::complete`],
//! which consumes the table entry, so each continuation runs at most once.

use std::collections::HashMap;
use std::num::NonZeroU32;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{OpcUaError, Result};
use crate::transport::Transport;
use crate::types::{
    DataValue, MonitoredItemParams, NodeId, RequestId, Service, ServiceRequest, ServiceResponse,
    StatusCode, SubscriptionParams, Variant,
};

/// What to do when the response for a request arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// CreateSubscription
    CreateSubscription,
    /// CreateMonitoredItems for one registered node
    CreateMonitoredItem {
        subscription_id: NonZeroU32,
        client_handle: u32,
        node_id: NodeId,
    },
    /// DeleteSubscriptions
    DeleteSubscription { subscription_id: NonZeroU32 },
    /// Read of a registered node's value
    Read { client_handle: u32, node_id: NodeId },
}

/// Outstanding requests keyed by request id. Entries are one-shot.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<RequestId, PendingOp>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a request.
    pub fn insert(&mut self, request_id: RequestId, op: PendingOp) {
        if self.entries.insert(request_id, op).is_some() {
            warn!(%request_id, "request id reused while still pending");
        }
    }

    /// Remove and return the entry for a response.
    pub fn take(&mut self, request_id: RequestId) -> Option<PendingOp> {
        self.entries.remove(&request_id)
    }

    /// Check if a request is outstanding.
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.entries.contains_key(&request_id)
    }

    /// Check if any outstanding request matches.
    pub fn any(&self, f: impl Fn(&PendingOp) -> bool) -> bool {
        self.entries.values().any(f)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discard every outstanding request. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

/// A monitored item created on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRecord {
    /// Monitored node
    pub node_id: NodeId,
    /// Server-assigned id
    pub monitored_item_id: u32,
    /// Client handle of the registered handler
    pub client_handle: u32,
    /// Revised sampling interval in milliseconds
    pub sampling_interval_ms: f64,
    /// Last value received
    pub last_value: Option<Variant>,
}

/// The single live subscription of a connection.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    id: NonZeroU32,
    publishing_interval_ms: f64,
    monitored_items: Vec<MonitoredItemRecord>,
    last_inactivity: Option<Instant>,
    deleting: bool,
}

impl SubscriptionRecord {
    /// Server-assigned subscription id.
    #[inline]
    pub fn id(&self) -> NonZeroU32 {
        self.id
    }

    /// Revised publishing interval in milliseconds.
    #[inline]
    pub fn publishing_interval_ms(&self) -> f64 {
        self.publishing_interval_ms
    }

    /// Monitored items in creation order.
    #[inline]
    pub fn monitored_items(&self) -> &[MonitoredItemRecord] {
        &self.monitored_items
    }

    /// Look up a monitored item by id.
    pub fn monitored_item(&self, monitored_item_id: u32) -> Option<&MonitoredItemRecord> {
        self.monitored_items
            .iter()
            .find(|i| i.monitored_item_id == monitored_item_id)
    }

    /// When inactivity was last reported.
    #[inline]
    pub fn last_inactivity(&self) -> Option<Instant> {
        self.last_inactivity
    }

    /// A delete request is outstanding.
    #[inline]
    pub fn is_deleting(&self) -> bool {
        self.deleting
    }
}

/// Subscription accepted by the server, not yet installed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptionGrant {
    pub subscription_id: NonZeroU32,
    pub revised_publishing_interval_ms: f64,
}

/// Result of matching a response to its pending request.
#[derive(Debug)]
pub enum Completion {
    SubscriptionCreated(Result<SubscriptionGrant>),
    MonitoredItemCreated {
        client_handle: u32,
        node_id: NodeId,
        result: Result<u32>,
    },
    SubscriptionDeleted(NonZeroU32),
    ReadCompleted {
        client_handle: u32,
        node_id: NodeId,
        result: Result<DataValue>,
    },
}

/// Creates and deletes the single subscription and its monitored items.
#[derive(Debug)]
pub struct SubscriptionManager {
    params: SubscriptionParams,
    pending: PendingRequests,
    record: Option<SubscriptionRecord>,
}

impl SubscriptionManager {
    /// Create a manager using the given subscription parameters.
    pub fn new(params: SubscriptionParams) -> Self {
        Self {
            params,
            pending: PendingRequests::new(),
            record: None,
        }
    }

    /// Requested subscription parameters.
    pub fn params(&self) -> &SubscriptionParams {
        &self.params
    }

    /// The live subscription, if any.
    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        self.record.as_ref()
    }

    /// Id of the live subscription, if any.
    pub fn subscription_id(&self) -> Option<NonZeroU32> {
        self.record.as_ref().map(|r| r.id)
    }

    /// Outstanding requests.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Request a subscription with the default parameters.
    ///
    /// Refused while a subscription exists or is being created.
    pub fn create_subscription<T: Transport>(&mut self, transport: &mut T) -> Result<RequestId> {
        let creating = self
            .pending
            .any(|op| matches!(op, PendingOp::CreateSubscription));
        if self.record.is_some() || creating {
            return Err(OpcUaError::protocol(
                Service::CreateSubscription,
                StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS,
            ));
        }

        let request_id =
            transport.send(ServiceRequest::CreateSubscription(self.params.clone()))?;
        self.pending.insert(request_id, PendingOp::CreateSubscription);
        debug!(%request_id, "create subscription requested");
        Ok(request_id)
    }

    /// Install a subscription the server granted.
    pub fn install(&mut self, grant: SubscriptionGrant) -> &SubscriptionRecord {
        self.record.insert(SubscriptionRecord {
            id: grant.subscription_id,
            publishing_interval_ms: grant.revised_publishing_interval_ms,
            monitored_items: Vec::new(),
            last_inactivity: None,
            deleting: false,
        })
    }

    /// Request a monitored item in the live subscription.
    pub fn add_monitored_item<T: Transport>(
        &mut self,
        transport: &mut T,
        subscription_id: NonZeroU32,
        item: MonitoredItemParams,
    ) -> Result<RequestId> {
        if self.subscription_id() != Some(subscription_id) {
            return Err(OpcUaError::protocol(
                Service::CreateMonitoredItems,
                StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            ));
        }

        let client_handle = item.client_handle;
        let node_id = item.node_id.clone();
        let request_id = transport.send(ServiceRequest::CreateMonitoredItem {
            subscription_id: subscription_id.get(),
            item,
        })?;
        self.pending.insert(
            request_id,
            PendingOp::CreateMonitoredItem {
                subscription_id,
                client_handle,
                node_id,
            },
        );
        Ok(request_id)
    }

    /// Request a one-shot read of a node's value.
    pub fn read_value<T: Transport>(
        &mut self,
        transport: &mut T,
        node_id: NodeId,
        client_handle: u32,
    ) -> Result<RequestId> {
        let request_id = transport.send(ServiceRequest::Read {
            node_id: node_id.clone(),
        })?;
        self.pending.insert(
            request_id,
            PendingOp::Read {
                client_handle,
                node_id,
            },
        );
        Ok(request_id)
    }

    /// Delete the live subscription, best effort.
    ///
    /// Returns the id when the record was dropped right away, because the
    /// session is unusable or the request could not be sent. Otherwise the
    /// deletion completes through the response or through session loss.
    /// Either way a record yields exactly one deletion.
    pub fn delete_subscription<T: Transport>(
        &mut self,
        transport: &mut T,
        session_usable: bool,
    ) -> Option<NonZeroU32> {
        let record = self.record.as_mut()?;
        if record.deleting {
            return None;
        }
        let subscription_id = record.id;

        if !session_usable {
            debug!(
                subscription_id = subscription_id.get(),
                "session unusable, dropping subscription locally"
            );
            return self.record.take().map(|r| r.id);
        }

        match transport.send(ServiceRequest::DeleteSubscription {
            subscription_id: subscription_id.get(),
        }) {
            Ok(request_id) => {
                record.deleting = true;
                self.pending
                    .insert(request_id, PendingOp::DeleteSubscription { subscription_id });
                None
            }
            Err(e) => {
                warn!(
                    subscription_id = subscription_id.get(),
                    error = %e,
                    "delete subscription not sent"
                );
                self.record.take().map(|r| r.id)
            }
        }
    }

    /// Match a response to its pending request.
    ///
    /// Unmatched responses (unknown or already-discarded request ids) are
    /// ignored and yield `None`.
    pub fn complete(
        &mut self,
        request_id: RequestId,
        response: ServiceResponse,
    ) -> Option<Completion> {
        let Some(op) = self.pending.take(request_id) else {
            debug!(%request_id, "ignoring unmatched response");
            return None;
        };

        match op {
            PendingOp::CreateSubscription => {
                Some(Completion::SubscriptionCreated(subscription_result(response)))
            }
            PendingOp::CreateMonitoredItem {
                subscription_id,
                client_handle,
                node_id,
            } => {
                let result = monitored_item_result(response);
                if let Ok((monitored_item_id, sampling_interval_ms)) = &result {
                    let Some(record) = self.record.as_mut().filter(|r| r.id == subscription_id)
                    else {
                        debug!(
                            subscription_id = subscription_id.get(),
                            "monitored item for a subscription that is gone"
                        );
                        return None;
                    };
                    record.monitored_items.push(MonitoredItemRecord {
                        node_id: node_id.clone(),
                        monitored_item_id: *monitored_item_id,
                        client_handle,
                        sampling_interval_ms: *sampling_interval_ms,
                        last_value: None,
                    });
                }
                Some(Completion::MonitoredItemCreated {
                    client_handle,
                    node_id,
                    result: result.map(|(id, _)| id),
                })
            }
            PendingOp::DeleteSubscription { subscription_id } => {
                if let Err(e) = delete_result(response) {
                    warn!(
                        subscription_id = subscription_id.get(),
                        error = %e,
                        "delete subscription failed"
                    );
                }
                match self.record.as_ref() {
                    Some(r) if r.id == subscription_id => {
                        self.record = None;
                        Some(Completion::SubscriptionDeleted(subscription_id))
                    }
                    _ => None,
                }
            }
            PendingOp::Read {
                client_handle,
                node_id,
            } => Some(Completion::ReadCompleted {
                client_handle,
                node_id,
                result: read_result(response),
            }),
        }
    }

    /// Store a notified value on its monitored item.
    ///
    /// Returns `false` if the subscription or item is unknown.
    pub fn record_value(
        &mut self,
        subscription_id: u32,
        monitored_item_id: u32,
        value: &Variant,
    ) -> bool {
        let Some(record) = self
            .record
            .as_mut()
            .filter(|r| r.id.get() == subscription_id)
        else {
            return false;
        };
        match record
            .monitored_items
            .iter_mut()
            .find(|i| i.monitored_item_id == monitored_item_id)
        {
            Some(item) => {
                item.last_value = Some(value.clone());
                true
            }
            None => false,
        }
    }

    /// Note an inactivity report. Returns `false` for unknown subscriptions.
    pub fn on_inactivity(&mut self, subscription_id: u32) -> bool {
        match self.record.as_mut() {
            Some(r) if r.id.get() == subscription_id => {
                r.last_inactivity = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// The server removed a subscription. Returns the id if it was ours.
    pub fn on_server_deleted(&mut self, subscription_id: u32) -> Option<NonZeroU32> {
        match self.record.as_ref() {
            Some(r) if r.id.get() == subscription_id => self.record.take().map(|r| r.id),
            _ => None,
        }
    }

    /// Connection teardown: discard pending requests and drop the record.
    ///
    /// Returns the id of the dropped subscription, if there was one.
    pub fn reset(&mut self) -> Option<NonZeroU32> {
        let discarded = self.pending.clear();
        if discarded > 0 {
            debug!(discarded, "discarded pending requests");
        }
        self.record.take().map(|r| r.id)
    }
}

fn unexpected(service: Service, response: &ServiceResponse) -> OpcUaError {
    OpcUaError::Transport(format!("unexpected response to {}: {:?}", service, response))
}

fn subscription_result(response: ServiceResponse) -> Result<SubscriptionGrant> {
    let service = Service::CreateSubscription;
    match response {
        ServiceResponse::CreateSubscription {
            service_result,
            subscription_id,
            revised_publishing_interval_ms,
            ..
        } => {
            if !service_result.is_good() {
                return Err(OpcUaError::protocol(service, service_result));
            }
            let subscription_id =
                NonZeroU32::new(subscription_id).ok_or(OpcUaError::ZeroSubscriptionId)?;
            Ok(SubscriptionGrant {
                subscription_id,
                revised_publishing_interval_ms,
            })
        }
        ServiceResponse::ServiceFault { service_result } => {
            Err(OpcUaError::protocol(service, service_result))
        }
        other => Err(unexpected(service, &other)),
    }
}

fn monitored_item_result(response: ServiceResponse) -> Result<(u32, f64)> {
    let service = Service::CreateMonitoredItems;
    match response {
        ServiceResponse::CreateMonitoredItem {
            service_result,
            status,
            monitored_item_id,
            revised_sampling_interval_ms,
        } => {
            if !service_result.is_good() {
                return Err(OpcUaError::protocol(service, service_result));
            }
            if !status.is_good() {
                return Err(OpcUaError::protocol(service, status));
            }
            Ok((monitored_item_id, revised_sampling_interval_ms))
        }
        ServiceResponse::ServiceFault { service_result } => {
            Err(OpcUaError::protocol(service, service_result))
        }
        other => Err(unexpected(service, &other)),
    }
}

fn delete_result(response: ServiceResponse) -> Result<()> {
    let service = Service::DeleteSubscriptions;
    match response {
        ServiceResponse::DeleteSubscription {
            service_result,
            status,
        } => {
            if !service_result.is_good() {
                return Err(OpcUaError::protocol(service, service_result));
            }
            if !status.is_good() {
                return Err(OpcUaError::protocol(service, status));
            }
            Ok(())
        }
        ServiceResponse::ServiceFault { service_result } => {
            Err(OpcUaError::protocol(service, service_result))
        }
        other => Err(unexpected(service, &other)),
    }
}

fn read_result(response: ServiceResponse) -> Result<DataValue> {
    let service = Service::Read;
    match response {
        ServiceResponse::Read {
            service_result,
            value,
        } => {
            if !service_result.is_good() {
                return Err(OpcUaError::protocol(service, service_result));
            }
            if value.status.is_bad() {
                return Err(OpcUaError::protocol(service, value.status));
            }
            Ok(value)
        }
        ServiceResponse::ServiceFault { service_result } => {
            Err(OpcUaError::protocol(service, service_result))
        }
        other => Err(unexpected(service, &other)),
    }
}
