//! Data-change notification dispatch.
//!
//! Handlers are registered per node and identified by a client handle. Once
//! the server has created the monitored item, its id is bound to the handle
//! and every notification for that id is classified and passed to the
//! handler. Nothing is filtered or buffered here; flow control belongs to
//! the consumer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{OpcUaError, Result};
use crate::types::{DataValue, NodeId, Service, StatusCode, Variant};

/// Normalized data-change record handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// Node the value belongs to
    pub node_id: NodeId,
    /// Monitored item id (`None` for one-shot reads)
    pub monitored_item_id: Option<u32>,
    /// Source timestamp, else server timestamp, else time of receipt
    pub timestamp: DateTime<Utc>,
    /// Numeric value for scalar Double and Float values
    pub numeric_value: Option<f64>,
    /// Built-in type name of the received value
    pub type_name: &'static str,
    /// Value status
    pub status: StatusCode,
    /// The value as received
    pub value: Variant,
}

impl DataChange {
    /// The value arrived in an encoding the client does not classify and
    /// carries no numeric value.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.numeric_value.is_none()
    }
}

/// Consumer callback for one registered node.
pub type DataChangeHandler = Box<dyn FnMut(&DataChange) + Send>;

/// Classify a value: scalar Double and Float yield a number, everything
/// else only a type name.
pub fn classify(value: &Variant) -> (Option<f64>, &'static str) {
    match value {
        Variant::Double(v) => (Some(*v), value.type_name()),
        Variant::Float(v) => (Some(f64::from(*v)), value.type_name()),
        other => (None, other.type_name()),
    }
}

/// Build a handler that forwards records into a bounded channel.
///
/// Uses `try_send`, so a full or closed channel drops the record instead of
/// stalling the pump.
pub fn channel_handler(tx: mpsc::Sender<DataChange>) -> DataChangeHandler {
    Box::new(move |change: &DataChange| {
        if let Err(e) = tx.try_send(change.clone()) {
            debug!(node_id = %change.node_id, "data change dropped: {}", e);
        }
    })
}

struct Registration {
    client_handle: u32,
    node_id: NodeId,
    sampling_interval_ms: Option<f64>,
    handler: DataChangeHandler,
}

/// Routes notifications to registered handlers.
#[derive(Default)]
pub struct NotificationDispatcher {
    registrations: Vec<Registration>,
    bindings: HashMap<u32, u32>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("registrations", &self.registrations.len())
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl NotificationDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a node. Returns its client handle.
    ///
    /// Handles are 1-based positions; registration fails once they would
    /// no longer fit in a `u32`.
    pub fn register(
        &mut self,
        node_id: NodeId,
        sampling_interval_ms: Option<f64>,
        handler: DataChangeHandler,
    ) -> Result<u32> {
        let client_handle = self
            .registrations
            .len()
            .checked_add(1)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                OpcUaError::protocol(
                    Service::CreateMonitoredItems,
                    StatusCode::BAD_TOO_MANY_MONITORED_ITEMS,
                )
            })?;
        self.registrations.push(Registration {
            client_handle,
            node_id,
            sampling_interval_ms,
            handler,
        });
        Ok(client_handle)
    }

    /// Registered nodes as `(client_handle, node_id, sampling_interval_ms)`.
    pub fn registrations(&self) -> impl Iterator<Item = (u32, &NodeId, Option<f64>)> + '_ {
        self.registrations
            .iter()
            .map(|r| (r.client_handle, &r.node_id, r.sampling_interval_ms))
    }

    /// Number of registered handlers.
    #[inline]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Check if no handler is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Node registered under a client handle.
    pub fn node(&self, client_handle: u32) -> Option<&NodeId> {
        self.registration(client_handle).map(|r| &r.node_id)
    }

    /// Bind a server-assigned monitored item id to a client handle.
    pub fn bind(&mut self, monitored_item_id: u32, client_handle: u32) -> bool {
        if self.registration(client_handle).is_none() {
            return false;
        }
        self.bindings.insert(monitored_item_id, client_handle);
        true
    }

    /// Drop all monitored item bindings; registrations stay.
    pub fn unbind_all(&mut self) {
        self.bindings.clear();
    }

    /// Number of bound monitored items.
    #[inline]
    pub fn bound(&self) -> usize {
        self.bindings.len()
    }

    /// Dispatch a notification for a monitored item.
    ///
    /// Returns the delivered record, or `None` if the id is not bound.
    pub fn dispatch(&mut self, monitored_item_id: u32, value: &DataValue) -> Option<DataChange> {
        let Some(&client_handle) = self.bindings.get(&monitored_item_id) else {
            debug!(monitored_item_id, "notification for unbound monitored item");
            return None;
        };
        self.deliver(client_handle, Some(monitored_item_id), value)
    }

    /// Deliver a value straight to the handler of a client handle.
    pub fn deliver(
        &mut self,
        client_handle: u32,
        monitored_item_id: Option<u32>,
        value: &DataValue,
    ) -> Option<DataChange> {
        let index = usize::try_from(client_handle).ok()?.checked_sub(1)?;
        let registration = self.registrations.get_mut(index)?;

        let (numeric_value, type_name) = classify(&value.value);
        let change = DataChange {
            node_id: registration.node_id.clone(),
            monitored_item_id,
            timestamp: value.timestamp().unwrap_or_else(Utc::now),
            numeric_value,
            type_name,
            status: value.status,
            value: value.value.clone(),
        };

        match change.numeric_value {
            Some(v) => trace!(node_id = %change.node_id, "new value: {}", v),
            None => debug!(
                node_id = %change.node_id,
                type_name,
                "value type without numeric mapping"
            ),
        }

        (registration.handler)(&change);
        Some(change)
    }

    fn registration(&self, client_handle: u32) -> Option<&Registration> {
        let index = usize::try_from(client_handle).ok()?.checked_sub(1)?;
        self.registrations.get(index)
    }
}
