//! # voltage_opcua
//!
//! OPC UA client connection and subscription lifecycle controller for Rust.
//!
//! This crate drives one client connection through secure channel, session,
//! subscription and monitored items, and delivers data-change notifications
//! to consumer handlers. The transport stack (sockets, encoding, security)
//! sits behind the [`Transport`] trait.
//!
//! ## Features
//!
//! - **Event-driven**: Lifecycle events and data changes via channels
//! - **Single task**: All protocol work advances in one pump loop
//! - **Clean shutdown**: Ctrl-C drains the session instead of aborting
//! - **Testable**: In-process [`SimTransport`] with failure injection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_opcua::{ClientConfig, LifecycleController, LoggingMode, NodeId};
//! use voltage_opcua::transport::sim::SimTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> voltage_opcua::Result<()> {
//!     voltage_opcua::logging::init_logging(LoggingMode::Compact)?;
//!
//!     let config = ClientConfig::new("opc.tcp://m3:48400/UA/ComServerWrapper");
//!     let mut controller = LifecycleController::new(config, SimTransport::new());
//!
//!     let node = NodeId::parse("ns=2;s=0:TEST1/SGGN1/OUT.CV")?;
//!     controller.monitor(node, None, |change| {
//!         println!("{} = {:?}", change.node_id, change.numeric_value);
//!     })?;
//!
//!     let cancel = CancellationToken::new();
//!     voltage_opcua::signal::cancel_on_ctrl_c(cancel.clone());
//!     controller.run(cancel).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> ChannelOpen -> SessionActivating
//!     -> Subscribing -> Monitoring -> Draining -> Disconnected
//! ```
//!
//! Losing the channel or the session resets the subscription records and
//! moves back to `Connecting`; the subscription is created again once the
//! session is re-activated.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod signal;
pub mod subscription;
pub mod tracker;
pub mod transport;
pub mod types;

// Re-export main types
pub use config::{ClientConfig, OperatingMode, RetryPolicy};
pub use controller::{ControllerEvent, LifecycleController, LifecycleState};
pub use dispatcher::{DataChange, DataChangeHandler};
pub use error::{OpcUaError, Result};
pub use logging::LoggingMode;
pub use subscription::{MonitoredItemRecord, SubscriptionRecord};
pub use tracker::{StateTracker, StateTransition};
pub use transport::sim::SimTransport;
pub use transport::{Transport, TransportEvent};
pub use types::*;
