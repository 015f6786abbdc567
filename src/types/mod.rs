//! OPC UA type definitions used by the lifecycle controller.
//!
//! This module contains the decoded protocol types the controller works with:
//!
//! - `ChannelState` / `SessionState` - Transport and session states
//! - `StatusCode` - Service and value status
//! - `NodeId` - Node identifiers (`ns=2;s=...`)
//! - `Endpoint` - Validated server URL
//! - `Variant` / `DataValue` - Values with status and timestamps
//! - `ServiceRequest` / `ServiceResponse` - Service calls

mod endpoint;
mod node;
mod service;
mod state;
mod status;
mod value;

pub use endpoint::*;
pub use node::*;
pub use service::*;
pub use state::*;
pub use status::*;
pub use value::*;
