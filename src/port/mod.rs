// src/port/mod.rs
//! Ports and connectors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐                                     ┌─────────────┐
//! │ Component A │                                     │ Component B │
//! │             │   OutboundPort<C> ──► Connector ──► │ InboundPort │
//! │  (requires) │                        │            │  (offers)   │
//! └─────────────┘                        │            └──────┬──────┘
//!                                 local: Weak ref            │
//!                                 remote: RemoteLink         ▼
//!                                                     B's executor
//! ```
//!
//! Ports are owned by exactly one component and addressed by URI.

pub mod connector;
pub mod inbound;
pub mod outbound;
pub mod reply;

use crate::utils::errors::Result;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

pub use connector::{Connector, ConnectorKind, DataTransform, StandardConnector, TwoWayConnector};
pub use inbound::{InboundPort, ServiceHandler, WireEndpoint};
pub use outbound::OutboundPort;
pub use reply::{park, Continuation, Parked, Reply};

/// Whether a port serves or issues calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Inbound,
    Outbound,
}

/// Type-erased view of a port, as stored by its owner
#[async_trait]
pub trait PortEntry: Send + Sync {
    fn uri(&self) -> &str;

    fn direction(&self) -> PortDirection;

    fn contract_id(&self) -> &'static str;

    /// Outbound: connected to a peer. Inbound: published.
    fn is_connected(&self) -> bool;

    /// Disconnect or unpublish
    async fn teardown(&self) -> Result<()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
