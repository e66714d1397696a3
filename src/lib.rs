// src/lib.rs
//! CVM component runtime
//!
//! Components communicate only through typed ports joined by connectors.
//! Each deployment target hosts a [`Cvm`] context; contexts reach each other
//! over a framed TCP transport so that a port URI resolves the same way
//! whether its owner is local or remote.
//!
//! # Architecture
//!
//! - **component**: component identity, lifecycle and executors
//! - **port**: inbound/outbound ports and connectors
//! - **cvm**: deployment context, transport, dynamic creation and connection
//! - **sync**: distributed semaphores, barriers, latches and queues
//! - **observability**: tracing and metrics installation
//! - **utils**: configuration and errors

pub mod component;
pub mod cvm;
pub mod observability;
pub mod port;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use component::{Component, ComponentCore, ComponentHandle, ServiceContract};
pub use cvm::{Cvm, DynamicComponentCreator, DynamicCreationClient};
pub use port::{InboundPort, OutboundPort, Reply, ServiceHandler};
pub use sync::{GroupId, SynchronizerManager, SynchronizerManagerClient, ToolKind};
pub use utils::config::CvmConfig;
pub use utils::errors::{CvmError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
