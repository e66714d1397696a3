// src/cvm/mod.rs
//! Deployment context ("CVM") and the services every node runs
//!
//! - **Context**: components, published ports, peer links
//! - **Registry**: published ports and component factories
//! - **Transport**: TCP links between nodes
//! - **Creation**: remote component creation service
//! - **Dynamic Connection**: on-demand port provisioning

pub mod context;
pub mod creation;
pub mod dynamic_connection;
pub mod registry;
pub mod transport;

pub use context::{Cvm, ResolvedPeer, WeakCvm};
pub use creation::{
    CreationRequest, CreationResponse, DynamicComponentCreationContract, DynamicComponentCreator,
    DynamicCreationClient,
};
pub use dynamic_connection::{
    connect_dynamically, DynamicConnectionHandler, DynamicConnectionRequest,
    DynamicConnectionRequestContract, DynamicConnectionResponse, DynamicPortProvider,
};
pub use registry::{FactoryRegistry, PublishedPort};
pub use transport::{RemoteLink, TransportServer};
