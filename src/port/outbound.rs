// src/port/outbound.rs
//! Outbound ports: endpoints through which a component calls a service

use crate::component::contract::ServiceContract;
use crate::component::core::ComponentCore;
use crate::component::uri;
use crate::cvm::WeakCvm;
use crate::port::connector::{Connector, ConnectorKind, StandardConnector};
use crate::port::{PortDirection, PortEntry};
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

/// Port issuing calls for contract `C`
pub struct OutboundPort<C: ServiceContract> {
    uri: String,
    owner_uri: String,
    cvm: WeakCvm,
    connector: RwLock<Option<Arc<dyn Connector<C>>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl<C: ServiceContract> OutboundPort<C> {
    /// Create an unconnected port on `owner`
    ///
    /// The owner must already require `C`.
    pub fn create(owner: &ComponentCore) -> Result<Arc<Self>> {
        if !owner.requires(C::ID) {
            return Err(CvmError::Construction(format!(
                "{} does not require {}; cannot create outbound port",
                owner.uri(),
                C::ID
            )));
        }

        let port = Arc::new(Self {
            uri: uri::generate(owner.node_id(), "outbound"),
            owner_uri: owner.uri().to_string(),
            cvm: owner.weak_cvm().clone(),
            connector: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
        });

        owner.add_port(port.clone())?;
        Ok(port)
    }

    /// URI of this port
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URI of the owning component
    pub fn owner_uri(&self) -> &str {
        &self.owner_uri
    }

    pub fn is_connected(&self) -> bool {
        self.connector.read().is_some()
    }

    /// URI of the inbound port this port is connected to
    pub fn peer_uri(&self) -> Option<String> {
        self.connector.read().as_ref().map(|c| c.peer_uri().to_string())
    }

    /// Connect to `peer_uri` with a connector of the given kind
    ///
    /// Fails if already connected or if the peer cannot be resolved.
    pub async fn do_connection(&self, peer_uri: &str, kind: &dyn ConnectorKind<C>) -> Result<()> {
        let _connecting = self.connecting.lock().await;

        if let Some(existing) = self.peer_uri() {
            return Err(CvmError::Connection(format!(
                "Port {} is already connected to {}",
                self.uri, existing
            )));
        }

        let cvm = self.cvm.upgrade()?;
        let connector = kind.connect(&cvm, peer_uri).await?;
        *self.connector.write() = Some(connector);

        metrics::counter!("cvm_connections_total").increment(1);
        info!("Connected {} -> {} ({})", self.uri, peer_uri, C::ID);
        Ok(())
    }

    /// Connect with a [`StandardConnector`]
    pub async fn connect(&self, peer_uri: &str) -> Result<()> {
        self.do_connection(peer_uri, &StandardConnector).await
    }

    /// Drop the current connector
    ///
    /// Fails if the port is not connected.
    pub async fn do_disconnection(&self) -> Result<()> {
        let _connecting = self.connecting.lock().await;

        let connector = self.connector.write().take().ok_or_else(|| {
            CvmError::Connection(format!("Port {} is not connected", self.uri))
        })?;

        info!("Disconnected {} from {}", self.uri, connector.peer_uri());
        Ok(())
    }

    fn current_connector(&self) -> Result<Arc<dyn Connector<C>>> {
        self.connector
            .read()
            .clone()
            .ok_or_else(|| CvmError::Connection(format!("Port {} is not connected", self.uri)))
    }

    /// Forward `request`; `None` when the peer handles it fire-and-forget
    pub async fn invoke(&self, request: C::Request) -> Result<Option<C::Response>> {
        let connector = self.current_connector()?;
        debug!("{} -> {:?}", self.uri, request);
        connector.forward(request).await
    }

    /// Call an operation that returns a result
    pub async fn call(&self, request: C::Request) -> Result<C::Response> {
        self.invoke(request).await?.ok_or_else(|| {
            CvmError::TaskFailed(format!(
                "Operation of {} is fire-and-forget and returns no result",
                C::ID
            ))
        })
    }

    /// Call an operation ignoring any result
    pub async fn send(&self, request: C::Request) -> Result<()> {
        self.invoke(request).await.map(|_| ())
    }
}

#[async_trait]
impl<C: ServiceContract> PortEntry for OutboundPort<C> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn direction(&self) -> PortDirection {
        PortDirection::Outbound
    }

    fn contract_id(&self) -> &'static str {
        C::ID
    }

    fn is_connected(&self) -> bool {
        OutboundPort::is_connected(self)
    }

    async fn teardown(&self) -> Result<()> {
        if OutboundPort::is_connected(self) {
            self.do_disconnection().await?;
        }
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
