// src/port/inbound.rs
//! Inbound ports: endpoints through which a component offers a service

use crate::component::contract::{DispatchMode, ServiceContract};
use crate::component::core::ComponentCore;
use crate::component::executor::ComponentExecutor;
use crate::component::uri;
use crate::utils::config::DeploymentMode;
use crate::cvm::registry::PublishedPort;
use crate::cvm::{Cvm, WeakCvm};
use crate::port::reply::Reply;
use crate::port::{PortDirection, PortEntry};
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Implementation of a contract's operations
///
/// `handle` runs on the owning component's executor.
#[async_trait]
pub trait ServiceHandler<C: ServiceContract>: Send + Sync + 'static {
    async fn handle(&self, request: C::Request) -> Result<Reply<C::Response>>;
}

/// Type-erased entry point used by the remote transport
#[async_trait]
pub trait WireEndpoint: Send + Sync {
    fn contract_id(&self) -> &'static str;

    /// Decode `payload`, serve it, encode the response (`None` when the
    /// operation is fire-and-forget)
    async fn dispatch_wire(&self, payload: serde_json::Value) -> Result<Option<serde_json::Value>>;
}

/// Port accepting calls for contract `C`
pub struct InboundPort<C: ServiceContract> {
    uri: String,
    owner_uri: String,
    executor: ComponentExecutor,
    handler: Arc<dyn ServiceHandler<C>>,
    cvm: WeakCvm,
    published: AtomicBool,
}

impl<C: ServiceContract> InboundPort<C> {
    /// Create a port with a fresh URI on `owner`
    ///
    /// The owner must already offer `C`.
    pub fn create(owner: &ComponentCore, handler: Arc<dyn ServiceHandler<C>>) -> Result<Arc<Self>> {
        let uri = uri::generate(owner.node_id(), "inbound");
        Self::create_with_uri(owner, uri, handler)
    }

    /// Create a port with a caller-chosen (typically well-known) URI
    pub fn create_with_uri(
        owner: &ComponentCore,
        port_uri: impl Into<String>,
        handler: Arc<dyn ServiceHandler<C>>,
    ) -> Result<Arc<Self>> {
        let port_uri = port_uri.into();

        if !owner.offers(C::ID) {
            return Err(CvmError::Construction(format!(
                "{} does not offer {}; cannot create inbound port",
                owner.uri(),
                C::ID
            )));
        }

        let node = uri::node_of(&port_uri).map_err(|e| CvmError::Construction(e.to_string()))?;
        if node != owner.node_id() {
            return Err(CvmError::Construction(format!(
                "Port URI {} does not belong to node {}",
                port_uri,
                owner.node_id()
            )));
        }

        let port = Arc::new(Self {
            uri: port_uri,
            owner_uri: owner.uri().to_string(),
            executor: owner.executor().clone(),
            handler,
            cvm: owner.weak_cvm().clone(),
            published: AtomicBool::new(false),
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

    /// Whether the port is in the registry
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Make the port reachable from other deployment targets
    ///
    /// Only valid in a distributed deployment.
    pub fn publish(self: &Arc<Self>) -> Result<()> {
        let cvm = self.cvm.upgrade()?;
        if cvm.mode() != DeploymentMode::Distributed {
            return Err(CvmError::Connection(format!(
                "Cannot publish {} remotely in a local deployment",
                self.uri
            )));
        }
        self.register(&cvm, true)
    }

    /// Make the port reachable inside this process only
    ///
    /// Only valid in a local deployment.
    pub fn local_publish(self: &Arc<Self>) -> Result<()> {
        let cvm = self.cvm.upgrade()?;
        if cvm.mode() != DeploymentMode::Local {
            return Err(CvmError::Connection(format!(
                "Cannot publish {} locally in a distributed deployment",
                self.uri
            )));
        }
        self.register(&cvm, false)
    }

    /// Publish the way the surrounding deployment requires
    pub fn publish_for_mode(self: &Arc<Self>) -> Result<()> {
        let cvm = self.cvm.upgrade()?;
        match cvm.mode() {
            DeploymentMode::Local => self.register(&cvm, false),
            DeploymentMode::Distributed => self.register(&cvm, true),
        }
    }

    fn register(self: &Arc<Self>, cvm: &Cvm, remote_visible: bool) -> Result<()> {
        if self.published.swap(true, Ordering::AcqRel) {
            return Err(CvmError::Connection(format!(
                "Port {} is already published",
                self.uri
            )));
        }

        if let Err(e) = cvm.register_port(&self.uri, PublishedPort::new(self.clone(), remote_visible)) {
            self.published.store(false, Ordering::Release);
            return Err(e);
        }

        info!("Published {} ({}, remote: {})", self.uri, C::ID, remote_visible);
        Ok(())
    }

    /// Withdraw the port from the registry
    pub fn unpublish(&self) -> Result<()> {
        if !self.published.swap(false, Ordering::AcqRel) {
            return Err(CvmError::Connection(format!(
                "Port {} is not published",
                self.uri
            )));
        }

        let cvm = self.cvm.upgrade()?;
        cvm.unregister_port(&self.uri);
        debug!("Unpublished {}", self.uri);
        Ok(())
    }

    /// Execute `request` against the owner
    ///
    /// Synchronous operations run through the owner's executor and their
    /// result (possibly after parking) is returned; asynchronous ones are
    /// queued and `None` is returned at once.
    pub async fn serve(&self, request: C::Request) -> Result<Option<C::Response>> {
        let handler = Arc::clone(&self.handler);

        match C::dispatch_mode(&request) {
            DispatchMode::Sync => {
                debug!("{} <- sync {:?}", self.uri, request);
                let reply = self
                    .executor
                    .handle_request_sync(move || async move { handler.handle(request).await })
                    .await?;
                reply.resolve().await.map(Some)
            }
            DispatchMode::Async => {
                debug!("{} <- async {:?}", self.uri, request);
                self.executor.handle_request_async(move || async move {
                    handler.handle(request).await.map(|_| ())
                })?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<C: ServiceContract> PortEntry for InboundPort<C> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn direction(&self) -> PortDirection {
        PortDirection::Inbound
    }

    fn contract_id(&self) -> &'static str {
        C::ID
    }

    fn is_connected(&self) -> bool {
        self.is_published()
    }

    async fn teardown(&self) -> Result<()> {
        if self.is_published() {
            self.unpublish()?;
        }
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[async_trait]
impl<C: ServiceContract> WireEndpoint for InboundPort<C> {
    fn contract_id(&self) -> &'static str {
        C::ID
    }

    async fn dispatch_wire(&self, payload: serde_json::Value) -> Result<Option<serde_json::Value>> {
        let request: C::Request = serde_json::from_value(payload)?;
        match self.serve(request).await? {
            Some(response) => Ok(Some(serde_json::to_value(response)?)),
            None => Ok(None),
        }
    }
}
