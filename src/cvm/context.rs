// src/cvm/context.rs
//! Deployment context
//!
//! A [`Cvm`] owns every component deployed on one node, the registry of
//! published ports and the links to peer nodes. Components and ports refer
//! back to it through a [`WeakCvm`], so dropping the last `Cvm` releases
//! everything.

use crate::component::contract::ServiceContract;
use crate::component::lifecycle::{ComponentHandle, LifecycleState};
use crate::component::uri;
use crate::cvm::registry::{FactoryRegistry, PublishedPort};
use crate::cvm::transport::{RemoteLink, TransportServer};
use crate::port::inbound::{InboundPort, WireEndpoint};
use crate::utils::config::{CvmConfig, DeploymentMode};
use crate::utils::errors::{CvmError, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Where a port URI resolved to
pub enum ResolvedPeer<C: ServiceContract> {
    /// Published in this process
    Local(Arc<InboundPort<C>>),
    /// Published on another node, reached through this link
    Remote(Arc<RemoteLink>),
}

struct CvmInner {
    config: CvmConfig,
    components: DashMap<String, ComponentHandle>,
    ports: DashMap<String, PublishedPort>,
    factories: FactoryRegistry,
    peers: RwLock<HashMap<String, SocketAddr>>,
    links: DashMap<String, Arc<RemoteLink>>,
    link_setup: tokio::sync::Mutex<()>,
    server: Mutex<Option<TransportServer>>,
}

/// Deployment context of one node
#[derive(Clone)]
pub struct Cvm {
    inner: Arc<CvmInner>,
}

/// Non-owning reference to a [`Cvm`]
#[derive(Clone, Default)]
pub struct WeakCvm {
    inner: Weak<CvmInner>,
}

impl WeakCvm {
    /// Fails once the context has been dropped
    pub fn upgrade(&self) -> Result<Cvm> {
        self.inner
            .upgrade()
            .map(|inner| Cvm { inner })
            .ok_or_else(|| CvmError::ComponentTerminated("Deployment context is gone".to_string()))
    }
}

impl std::fmt::Debug for Cvm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cvm")
            .field("node", &self.node_id())
            .field("mode", &self.mode())
            .field("components", &self.inner.components.len())
            .finish()
    }
}

impl Cvm {
    /// Create a deployment context
    pub fn new(config: CvmConfig) -> Result<Self> {
        config.validate()?;

        info!(
            "Creating deployment context for node {} ({:?})",
            config.node.id, config.node.mode
        );

        let peers = config.peers.clone();
        Ok(Self {
            inner: Arc::new(CvmInner {
                config,
                components: DashMap::new(),
                ports: DashMap::new(),
                factories: FactoryRegistry::new(),
                peers: RwLock::new(peers),
                links: DashMap::new(),
                link_setup: tokio::sync::Mutex::new(()),
                server: Mutex::new(None),
            }),
        })
    }

    /// Single-process deployment with default settings
    pub fn local(node_id: &str) -> Result<Self> {
        Self::new(CvmConfig::local(node_id))
    }

    /// Identifier of this deployment target
    pub fn node_id(&self) -> &str {
        &self.inner.config.node.id
    }

    pub fn mode(&self) -> DeploymentMode {
        self.inner.config.node.mode
    }

    pub fn is_distributed(&self) -> bool {
        self.mode() == DeploymentMode::Distributed
    }

    pub fn config(&self) -> &CvmConfig {
        &self.inner.config
    }

    /// Non-owning handle for components and ports
    pub fn downgrade(&self) -> WeakCvm {
        WeakCvm {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---- components ----

    /// Add a component to this deployment and return its URI
    pub fn deploy(&self, handle: ComponentHandle) -> Result<String> {
        let uri = handle.uri().to_string();

        if uri::node_of(&uri)? != self.node_id() {
            return Err(CvmError::Construction(format!(
                "Component {} does not belong to node {}",
                uri,
                self.node_id()
            )));
        }

        match self.inner.components.entry(uri.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CvmError::Construction(format!(
                    "Component {} is already deployed",
                    uri
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        metrics::gauge!("cvm_components").set(self.inner.components.len() as f64);
        debug!("Deployed {}", uri);
        Ok(uri)
    }

    /// Deployed component with `component_uri`, if any
    pub fn component(&self, component_uri: &str) -> Option<ComponentHandle> {
        self.inner
            .components
            .get(component_uri)
            .map(|entry| entry.value().clone())
    }

    /// Every deployed component
    pub fn components(&self) -> Vec<ComponentHandle> {
        self.inner
            .components
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn forget_component(&self, component_uri: &str) {
        if self.inner.components.remove(component_uri).is_some() {
            metrics::gauge!("cvm_components").set(self.inner.components.len() as f64);
            debug!("Forgot {}", component_uri);
        }
    }

    fn require_component(&self, component_uri: &str) -> Result<ComponentHandle> {
        self.component(component_uri).ok_or_else(|| {
            CvmError::Lifecycle(format!("No component {} on node {}", component_uri, self.node_id()))
        })
    }

    /// Start the deployed component `component_uri`
    pub async fn start_component(&self, component_uri: &str) -> Result<()> {
        self.require_component(component_uri)?.start().await
    }

    /// Run the execute hook of `component_uri`
    pub async fn execute_component(&self, component_uri: &str) -> Result<()> {
        self.require_component(component_uri)?.execute().await
    }

    /// Shut `component_uri` down and undeploy it
    pub async fn shutdown_component(&self, component_uri: &str) -> Result<()> {
        self.require_component(component_uri)?.shutdown().await
    }

    /// Start every component still in the Created state, then run their
    /// execute hooks
    pub async fn start(&self) -> Result<()> {
        let created: Vec<ComponentHandle> = self
            .components()
            .into_iter()
            .filter(|handle| handle.state() == LifecycleState::Created)
            .collect();

        for handle in &created {
            handle.start().await?;
        }

        for handle in &created {
            handle.execute().await?;
        }

        info!("Node {} started {} components", self.node_id(), created.len());
        Ok(())
    }

    /// Shut every component down, then stop the transport
    ///
    /// Best-effort: every component is processed even if some fail.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down node {}", self.node_id());

        let mut failures = Vec::new();
        for handle in self.components() {
            if let Err(e) = handle.shutdown().await {
                warn!("Shutdown of {} failed: {}", handle.uri(), e);
                failures.push(e.to_string());
            }
        }

        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.stop().await;
        }

        for entry in self.inner.links.iter() {
            entry.value().close();
        }
        self.inner.links.clear();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CvmError::ShutdownFailure(failures.join("; ")))
        }
    }

    // ---- dynamic creation ----

    /// Register a constructor for remotely creatable components
    ///
    /// Arguments are decoded from the JSON array passed to
    /// [`create_component`](Self::create_component).
    pub fn register_factory<A, F>(&self, type_tag: &str, factory: F)
    where
        A: DeserializeOwned + 'static,
        F: Fn(&Cvm, A) -> Result<ComponentHandle> + Send + Sync + 'static,
    {
        self.inner.factories.register(type_tag, factory);
    }

    /// Type tags that can be instantiated
    pub fn factory_tags(&self) -> Vec<String> {
        self.inner.factories.type_tags()
    }

    /// Instantiate and deploy a component of `type_tag`
    ///
    /// The component is left in the Created state.
    pub fn create_component(&self, type_tag: &str, args: Vec<Value>) -> Result<String> {
        let handle = self
            .inner
            .factories
            .instantiate(self, type_tag, args)
            .map_err(|e| match e {
                CvmError::CreationService(_) => e,
                other => CvmError::CreationService(format!(
                    "Constructor of '{}' failed: {}",
                    type_tag, other
                )),
            })?;

        let uri = self.deploy(handle)?;
        info!("Created {} from '{}'", uri, type_tag);
        Ok(uri)
    }

    // ---- port registry ----

    pub(crate) fn register_port(&self, port_uri: &str, port: PublishedPort) -> Result<()> {
        match self.inner.ports.entry(port_uri.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CvmError::Connection(format!(
                "A port is already published at {}",
                port_uri
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(port);
                Ok(())
            }
        }
    }

    pub(crate) fn unregister_port(&self, port_uri: &str) {
        self.inner.ports.remove(port_uri);
    }

    /// Whether `port_uri` is in the port registry
    pub fn is_published(&self, port_uri: &str) -> bool {
        self.inner.ports.contains_key(port_uri)
    }

    /// Published port for `port_uri` reachable from other nodes
    pub(crate) fn remote_endpoint(&self, port_uri: &str, contract: &str) -> Result<Arc<dyn WireEndpoint>> {
        let published = self
            .inner
            .ports
            .get(port_uri)
            .map(|entry| entry.value().clone())
            .filter(|p| p.remote_visible)
            .ok_or_else(|| {
                CvmError::Connection(format!(
                    "No remotely published port {} on node {}",
                    port_uri,
                    self.node_id()
                ))
            })?;

        if published.contract_id != contract {
            return Err(CvmError::Connection(format!(
                "Port {} carries {}, not {}",
                port_uri, published.contract_id, contract
            )));
        }

        Ok(published.wire)
    }

    /// Resolve `port_uri` to a local port or a link to its node
    pub(crate) async fn resolve<C: ServiceContract>(&self, port_uri: &str) -> Result<ResolvedPeer<C>> {
        let local = self
            .inner
            .ports
            .get(port_uri)
            .map(|entry| entry.value().clone());

        if let Some(published) = local {
            return published
                .downcast::<C>()
                .map(ResolvedPeer::Local)
                .ok_or_else(|| {
                    CvmError::Connection(format!(
                        "Port {} carries {}, not {}",
                        port_uri,
                        published.contract_id,
                        C::ID
                    ))
                });
        }

        let node = uri::node_of(port_uri)?;
        if node == self.node_id() || !self.is_distributed() {
            return Err(CvmError::Connection(format!(
                "No published port {}",
                port_uri
            )));
        }

        let link = self.link_to(node).await?;
        link.probe(port_uri, C::ID).await.map_err(|e| match e {
            CvmError::Transport(m) => CvmError::Connection(m),
            other => other,
        })?;

        Ok(ResolvedPeer::Remote(link))
    }

    // ---- peers and transport ----

    /// Record (or replace) the address of a peer node
    pub fn add_peer(&self, node_id: &str, addr: SocketAddr) {
        self.inner.peers.write().insert(node_id.to_string(), addr);
        if let Some((_, stale)) = self.inner.links.remove(node_id) {
            stale.close();
        }
        debug!("Peer {} at {}", node_id, addr);
    }

    /// Address registered for peer `node_id`
    pub fn peer_address(&self, node_id: &str) -> Option<SocketAddr> {
        self.inner.peers.read().get(node_id).copied()
    }

    async fn link_to(&self, node: &str) -> Result<Arc<RemoteLink>> {
        let cached = |cvm: &Cvm| {
            cvm.inner
                .links
                .get(node)
                .map(|entry| Arc::clone(entry.value()))
                .filter(|link| !link.is_closed())
        };

        if let Some(link) = cached(self) {
            return Ok(link);
        }

        let _setup = self.inner.link_setup.lock().await;
        if let Some(link) = cached(self) {
            return Ok(link);
        }

        let addr = self.peer_address(node).ok_or_else(|| {
            CvmError::Connection(format!("Unknown peer node '{}'", node))
        })?;

        let link = RemoteLink::connect(node, addr, &self.inner.config.transport)
            .await
            .map_err(|e| CvmError::Connection(e.message().to_string()))?;
        self.inner.links.insert(node.to_string(), Arc::clone(&link));
        Ok(link)
    }

    /// Start serving remote calls on the configured listen address
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start_transport(&self) -> Result<SocketAddr> {
        let addr = match (self.mode(), self.inner.config.node.listen_addr) {
            (DeploymentMode::Distributed, Some(addr)) => addr,
            _ => {
                return Err(CvmError::Config(
                    "Transport requires a distributed deployment with a listen address".to_string(),
                ))
            }
        };

        if let Some(addr) = self.transport_addr() {
            return Ok(addr);
        }

        let server = TransportServer::bind(addr, self.downgrade(), &self.inner.config.transport).await?;

        // Another caller may have bound first while we were binding
        let rejected = {
            let mut slot = self.inner.server.lock();
            match slot.as_ref() {
                Some(_) => Some(server),
                None => {
                    *slot = Some(server);
                    None
                }
            }
        };
        if let Some(rejected) = rejected {
            rejected.stop().await;
        }

        self.transport_addr()
            .ok_or_else(|| CvmError::Transport("Transport stopped while starting".to_string()))
    }

    /// Address the transport listens on, while running
    pub fn transport_addr(&self) -> Option<SocketAddr> {
        self.inner.server.lock().as_ref().map(|s| s.local_addr())
    }
}
