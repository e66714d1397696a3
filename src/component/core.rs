// src/component/core.rs
//! State shared by every component: identity, declared contracts, owned
//! ports, lifecycle state and the executor.

use crate::component::contract::ServiceContract;
use crate::component::executor::{ComponentExecutor, ScheduledTask};
use crate::component::failure_log::{ComponentFailure, FailureLog};
use crate::component::lifecycle::LifecycleState;
use crate::component::uri;
use crate::cvm::{Cvm, WeakCvm};
use crate::port::{PortDirection, PortEntry};
use crate::utils::errors::{CvmError, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Core of a component
///
/// Components embed a `ComponentCore` and expose it through
/// [`Component::core`](crate::component::Component::core). Ports hold the
/// owner's URI and executor, never the component itself.
pub struct ComponentCore {
    uri: String,
    node_id: String,
    cvm: WeakCvm,
    offered: RwLock<HashSet<String>>,
    required: RwLock<HashSet<String>>,
    ports: RwLock<Vec<Arc<dyn PortEntry>>>,
    mandatory: RwLock<HashSet<String>>,
    state: RwLock<LifecycleState>,
    pub(crate) lifecycle: tokio::sync::Mutex<()>,
    executor: ComponentExecutor,
}

impl ComponentCore {
    /// Create a core with the deployment's default executor width
    pub fn new(cvm: &Cvm, hint: &str) -> Self {
        Self::with_threads(cvm, hint, cvm.config().executor.threads)
    }

    /// Create a core whose executor runs up to `threads` tasks at once
    pub fn with_threads(cvm: &Cvm, hint: &str, threads: usize) -> Self {
        let uri = uri::generate(cvm.node_id(), hint);
        let failures = Arc::new(FailureLog::new(
            uri.clone(),
            cvm.config().executor.failure_log_capacity,
        ));
        let executor = ComponentExecutor::new(uri.clone(), threads, failures);

        debug!("Component {} created", uri);

        Self {
            node_id: cvm.node_id().to_string(),
            cvm: cvm.downgrade(),
            offered: RwLock::new(HashSet::new()),
            required: RwLock::new(HashSet::new()),
            ports: RwLock::new(Vec::new()),
            mandatory: RwLock::new(HashSet::new()),
            state: RwLock::new(LifecycleState::Created),
            lifecycle: tokio::sync::Mutex::new(()),
            executor,
            uri,
        }
    }

    /// URI of this component
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Node the component is deployed on
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Deployment context this component lives in
    pub fn cvm(&self) -> Result<Cvm> {
        self.cvm.upgrade()
    }

    pub(crate) fn weak_cvm(&self) -> &WeakCvm {
        &self.cvm
    }

    pub fn executor(&self) -> &ComponentExecutor {
        &self.executor
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }

    /// Declare an offered contract (duplicates are ignored)
    pub fn add_offered_interface<C: ServiceContract>(&self) {
        self.add_offered_interface_id(C::ID);
    }

    /// Declare a required contract (duplicates are ignored)
    pub fn add_required_interface<C: ServiceContract>(&self) {
        self.add_required_interface_id(C::ID);
    }

    /// Declare an offered contract by identifier
    pub fn add_offered_interface_id(&self, contract_id: &str) {
        self.offered.write().insert(contract_id.to_string());
    }

    /// Declare a required contract by identifier
    pub fn add_required_interface_id(&self, contract_id: &str) {
        self.required.write().insert(contract_id.to_string());
    }

    /// Whether `contract_id` is declared as offered
    pub fn offers(&self, contract_id: &str) -> bool {
        self.offered.read().contains(contract_id)
    }

    /// Whether `contract_id` is declared as required
    pub fn requires(&self, contract_id: &str) -> bool {
        self.required.read().contains(contract_id)
    }

    /// Offered contract identifiers, sorted
    pub fn offered_interfaces(&self) -> Vec<String> {
        self.offered.read().iter().cloned().collect()
    }

    /// Required contract identifiers, sorted
    pub fn required_interfaces(&self) -> Vec<String> {
        self.required.read().iter().cloned().collect()
    }

    pub(crate) fn add_port(&self, port: Arc<dyn PortEntry>) -> Result<()> {
        if self.state() == LifecycleState::Terminated {
            return Err(CvmError::Construction(format!(
                "Component {} is terminated",
                self.uri
            )));
        }

        let mut ports = self.ports.write();
        if ports.iter().any(|p| p.uri() == port.uri()) {
            return Err(CvmError::Construction(format!(
                "Port {} already exists on {}",
                port.uri(),
                self.uri
            )));
        }

        debug!("Port {} ({:?}) added to {}", port.uri(), port.direction(), self.uri);
        ports.push(port);
        Ok(())
    }

    /// Detach a port from this component without tearing it down
    pub fn remove_port(&self, port_uri: &str) -> Option<Arc<dyn PortEntry>> {
        self.mandatory.write().remove(port_uri);
        let mut ports = self.ports.write();
        let index = ports.iter().position(|p| p.uri() == port_uri)?;
        Some(ports.remove(index))
    }

    /// Tear down and remove a port
    pub async fn destroy_port(&self, port_uri: &str) -> Result<()> {
        let port = self.remove_port(port_uri).ok_or_else(|| {
            CvmError::Connection(format!("Port {} not owned by {}", port_uri, self.uri))
        })?;
        port.teardown().await
    }

    /// Owned ports in creation order
    pub fn ports(&self) -> Vec<Arc<dyn PortEntry>> {
        self.ports.read().clone()
    }

    /// URIs of every port the component owns
    pub fn port_uris(&self) -> Vec<String> {
        self.ports.read().iter().map(|p| p.uri().to_string()).collect()
    }

    /// Typed access to an owned port
    pub fn find_port<P: Any + Send + Sync>(&self, port_uri: &str) -> Option<Arc<P>> {
        let port = self
            .ports
            .read()
            .iter()
            .find(|p| p.uri() == port_uri)
            .cloned()?;
        port.into_any().downcast::<P>().ok()
    }

    /// Require an outbound port to be connected before `start` succeeds
    pub fn mark_mandatory(&self, port_uri: &str) -> Result<()> {
        let is_outbound = self
            .ports
            .read()
            .iter()
            .any(|p| p.uri() == port_uri && p.direction() == PortDirection::Outbound);

        if !is_outbound {
            return Err(CvmError::Construction(format!(
                "{} is not an outbound port of {}",
                port_uri, self.uri
            )));
        }

        self.mandatory.write().insert(port_uri.to_string());
        Ok(())
    }

    /// Mandatory outbound ports that are not connected
    pub fn missing_connections(&self) -> Vec<String> {
        let mandatory = self.mandatory.read();
        self.ports
            .read()
            .iter()
            .filter(|p| mandatory.contains(p.uri()) && !p.is_connected())
            .map(|p| p.uri().to_string())
            .collect()
    }

    /// See [`ComponentExecutor::handle_request_sync`]
    pub async fn handle_request_sync<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.executor.handle_request_sync(task).await
    }

    /// See [`ComponentExecutor::handle_request_async`]
    pub fn handle_request_async<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.executor.handle_request_async(task)
    }

    /// Run `task` once after `delay`
    pub fn schedule_task<F, Fut>(&self, task: F, delay: Duration) -> Result<ScheduledTask>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.executor.schedule_task(task, delay)
    }

    /// Run `task` every `period`, starting after `delay`
    pub fn schedule_task_at_fixed_rate<F, Fut>(
        &self,
        task: F,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduledTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.executor.schedule_task_at_fixed_rate(task, delay, period)
    }

    /// Failures of asynchronous requests and scheduled tasks since the last call
    pub fn recent_failures(&self) -> Vec<ComponentFailure> {
        self.executor.failures().drain()
    }
}
