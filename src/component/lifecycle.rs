// src/component/lifecycle.rs
//! Component trait and lifecycle driver
//!
//! ```text
//! Created ──start()──► Started ──shutdown()──► ShuttingDown ──► Terminated
//!    └───────────────────shutdown()──────────────┘
//! ```

use crate::component::core::ComponentCore;
use crate::port::PortDirection;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle state of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    ShuttingDown,
    Terminated,
}

/// A unit of computation owning ports and an executor
///
/// The hooks run on the caller of the lifecycle operation, not on the
/// component's executor.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    fn core(&self) -> &ComponentCore;

    /// Called once when the component starts
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Main activity, called after every component of a deployment started
    async fn execute(&self) -> Result<()> {
        Ok(())
    }

    /// Called at shutdown before ports are torn down
    async fn finalise(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle driving a component through its lifecycle
#[derive(Clone)]
pub struct ComponentHandle {
    component: Arc<dyn Component>,
    any: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("uri", &self.uri())
            .field("state", &self.state())
            .finish()
    }
}

impl ComponentHandle {
    /// Wrap a component for deployment
    pub fn new<T: Component>(component: Arc<T>) -> Self {
        Self {
            any: component.clone(),
            component,
        }
    }

    pub fn uri(&self) -> &str {
        self.component.core().uri()
    }

    /// Shared state of the wrapped component
    pub fn core(&self) -> &ComponentCore {
        self.component.core()
    }

    pub fn state(&self) -> LifecycleState {
        self.core().state()
    }

    /// Concrete component behind this handle
    pub fn downcast<T: Component>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.any).downcast::<T>().ok()
    }

    /// Created -> Started
    ///
    /// Fails if a mandatory outbound port is unconnected or the start hook
    /// fails; the component then stays Created.
    pub async fn start(&self) -> Result<()> {
        let core = self.core();
        let _guard = core.lifecycle.lock().await;

        if core.state() != LifecycleState::Created {
            return Err(CvmError::Lifecycle(format!(
                "Cannot start {} in state {:?}",
                core.uri(),
                core.state()
            )));
        }

        let missing = core.missing_connections();
        if !missing.is_empty() {
            return Err(CvmError::Lifecycle(format!(
                "Cannot start {}: required ports unconnected: {}",
                core.uri(),
                missing.join(", ")
            )));
        }

        self.component.start().await?;
        core.set_state(LifecycleState::Started);

        info!("Component {} started", core.uri());
        Ok(())
    }

    /// Run the component's main activity
    pub async fn execute(&self) -> Result<()> {
        if self.state() != LifecycleState::Started {
            return Err(CvmError::Lifecycle(format!(
                "Cannot execute {} in state {:?}",
                self.uri(),
                self.state()
            )));
        }

        self.component.execute().await
    }

    /// Tear the component down
    ///
    /// Teardown is best-effort: a port that fails to disconnect or unpublish
    /// is reported, and the remaining ports are still processed. Shutting
    /// down a terminated component is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let core = self.core();
        let _guard = core.lifecycle.lock().await;

        if core.state() == LifecycleState::Terminated {
            return Ok(());
        }

        info!("Component {} shutting down", core.uri());
        core.set_state(LifecycleState::ShuttingDown);

        let mut failures: Vec<String> = Vec::new();

        if let Err(e) = self.component.finalise().await {
            warn!("Finalise of {} failed: {}", core.uri(), e);
            failures.push(format!("finalise: {}", e));
        }

        // Outbound ports first so peers stop hearing from us before we stop serving
        let mut ports = core.ports();
        ports.sort_by_key(|p| p.direction() != PortDirection::Outbound);

        for port in ports {
            core.remove_port(port.uri());
            if let Err(e) = port.teardown().await {
                warn!("Teardown of port {} failed: {}", port.uri(), e);
                failures.push(format!("{}: {}", port.uri(), e));
            }
        }

        let grace = core
            .cvm()
            .map(|cvm| cvm.config().executor.shutdown_grace())
            .unwrap_or(Duration::from_secs(2));

        if let Err(e) = core.executor().shutdown(grace).await {
            failures.push(e.to_string());
        }

        core.set_state(LifecycleState::Terminated);
        if let Ok(cvm) = core.cvm() {
            cvm.forget_component(core.uri());
        }

        info!("Component {} terminated", core.uri());

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CvmError::ShutdownFailure(failures.join("; ")))
        }
    }
}

/// Component with no behaviour of its own
///
/// Useful as the owner of client-side outbound ports.
pub struct PlainComponent {
    core: ComponentCore,
}

impl PlainComponent {
    pub fn new(core: ComponentCore) -> Arc<Self> {
        Arc::new(Self { core })
    }
}

impl Component for PlainComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }
}
