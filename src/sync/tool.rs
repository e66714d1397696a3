// src/sync/tool.rs
//! Shared shell of the synchronization tool components
//!
//! A tool is a [`ToolComponent`] wrapping a [`ToolService`]. The service
//! holds the primitive's state and answers each request without awaiting:
//! either immediately, or by parking the caller and keeping the
//! continuation until a later request resumes it. Requests run on the
//! tool's serialized executor, so the state has a single writer.

use crate::component::contract::ServiceContract;
use crate::component::core::ComponentCore;
use crate::component::executor::ComponentExecutor;
use crate::component::lifecycle::{Component, ComponentHandle};
use crate::cvm::dynamic_connection::DynamicPortProvider;
use crate::cvm::Cvm;
use crate::port::inbound::{InboundPort, ServiceHandler};
use crate::port::reply::Reply;
use crate::sync::contracts::ToolKind;
use crate::sync::group::GroupId;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

type Request<S> = <<S as ToolService>::Contract as ServiceContract>::Request;
type Response<S> = <<S as ToolService>::Contract as ServiceContract>::Response;

/// State and operations of one synchronization primitive
pub trait ToolService: Send + Sync + Sized + 'static {
    type Contract: ServiceContract;

    const KIND: ToolKind;

    /// Build the initial state from the group parameter
    fn new(group: &GroupId, executor: &ComponentExecutor) -> Result<Self>;

    /// Answer `request`, parking the caller if it must wait
    fn serve(&self, request: Request<Self>) -> Result<Reply<Response<Self>>>;

    /// Fail every parked caller; later requests fail as well
    fn close(&self);
}

pub(crate) fn terminated(kind: ToolKind) -> CvmError {
    CvmError::ComponentTerminated(format!("{} tool is shutting down", kind))
}

struct ToolHandler<S> {
    service: Arc<S>,
}

#[async_trait]
impl<S: ToolService> ServiceHandler<S::Contract> for ToolHandler<S> {
    async fn handle(&self, request: Request<S>) -> Result<Reply<Response<S>>> {
        let reply = self.service.serve(request)?;
        if !reply.is_ready() {
            metrics::counter!("cvm_tool_parked_total", "tool" => S::KIND.label()).increment(1);
        }
        Ok(reply)
    }
}

/// Component hosting a synchronization primitive for one group
pub struct ToolComponent<S: ToolService> {
    core: ComponentCore,
    group: GroupId,
    service: Arc<S>,
}

impl<S: ToolService> ToolComponent<S> {
    /// Create the tool for `group`; the group parameter sizes the primitive
    pub fn create(cvm: &Cvm, group: GroupId) -> Result<Arc<Self>> {
        let core = ComponentCore::new(cvm, S::KIND.label());
        core.add_offered_interface::<S::Contract>();

        let service = Arc::new(S::new(&group, core.executor())?);
        info!("Created {} tool {} for group {}", S::KIND, core.uri(), group);

        Ok(Arc::new(Self {
            core,
            group,
            service,
        }))
    }

    /// Make the tool creatable by type tag with arguments `[name, parameter]`
    pub fn register_factory(cvm: &Cvm) {
        cvm.register_factory(S::KIND.type_tag(), |cvm: &Cvm, (name, parameter): (String, u32)| {
            let group = GroupId::new(name, parameter)?;
            Ok(ComponentHandle::new(Self::create(cvm, group)?))
        });
    }

    /// Group the tool was created for
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn kind(&self) -> ToolKind {
        S::KIND
    }

    /// The state machine behind the tool ports
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Create and publish a new client port on this tool
    pub fn open_port(&self) -> Result<Arc<InboundPort<S::Contract>>> {
        let handler = Arc::new(ToolHandler {
            service: Arc::clone(&self.service),
        });
        let port = InboundPort::<S::Contract>::create(&self.core, handler)?;
        port.publish_for_mode()?;
        debug!("Opened {} on {} tool {}", port.uri(), S::KIND, self.core.uri());
        Ok(port)
    }
}

#[async_trait]
impl<S: ToolService> Component for ToolComponent<S> {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn finalise(&self) -> Result<()> {
        self.service.close();
        Ok(())
    }
}

#[async_trait]
impl<S: ToolService> DynamicPortProvider for ToolComponent<S> {
    async fn create_dynamic_port(&self, contract_id: &str) -> Result<String> {
        if contract_id != <S::Contract as ServiceContract>::ID {
            return Err(CvmError::ToolProtocol(format!(
                "{} tool does not offer {}",
                S::KIND,
                contract_id
            )));
        }
        Ok(self.open_port()?.uri().to_string())
    }

    async fn destroy_dynamic_port(&self, port_uri: &str) -> Result<()> {
        self.core.destroy_port(port_uri).await
    }
}
