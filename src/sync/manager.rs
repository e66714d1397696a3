// src/sync/manager.rs
//! SynchronizerManager: broker of per-client access to synchronization tools
//!
//! # Architecture
//!
//! ```text
//! client ──ProvideUri{kind, group, client}──► manager (well-known port)
//!                                               │ first request: create + start tool
//!                                               │ open a dedicated port on the tool
//! client ◄──────────── Uri{port} ───────────────┘
//! client ──acquire/await/take...──► tool port   (manager no longer involved)
//! ```
//!
//! Tools live as long as the manager: shutting it down shuts them down.

use crate::component::core::ComponentCore;
use crate::component::lifecycle::{Component, ComponentHandle};
use crate::component::uri;
use crate::cvm::dynamic_connection::DynamicPortProvider;
use crate::cvm::{Cvm, WeakCvm};
use crate::port::inbound::{InboundPort, ServiceHandler};
use crate::port::reply::Reply;
use crate::sync::barrier::CyclicBarrierTool;
use crate::sync::contracts::{ManagerRequest, ManagerResponse, SynchronizerManagerContract, ToolKind};
use crate::sync::group::GroupId;
use crate::sync::latch::CountDownLatchTool;
use crate::sync::queue::ArrayBlockingQueueTool;
use crate::sync::semaphore::SemaphoreTool;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Local name of the manager's port
pub const MANAGER_PORT_NAME: &str = "synchronizer-manager";

struct ToolEntry {
    handle: ComponentHandle,
    provider: Arc<dyn DynamicPortProvider>,
    /// client URI -> granted port URI
    granted: HashMap<String, String>,
}

type Registry = Mutex<HashMap<(ToolKind, GroupId), ToolEntry>>;

fn provider_of(kind: ToolKind, handle: &ComponentHandle) -> Option<Arc<dyn DynamicPortProvider>> {
    match kind {
        ToolKind::Semaphore => handle
            .downcast::<SemaphoreTool>()
            .map(|t| t as Arc<dyn DynamicPortProvider>),
        ToolKind::CyclicBarrier => handle
            .downcast::<CyclicBarrierTool>()
            .map(|t| t as Arc<dyn DynamicPortProvider>),
        ToolKind::CountDownLatch => handle
            .downcast::<CountDownLatchTool>()
            .map(|t| t as Arc<dyn DynamicPortProvider>),
        ToolKind::ArrayBlockingQueue => handle
            .downcast::<ArrayBlockingQueueTool>()
            .map(|t| t as Arc<dyn DynamicPortProvider>),
    }
}

/// Tear down a tool that never made it into the registry
async fn discard(handle: &ComponentHandle) {
    if let Err(e) = handle.shutdown().await {
        warn!("Shutdown of tool {} failed: {}", handle.uri(), e);
    }
}

struct ManagerHandler {
    cvm: WeakCvm,
    tools: Arc<Registry>,
}

impl ManagerHandler {
    async fn instantiate(&self, kind: ToolKind, group: &GroupId) -> Result<ToolEntry> {
        let cvm = self.cvm.upgrade()?;
        let tool_uri = cvm.create_component(
            kind.type_tag(),
            vec![json!(group.name()), json!(group.parameter())],
        )?;

        let handle = cvm.component(&tool_uri).ok_or_else(|| {
            CvmError::ToolProtocol(format!("Tool {} vanished after creation", tool_uri))
        })?;
        let Some(provider) = provider_of(kind, &handle) else {
            discard(&handle).await;
            return Err(CvmError::ToolProtocol(format!(
                "Component {} is not a {} tool",
                tool_uri, kind
            )));
        };

        if let Err(e) = handle.start().await {
            discard(&handle).await;
            return Err(e);
        }
        info!("Activated {} tool {} for group {}", kind, tool_uri, group);

        Ok(ToolEntry {
            handle,
            provider,
            granted: HashMap::new(),
        })
    }

    async fn provide(&self, kind: ToolKind, group: GroupId, client: String) -> Result<String> {
        let mut tools = self.tools.lock().await;

        let key = (kind, group);
        if !tools.contains_key(&key) {
            let entry = self.instantiate(kind, &key.1).await?;
            tools.insert(key.clone(), entry);
        }

        let entry = tools
            .get_mut(&key)
            .ok_or_else(|| CvmError::ToolProtocol(format!("No {} tool for {}", kind, key.1)))?;

        if let Some(existing) = entry.granted.get(&client) {
            return Err(CvmError::ToolProtocol(format!(
                "{} already holds {} on {} group {}",
                client, existing, kind, key.1
            )));
        }

        let port_uri = entry.provider.create_dynamic_port(kind.contract_id()).await?;
        entry.granted.insert(client.clone(), port_uri.clone());

        info!("Granted {} on {} group {} to {}", port_uri, kind, key.1, client);
        Ok(port_uri)
    }

    async fn release(&self, kind: ToolKind, group: GroupId, client: String) -> Result<()> {
        let mut tools = self.tools.lock().await;

        let entry = tools.get_mut(&(kind, group.clone())).ok_or_else(|| {
            CvmError::ToolProtocol(format!("No {} tool for group {}", kind, group))
        })?;
        let port_uri = entry.granted.remove(&client).ok_or_else(|| {
            CvmError::ToolProtocol(format!("{} holds no port on {} group {}", client, kind, group))
        })?;

        entry.provider.destroy_dynamic_port(&port_uri).await?;
        info!("Released {} held by {}", port_uri, client);
        Ok(())
    }
}

#[async_trait]
impl ServiceHandler<SynchronizerManagerContract> for ManagerHandler {
    async fn handle(&self, request: ManagerRequest) -> Result<Reply<ManagerResponse>> {
        let response = match request {
            ManagerRequest::ProvideUri {
                kind,
                group,
                client,
            } => {
                let group = GroupId::decode(&group)?;
                let uri = self.provide(kind, group, client).await?;
                ManagerResponse::Uri { uri }
            }
            ManagerRequest::ReleaseUri {
                kind,
                group,
                client,
            } => {
                let group = GroupId::decode(&group)?;
                self.release(kind, group, client).await?;
                ManagerResponse::Released
            }
        };

        Ok(Reply::Ready(response))
    }
}

/// Well-known component handing out tool ports
pub struct SynchronizerManager {
    core: ComponentCore,
    tools: Arc<Registry>,
}

impl SynchronizerManager {
    /// Well-known URI of the manager on `node_id`
    pub fn port_uri(node_id: &str) -> String {
        uri::well_known(node_id, MANAGER_PORT_NAME)
    }

    /// Register the tool factories, then create, publish, deploy and start
    /// the manager of `cvm`
    pub async fn install(cvm: &Cvm) -> Result<ComponentHandle> {
        SemaphoreTool::register_factory(cvm);
        CyclicBarrierTool::register_factory(cvm);
        CountDownLatchTool::register_factory(cvm);
        ArrayBlockingQueueTool::register_factory(cvm);

        let manager = Arc::new(Self {
            core: ComponentCore::new(cvm, "synchronizer-manager"),
            tools: Arc::new(Mutex::new(HashMap::new())),
        });
        manager
            .core
            .add_offered_interface::<SynchronizerManagerContract>();

        let handler = Arc::new(ManagerHandler {
            cvm: cvm.downgrade(),
            tools: Arc::clone(&manager.tools),
        });
        let port = InboundPort::<SynchronizerManagerContract>::create_with_uri(
            &manager.core,
            Self::port_uri(cvm.node_id()),
            handler,
        )?;
        port.publish_for_mode()?;

        let handle = ComponentHandle::new(manager);
        cvm.deploy(handle.clone())?;
        handle.start().await?;

        info!("SynchronizerManager listening at {}", port.uri());
        Ok(handle)
    }

    /// Number of active tools
    pub async fn tool_count(&self) -> usize {
        self.tools.lock().await.len()
    }

    /// URI of the tool component serving (`kind`, `group`), if active
    pub async fn tool_uri(&self, kind: ToolKind, group: &GroupId) -> Option<String> {
        self.tools
            .lock()
            .await
            .get(&(kind, group.clone()))
            .map(|entry| entry.handle.uri().to_string())
    }
}

#[async_trait]
impl Component for SynchronizerManager {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn finalise(&self) -> Result<()> {
        let entries: Vec<ToolEntry> = self.tools.lock().await.drain().map(|(_, e)| e).collect();

        let mut failures = Vec::new();
        for entry in entries {
            if let Err(e) = entry.handle.shutdown().await {
                warn!("Shutdown of tool {} failed: {}", entry.handle.uri(), e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CvmError::ShutdownFailure(failures.join("; ")))
        }
    }
}
