// src/cvm/creation.rs
//! Dynamic component creation service
//!
//! Every node may host a [`DynamicComponentCreator`] at the well-known URI
//! `cvm://<node>/dynamic-component-creator`. Callers name a registered type
//! tag and pass JSON constructor arguments; unknown tags and bad arguments
//! come back as creation-service errors and never affect the target node.

use crate::component::contract::ServiceContract;
use crate::component::core::ComponentCore;
use crate::component::lifecycle::{Component, ComponentHandle};
use crate::component::uri;
use crate::cvm::{Cvm, WeakCvm};
use crate::port::inbound::{InboundPort, ServiceHandler};
use crate::port::outbound::OutboundPort;
use crate::port::reply::Reply;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Local name of the creation service port
pub const CREATOR_PORT_NAME: &str = "dynamic-component-creator";

pub struct DynamicComponentCreationContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CreationRequest {
    Create { type_tag: String, args: Vec<Value> },
    Start { uri: String },
    Execute { uri: String },
    Destroy { uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CreationResponse {
    Created { uri: String },
    Done,
}

impl ServiceContract for DynamicComponentCreationContract {
    const ID: &'static str = "cvm.dynamic-component-creation";
    type Request = CreationRequest;
    type Response = CreationResponse;
}

struct CreationHandler {
    cvm: WeakCvm,
    creator_uri: String,
}

impl CreationHandler {
    fn lookup(&self, cvm: &Cvm, component_uri: &str) -> Result<ComponentHandle> {
        if component_uri == self.creator_uri {
            return Err(CvmError::CreationService(
                "The creation service cannot manage itself".to_string(),
            ));
        }

        cvm.component(component_uri).ok_or_else(|| {
            CvmError::CreationService(format!("No component {} on node {}", component_uri, cvm.node_id()))
        })
    }
}

#[async_trait]
impl ServiceHandler<DynamicComponentCreationContract> for CreationHandler {
    async fn handle(&self, request: CreationRequest) -> Result<Reply<CreationResponse>> {
        let cvm = self.cvm.upgrade()?;

        let response = match request {
            CreationRequest::Create { type_tag, args } => {
                let uri = cvm.create_component(&type_tag, args)?;
                CreationResponse::Created { uri }
            }
            CreationRequest::Start { uri } => {
                self.lookup(&cvm, &uri)?.start().await?;
                CreationResponse::Done
            }
            CreationRequest::Execute { uri } => {
                self.lookup(&cvm, &uri)?.execute().await?;
                CreationResponse::Done
            }
            CreationRequest::Destroy { uri } => {
                self.lookup(&cvm, &uri)?.shutdown().await?;
                info!("Destroyed {} on request", uri);
                CreationResponse::Done
            }
        };

        Ok(Reply::Ready(response))
    }
}

/// Component serving [`DynamicComponentCreationContract`]
pub struct DynamicComponentCreator {
    core: ComponentCore,
}

impl DynamicComponentCreator {
    /// Well-known URI of the creation service on `node_id`
    pub fn port_uri(node_id: &str) -> String {
        uri::well_known(node_id, CREATOR_PORT_NAME)
    }

    /// Create, publish, deploy and start the creation service of `cvm`
    pub async fn install(cvm: &Cvm) -> Result<ComponentHandle> {
        let creator = Arc::new(Self {
            core: ComponentCore::new(cvm, "creator"),
        });
        creator
            .core
            .add_offered_interface::<DynamicComponentCreationContract>();

        let handler = Arc::new(CreationHandler {
            cvm: cvm.downgrade(),
            creator_uri: creator.core.uri().to_string(),
        });
        let port = InboundPort::<DynamicComponentCreationContract>::create_with_uri(
            &creator.core,
            Self::port_uri(cvm.node_id()),
            handler,
        )?;
        port.publish_for_mode()?;

        let handle = ComponentHandle::new(creator);
        cvm.deploy(handle.clone())?;
        handle.start().await?;

        info!("Creation service listening at {}", port.uri());
        Ok(handle)
    }
}

impl Component for DynamicComponentCreator {
    fn core(&self) -> &ComponentCore {
        &self.core
    }
}

/// Client of a (possibly remote) creation service
///
/// Failures to reach the service are reported as creation-service errors.
pub struct DynamicCreationClient {
    port: Arc<OutboundPort<DynamicComponentCreationContract>>,
}

fn unreachable_service(error: CvmError) -> CvmError {
    match error {
        CvmError::Connection(m) | CvmError::Transport(m) | CvmError::ComponentTerminated(m) => {
            CvmError::CreationService(format!("Creation service unreachable: {}", m))
        }
        other => other,
    }
}

impl DynamicCreationClient {
    /// Connect `owner` to the creation service of `node_id`
    pub async fn connect(owner: &ComponentCore, node_id: &str) -> Result<Self> {
        owner.add_required_interface::<DynamicComponentCreationContract>();
        let port = OutboundPort::<DynamicComponentCreationContract>::create(owner)?;

        if let Err(e) = port.connect(&DynamicComponentCreator::port_uri(node_id)).await {
            owner.remove_port(port.uri());
            return Err(unreachable_service(e));
        }

        Ok(Self { port })
    }

    async fn request(&self, request: CreationRequest) -> Result<CreationResponse> {
        self.port.call(request).await.map_err(unreachable_service)
    }

    /// Create a component of `type_tag` and return its URI
    pub async fn create(&self, type_tag: &str, args: Vec<Value>) -> Result<String> {
        match self
            .request(CreationRequest::Create {
                type_tag: type_tag.to_string(),
                args,
            })
            .await?
        {
            CreationResponse::Created { uri } => Ok(uri),
            other => Err(CvmError::CreationService(format!(
                "Unexpected creation response {:?}",
                other
            ))),
        }
    }

    /// Start a component created through this service
    pub async fn start(&self, component_uri: &str) -> Result<()> {
        self.request(CreationRequest::Start {
            uri: component_uri.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Run the execute hook of a started component
    pub async fn execute(&self, component_uri: &str) -> Result<()> {
        self.request(CreationRequest::Execute {
            uri: component_uri.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Shut a component down and undeploy it
    pub async fn destroy(&self, component_uri: &str) -> Result<()> {
        self.request(CreationRequest::Destroy {
            uri: component_uri.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub fn port(&self) -> &Arc<OutboundPort<DynamicComponentCreationContract>> {
        &self.port
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.port.do_disconnection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::lifecycle::{LifecycleState, PlainComponent};
    use serde_json::json;

    fn register_plain(cvm: &Cvm) {
        cvm.register_factory("plain", |cvm: &Cvm, (hint,): (String,)| {
            Ok(ComponentHandle::new(PlainComponent::new(ComponentCore::new(cvm, &hint))))
        });
    }

    async fn client_of(cvm: &Cvm) -> (ComponentHandle, DynamicCreationClient) {
        let owner = PlainComponent::new(ComponentCore::new(cvm, "client"));
        let client = DynamicCreationClient::connect(owner.core(), cvm.node_id())
            .await
            .unwrap();
        let handle = ComponentHandle::new(owner);
        cvm.deploy(handle.clone()).unwrap();
        (handle, client)
    }

    #[tokio::test]
    async fn test_create_start_destroy() {
        let cvm = Cvm::local("node-a").unwrap();
        register_plain(&cvm);
        DynamicComponentCreator::install(&cvm).await.unwrap();
        let (_owner, client) = client_of(&cvm).await;

        let uri = client.create("plain", vec![json!("worker")]).await.unwrap();
        assert_eq!(cvm.component(&uri).unwrap().state(), LifecycleState::Created);

        client.start(&uri).await.unwrap();
        client.execute(&uri).await.unwrap();
        assert_eq!(cvm.component(&uri).unwrap().state(), LifecycleState::Started);

        client.destroy(&uri).await.unwrap();
        assert!(cvm.component(&uri).is_none());
    }

    #[tokio::test]
    async fn test_creation_errors_reach_caller() {
        let cvm = Cvm::local("node-a").unwrap();
        register_plain(&cvm);
        let creator = DynamicComponentCreator::install(&cvm).await.unwrap();
        let (_owner, client) = client_of(&cvm).await;

        let unknown = client.create("missing", vec![]).await;
        assert!(matches!(unknown, Err(CvmError::CreationService(_))));

        let mismatch = client.create("plain", vec![json!(42)]).await;
        assert!(matches!(mismatch, Err(CvmError::CreationService(_))));

        let itself = client.destroy(creator.uri()).await;
        assert!(matches!(itself, Err(CvmError::CreationService(_))));

        // The service keeps working after failed attempts
        assert!(client.create("plain", vec![json!("ok")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let cvm = Cvm::local("node-a").unwrap();
        let owner = PlainComponent::new(ComponentCore::new(&cvm, "client"));

        let result = DynamicCreationClient::connect(owner.core(), "node-a").await;
        assert!(matches!(result, Err(CvmError::CreationService(_))));
        assert!(owner.core().port_uris().is_empty());
    }
}
