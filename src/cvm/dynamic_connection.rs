// src/cvm/dynamic_connection.rs
//! On-demand port provisioning
//!
//! ```text
//! A                                   B (DynamicPortProvider)
//! │ temp outbound ──RequestPort{C}──► create + publish InboundPort<C>
//! │ ◄────────────── PortUri{uri} ────
//! │ new OutboundPort<C> ──connect──► uri
//! │ (connect failed) ──ReleasePort──► destroy port
//! │ temp outbound torn down
//! ```

use crate::component::contract::ServiceContract;
use crate::component::core::ComponentCore;
use crate::port::inbound::ServiceHandler;
use crate::port::outbound::OutboundPort;
use crate::port::reply::Reply;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DynamicConnectionRequestContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DynamicConnectionRequest {
    /// Create a new inbound port for `contract`
    RequestPort { contract: String },
    /// Destroy a port previously handed out
    ReleasePort { uri: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DynamicConnectionResponse {
    PortUri { uri: String },
    Released,
}

impl ServiceContract for DynamicConnectionRequestContract {
    const ID: &'static str = "cvm.dynamic-connection-request";
    type Request = DynamicConnectionRequest;
    type Response = DynamicConnectionResponse;
}

/// A component able to create inbound ports on request
#[async_trait]
pub trait DynamicPortProvider: Send + Sync + 'static {
    /// Create and publish an inbound port for `contract_id`, returning its URI
    async fn create_dynamic_port(&self, contract_id: &str) -> Result<String>;

    /// Tear down a port created by `create_dynamic_port`
    async fn destroy_dynamic_port(&self, port_uri: &str) -> Result<()>;
}

/// Serves [`DynamicConnectionRequestContract`] on behalf of a provider
pub struct DynamicConnectionHandler {
    provider: Arc<dyn DynamicPortProvider>,
}

impl DynamicConnectionHandler {
    /// Serve connection requests with `provider`
    pub fn new(provider: Arc<dyn DynamicPortProvider>) -> Arc<Self> {
        Arc::new(Self { provider })
    }
}

#[async_trait]
impl ServiceHandler<DynamicConnectionRequestContract> for DynamicConnectionHandler {
    async fn handle(&self, request: DynamicConnectionRequest) -> Result<Reply<DynamicConnectionResponse>> {
        let response = match request {
            DynamicConnectionRequest::RequestPort { contract } => {
                let uri = self.provider.create_dynamic_port(&contract).await?;
                debug!("Provisioned {} for {}", uri, contract);
                DynamicConnectionResponse::PortUri { uri }
            }
            DynamicConnectionRequest::ReleasePort { uri } => {
                self.provider.destroy_dynamic_port(&uri).await?;
                DynamicConnectionResponse::Released
            }
        };
        Ok(Reply::Ready(response))
    }
}

/// Obtain a connected outbound port for `C` through a connection-request port
///
/// `owner` must require `C`. The temporary request channel is torn down
/// whatever the outcome. If the provider creates a port but connecting to
/// it fails, the port is released on the provider side and a connection
/// error is returned.
pub async fn connect_dynamically<C: ServiceContract>(
    owner: &ComponentCore,
    request_port_uri: &str,
) -> Result<Arc<OutboundPort<C>>> {
    let port = OutboundPort::<C>::create(owner)?;

    owner.add_required_interface::<DynamicConnectionRequestContract>();
    let channel = match OutboundPort::<DynamicConnectionRequestContract>::create(owner) {
        Ok(channel) => channel,
        Err(e) => {
            owner.remove_port(port.uri());
            return Err(e);
        }
    };

    let outcome = provision(&port, &channel, request_port_uri).await;

    if let Err(e) = owner.destroy_port(channel.uri()).await {
        warn!("Failed to tear down request channel {}: {}", channel.uri(), e);
    }

    match outcome {
        Ok(()) => Ok(port),
        Err(e) => {
            owner.remove_port(port.uri());
            Err(e)
        }
    }
}

async fn provision<C: ServiceContract>(
    port: &OutboundPort<C>,
    channel: &OutboundPort<DynamicConnectionRequestContract>,
    request_port_uri: &str,
) -> Result<()> {
    channel.connect(request_port_uri).await?;

    let peer_uri = match channel
        .call(DynamicConnectionRequest::RequestPort {
            contract: C::ID.to_string(),
        })
        .await?
    {
        DynamicConnectionResponse::PortUri { uri } => uri,
        other => {
            return Err(CvmError::Connection(format!(
                "Unexpected connection-request response {:?}",
                other
            )))
        }
    };

    if let Err(e) = port.connect(&peer_uri).await {
        warn!("Connecting to provisioned port {} failed, releasing it", peer_uri);
        if let Err(release) = channel
            .call(DynamicConnectionRequest::ReleasePort {
                uri: peer_uri.clone(),
            })
            .await
        {
            warn!("Failed to release orphaned port {}: {}", peer_uri, release);
        }
        return Err(CvmError::Connection(format!(
            "Provisioned port {} could not be connected: {}",
            peer_uri,
            e.message()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::lifecycle::{Component, ComponentHandle, PlainComponent};
    use crate::cvm::Cvm;
    use crate::port::inbound::InboundPort;
    use parking_lot::Mutex;

    struct Echo;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping(u32);

    impl ServiceContract for Echo {
        const ID: &'static str = "test.echo";
        type Request = Ping;
        type Response = u32;
    }

    struct EchoHandler;

    #[async_trait]
    impl ServiceHandler<Echo> for EchoHandler {
        async fn handle(&self, request: Ping) -> Result<Reply<u32>> {
            Ok(Reply::Ready(request.0 + 1))
        }
    }

    /// Provider that can be told to hand out a URI nobody published
    struct EchoProvider {
        component: Arc<PlainComponent>,
        hand_out_bogus: bool,
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DynamicPortProvider for EchoProvider {
        async fn create_dynamic_port(&self, contract_id: &str) -> Result<String> {
            if contract_id != Echo::ID {
                return Err(CvmError::Connection(format!("Unsupported {}", contract_id)));
            }
            let port = InboundPort::<Echo>::create(self.component.core(), Arc::new(EchoHandler))?;
            if self.hand_out_bogus {
                return Ok(format!("{}-unpublished", port.uri()));
            }
            port.publish_for_mode()?;
            Ok(port.uri().to_string())
        }

        async fn destroy_dynamic_port(&self, port_uri: &str) -> Result<()> {
            self.released.lock().push(port_uri.to_string());
            Ok(())
        }
    }

    async fn setup(bogus: bool) -> (Cvm, Arc<EchoProvider>, String, Arc<PlainComponent>) {
        let cvm = Cvm::local("node-a").unwrap();

        let server = PlainComponent::new(ComponentCore::new(&cvm, "server"));
        server.core().add_offered_interface::<Echo>();
        server
            .core()
            .add_offered_interface::<DynamicConnectionRequestContract>();

        let provider = Arc::new(EchoProvider {
            component: server.clone(),
            hand_out_bogus: bogus,
            released: Mutex::new(Vec::new()),
        });
        let request_port = InboundPort::<DynamicConnectionRequestContract>::create(
            server.core(),
            DynamicConnectionHandler::new(provider.clone()),
        )
        .unwrap();
        request_port.local_publish().unwrap();
        cvm.deploy(ComponentHandle::new(server.clone())).unwrap();

        let client = PlainComponent::new(ComponentCore::new(&cvm, "client"));
        client.core().add_required_interface::<Echo>();

        (cvm, provider, request_port.uri().to_string(), client)
    }

    #[tokio::test]
    async fn test_connect_dynamically() {
        let (_cvm, provider, request_uri, client) = setup(false).await;

        let port = connect_dynamically::<Echo>(client.core(), &request_uri)
            .await
            .unwrap();

        assert_eq!(port.call(Ping(41)).await.unwrap(), 42);
        // Only the provisioned port remains on the client
        assert_eq!(client.core().port_uris(), vec![port.uri().to_string()]);
        assert!(provider.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_port_is_released() {
        let (_cvm, provider, request_uri, client) = setup(true).await;

        let result = connect_dynamically::<Echo>(client.core(), &request_uri).await;

        assert!(matches!(result, Err(CvmError::Connection(_))));
        assert_eq!(provider.released.lock().len(), 1);
        assert!(client.core().port_uris().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request_port() {
        let (cvm, _provider, _request_uri, client) = setup(false).await;
        let missing = format!("cvm://{}/nowhere", cvm.node_id());

        let result = connect_dynamically::<Echo>(client.core(), &missing).await;
        assert!(matches!(result, Err(CvmError::Connection(_))));
        assert!(client.core().port_uris().is_empty());
    }
}
