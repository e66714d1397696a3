// src/port/connector.rs
//! Connectors: bindings from an outbound port to an inbound port
//!
//! A [`ConnectorKind`] is chosen by the caller of `do_connection` and builds
//! the [`Connector`] once the peer URI has been resolved. Whether the peer
//! lives in this process or behind the transport is decided by resolution,
//! so every kind works in both cases.

use crate::component::contract::ServiceContract;
use crate::cvm::transport::RemoteLink;
use crate::cvm::{Cvm, ResolvedPeer};
use crate::port::inbound::InboundPort;
use crate::utils::errors::{CvmError, Result};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Relays calls to one inbound port
#[async_trait]
pub trait Connector<C: ServiceContract>: Send + Sync {
    fn peer_uri(&self) -> &str;

    /// Forward `request`; `None` means the peer accepted it fire-and-forget
    async fn forward(&self, request: C::Request) -> Result<Option<C::Response>>;
}

/// Builds connectors of one kind
#[async_trait]
pub trait ConnectorKind<C: ServiceContract>: Send + Sync {
    async fn connect(&self, cvm: &Cvm, peer_uri: &str) -> Result<Arc<dyn Connector<C>>>;
}

/// Forwards every call unmodified
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardConnector;

#[async_trait]
impl<C: ServiceContract> ConnectorKind<C> for StandardConnector {
    async fn connect(&self, cvm: &Cvm, peer_uri: &str) -> Result<Arc<dyn Connector<C>>> {
        let connector: Arc<dyn Connector<C>> = match cvm.resolve::<C>(peer_uri).await? {
            ResolvedPeer::Local(port) => Arc::new(LocalConnector {
                peer_uri: peer_uri.to_string(),
                peer: Arc::downgrade(&port),
            }),
            ResolvedPeer::Remote(link) => Arc::new(RemoteConnector::<C> {
                peer_uri: peer_uri.to_string(),
                link,
                _contract: PhantomData,
            }),
        };
        Ok(connector)
    }
}

/// In-process connector; holds the peer weakly so unpublishing frees it
struct LocalConnector<C: ServiceContract> {
    peer_uri: String,
    peer: Weak<InboundPort<C>>,
}

#[async_trait]
impl<C: ServiceContract> Connector<C> for LocalConnector<C> {
    fn peer_uri(&self) -> &str {
        &self.peer_uri
    }

    async fn forward(&self, request: C::Request) -> Result<Option<C::Response>> {
        let peer = self.peer.upgrade().ok_or_else(|| {
            CvmError::Connection(format!("Peer port {} no longer exists", self.peer_uri))
        })?;
        peer.serve(request).await
    }
}

/// Connector to a port on another deployment target
struct RemoteConnector<C: ServiceContract> {
    peer_uri: String,
    link: Arc<RemoteLink>,
    _contract: PhantomData<fn() -> C>,
}

#[async_trait]
impl<C: ServiceContract> Connector<C> for RemoteConnector<C> {
    fn peer_uri(&self) -> &str {
        &self.peer_uri
    }

    async fn forward(&self, request: C::Request) -> Result<Option<C::Response>> {
        let payload = serde_json::to_value(&request)?;
        match self.link.call(&self.peer_uri, C::ID, payload).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Converts between a required contract `R` and an offered contract `O`
///
/// Both conversions must be pure: no side effects, same output for the
/// same input.
pub trait DataTransform<R: ServiceContract, O: ServiceContract>: Send + Sync + 'static {
    fn required_to_offered(&self, request: R::Request) -> O::Request;

    fn offered_to_required(&self, response: O::Response) -> R::Response;
}

/// Connects an `R` outbound port to an `O` inbound port through a transform
pub struct TwoWayConnector<O, T> {
    transform: Arc<T>,
    _offered: PhantomData<fn() -> O>,
}

impl<O, T> TwoWayConnector<O, T> {
    pub fn new(transform: T) -> Self {
        Self {
            transform: Arc::new(transform),
            _offered: PhantomData,
        }
    }
}

#[async_trait]
impl<R, O, T> ConnectorKind<R> for TwoWayConnector<O, T>
where
    R: ServiceContract,
    O: ServiceContract,
    T: DataTransform<R, O>,
{
    async fn connect(&self, cvm: &Cvm, peer_uri: &str) -> Result<Arc<dyn Connector<R>>> {
        let inner = <StandardConnector as ConnectorKind<O>>::connect(&StandardConnector, cvm, peer_uri).await?;
        Ok(Arc::new(TransformingConnector::<R, O, T> {
            inner,
            transform: Arc::clone(&self.transform),
            _required: PhantomData,
        }))
    }
}

struct TransformingConnector<R, O: ServiceContract, T> {
    inner: Arc<dyn Connector<O>>,
    transform: Arc<T>,
    _required: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R, O, T> Connector<R> for TransformingConnector<R, O, T>
where
    R: ServiceContract,
    O: ServiceContract,
    T: DataTransform<R, O>,
{
    fn peer_uri(&self) -> &str {
        self.inner.peer_uri()
    }

    async fn forward(&self, request: R::Request) -> Result<Option<R::Response>> {
        let converted = self.transform.required_to_offered(request);
        let response = self.inner.forward(converted).await?;
        Ok(response.map(|r| self.transform.offered_to_required(r)))
    }
}
