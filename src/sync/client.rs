// src/sync/client.rs
//! Typed clients of the manager and of the synchronization tools
//!
//! Each client owns an outbound port on the calling component and turns the
//! contract's request/response enums into plain method calls.

use crate::component::contract::ServiceContract;
use crate::component::core::ComponentCore;
use crate::port::outbound::OutboundPort;
use crate::sync::contracts::{
    ArrayBlockingQueueContract, CountDownLatchContract, CountDownLatchRequest, CountDownLatchResponse,
    CyclicBarrierContract, CyclicBarrierRequest, CyclicBarrierResponse, ManagerRequest, ManagerResponse,
    QueueRequest, QueueResponse, SemaphoreContract, SemaphoreRequest, SemaphoreResponse,
    SynchronizerManagerContract, ToolKind,
};
use crate::sync::group::GroupId;
use crate::sync::manager::SynchronizerManager;
use crate::utils::errors::{CvmError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Create an outbound port for `C` on `owner` and connect it to `peer_uri`
///
/// The port is removed again if the connection fails.
async fn attach<C: ServiceContract>(owner: &ComponentCore, peer_uri: &str) -> Result<Arc<OutboundPort<C>>> {
    owner.add_required_interface::<C>();
    let port = OutboundPort::<C>::create(owner)?;

    if let Err(e) = port.connect(peer_uri).await {
        owner.remove_port(port.uri());
        return Err(e);
    }
    Ok(port)
}

fn unexpected(contract: &str, response: impl Debug) -> CvmError {
    CvmError::ToolProtocol(format!("Unexpected {} response {:?}", contract, response))
}

/// Client of a SynchronizerManager
pub struct SynchronizerManagerClient {
    port: Arc<OutboundPort<SynchronizerManagerContract>>,
    client_id: String,
}

impl SynchronizerManagerClient {
    /// Connect `owner` to the manager hosted on `node_id`
    pub async fn connect(owner: &ComponentCore, node_id: &str) -> Result<Self> {
        Self::connect_to(owner, &SynchronizerManager::port_uri(node_id)).await
    }

    /// Connect `owner` to the manager port at `manager_uri`
    pub async fn connect_to(owner: &ComponentCore, manager_uri: &str) -> Result<Self> {
        Ok(Self {
            port: attach(owner, manager_uri).await?,
            client_id: owner.uri().to_string(),
        })
    }

    /// Identifier under which grants are recorded (the owner's URI)
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// URI of a new port dedicated to this client on the tool of (`kind`, `group`)
    pub async fn provide_uri(&self, kind: ToolKind, group: &GroupId) -> Result<String> {
        let request = ManagerRequest::ProvideUri {
            kind,
            group: group.encode(),
            client: self.client_id.clone(),
        };
        match self.port.call(request).await? {
            ManagerResponse::Uri { uri } => Ok(uri),
            other => Err(unexpected(SynchronizerManagerContract::ID, other)),
        }
    }

    /// Give back the port granted on (`kind`, `group`)
    pub async fn release_uri(&self, kind: ToolKind, group: &GroupId) -> Result<()> {
        let request = ManagerRequest::ReleaseUri {
            kind,
            group: group.encode(),
            client: self.client_id.clone(),
        };
        match self.port.call(request).await? {
            ManagerResponse::Released => Ok(()),
            other => Err(unexpected(SynchronizerManagerContract::ID, other)),
        }
    }

    /// Obtain a port on the semaphore of `group` and connect to it
    pub async fn semaphore(&self, owner: &ComponentCore, group: &GroupId) -> Result<SemaphoreClient> {
        let uri = self.provide_uri(ToolKind::Semaphore, group).await?;
        SemaphoreClient::connect(owner, &uri).await
    }

    /// Obtain a port on the barrier of `group` and connect to it
    pub async fn cyclic_barrier(&self, owner: &ComponentCore, group: &GroupId) -> Result<CyclicBarrierClient> {
        let uri = self.provide_uri(ToolKind::CyclicBarrier, group).await?;
        CyclicBarrierClient::connect(owner, &uri).await
    }

    /// Obtain a port on the latch of `group` and connect to it
    pub async fn count_down_latch(&self, owner: &ComponentCore, group: &GroupId) -> Result<CountDownLatchClient> {
        let uri = self.provide_uri(ToolKind::CountDownLatch, group).await?;
        CountDownLatchClient::connect(owner, &uri).await
    }

    /// Obtain a port on the queue of `group` and connect to it
    pub async fn array_blocking_queue(
        &self,
        owner: &ComponentCore,
        group: &GroupId,
    ) -> Result<ArrayBlockingQueueClient> {
        let uri = self.provide_uri(ToolKind::ArrayBlockingQueue, group).await?;
        ArrayBlockingQueueClient::connect(owner, &uri).await
    }

    /// Disconnect from the manager and drop the port
    pub async fn disconnect(&self) -> Result<()> {
        self.port.do_disconnection().await
    }
}

/// Client of a semaphore tool port
pub struct SemaphoreClient {
    port: Arc<OutboundPort<SemaphoreContract>>,
}

impl SemaphoreClient {
    pub async fn connect(owner: &ComponentCore, tool_port_uri: &str) -> Result<Self> {
        Ok(Self {
            port: attach(owner, tool_port_uri).await?,
        })
    }

    pub fn port(&self) -> &Arc<OutboundPort<SemaphoreContract>> {
        &self.port
    }

    async fn done(&self, request: SemaphoreRequest) -> Result<()> {
        match self.port.call(request).await? {
            SemaphoreResponse::Done => Ok(()),
            other => Err(unexpected(SemaphoreContract::ID, other)),
        }
    }

    async fn acquired(&self, request: SemaphoreRequest) -> Result<bool> {
        match self.port.call(request).await? {
            SemaphoreResponse::Acquired { acquired } => Ok(acquired),
            other => Err(unexpected(SemaphoreContract::ID, other)),
        }
    }

    async fn count(&self, request: SemaphoreRequest) -> Result<u32> {
        match self.port.call(request).await? {
            SemaphoreResponse::Count { value } => Ok(value),
            other => Err(unexpected(SemaphoreContract::ID, other)),
        }
    }

    /// Wait for one permit
    pub async fn acquire(&self) -> Result<()> {
        self.acquire_many(1).await
    }

    /// Wait for `permits` permits
    pub async fn acquire_many(&self, permits: u32) -> Result<()> {
        self.done(SemaphoreRequest::Acquire { permits }).await
    }

    /// Return one permit
    pub async fn release(&self) -> Result<()> {
        self.release_many(1).await
    }

    /// Return `permits` permits
    pub async fn release_many(&self, permits: u32) -> Result<()> {
        self.done(SemaphoreRequest::Release { permits }).await
    }

    /// Take one permit if available, without waiting
    pub async fn try_acquire(&self) -> Result<bool> {
        self.acquired(SemaphoreRequest::TryAcquire { permits: 1 }).await
    }

    /// Wait at most `timeout` for `permits` permits
    pub async fn try_acquire_timeout(&self, permits: u32, timeout: Duration) -> Result<bool> {
        self.acquired(SemaphoreRequest::TryAcquireTimeout {
            permits,
            timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
        })
        .await
    }

    pub async fn available_permits(&self) -> Result<u32> {
        self.count(SemaphoreRequest::AvailablePermits).await
    }

    /// Callers waiting on the semaphore
    pub async fn queue_length(&self) -> Result<u32> {
        self.count(SemaphoreRequest::QueueLength).await
    }

    /// Take every available permit, returning how many were taken
    pub async fn drain_permits(&self) -> Result<u32> {
        self.count(SemaphoreRequest::DrainPermits).await
    }
}

/// Client of a cyclic barrier tool port
pub struct CyclicBarrierClient {
    port: Arc<OutboundPort<CyclicBarrierContract>>,
}

impl CyclicBarrierClient {
    pub async fn connect(owner: &ComponentCore, tool_port_uri: &str) -> Result<Self> {
        Ok(Self {
            port: attach(owner, tool_port_uri).await?,
        })
    }

    pub fn port(&self) -> &Arc<OutboundPort<CyclicBarrierContract>> {
        &self.port
    }

    async fn count(&self, request: CyclicBarrierRequest) -> Result<u32> {
        match self.port.call(request).await? {
            CyclicBarrierResponse::Count { value } => Ok(value),
            other => Err(unexpected(CyclicBarrierContract::ID, other)),
        }
    }

    /// Wait for every party; returns the arrival index (0 for the last)
    pub async fn await_barrier(&self) -> Result<u32> {
        match self.port.call(CyclicBarrierRequest::Await).await? {
            CyclicBarrierResponse::Arrived { index } => Ok(index),
            other => Err(unexpected(CyclicBarrierContract::ID, other)),
        }
    }

    /// Parties parked in the current generation
    pub async fn number_waiting(&self) -> Result<u32> {
        self.count(CyclicBarrierRequest::NumberWaiting).await
    }

    /// Arrivals still needed to trip the barrier
    pub async fn number_to_wait(&self) -> Result<u32> {
        self.count(CyclicBarrierRequest::NumberToWait).await
    }

    pub async fn parties(&self) -> Result<u32> {
        self.count(CyclicBarrierRequest::Parties).await
    }

    /// Number of times the barrier has tripped or been reset
    pub async fn generation(&self) -> Result<u64> {
        match self.port.call(CyclicBarrierRequest::Generation).await? {
            CyclicBarrierResponse::Generation { value } => Ok(value),
            other => Err(unexpected(CyclicBarrierContract::ID, other)),
        }
    }

    /// Break the current generation
    pub async fn reset(&self) -> Result<()> {
        match self.port.call(CyclicBarrierRequest::Reset).await? {
            CyclicBarrierResponse::Done => Ok(()),
            other => Err(unexpected(CyclicBarrierContract::ID, other)),
        }
    }
}

/// Client of a count-down latch tool port
pub struct CountDownLatchClient {
    port: Arc<OutboundPort<CountDownLatchContract>>,
}

impl CountDownLatchClient {
    pub async fn connect(owner: &ComponentCore, tool_port_uri: &str) -> Result<Self> {
        Ok(Self {
            port: attach(owner, tool_port_uri).await?,
        })
    }

    pub fn port(&self) -> &Arc<OutboundPort<CountDownLatchContract>> {
        &self.port
    }

    async fn done(&self, request: CountDownLatchRequest) -> Result<()> {
        match self.port.call(request).await? {
            CountDownLatchResponse::Done => Ok(()),
            other => Err(unexpected(CountDownLatchContract::ID, other)),
        }
    }

    /// Wait until the count reaches zero
    pub async fn await_latch(&self) -> Result<()> {
        self.done(CountDownLatchRequest::Await).await
    }

    /// Decrement the count, releasing waiters at zero
    pub async fn count_down(&self) -> Result<()> {
        self.done(CountDownLatchRequest::CountDown).await
    }

    pub async fn get_count(&self) -> Result<u32> {
        match self.port.call(CountDownLatchRequest::GetCount).await? {
            CountDownLatchResponse::Count { value } => Ok(value),
            other => Err(unexpected(CountDownLatchContract::ID, other)),
        }
    }
}

/// Client of a bounded blocking queue tool port
pub struct ArrayBlockingQueueClient {
    port: Arc<OutboundPort<ArrayBlockingQueueContract>>,
}

impl ArrayBlockingQueueClient {
    pub async fn connect(owner: &ComponentCore, tool_port_uri: &str) -> Result<Self> {
        Ok(Self {
            port: attach(owner, tool_port_uri).await?,
        })
    }

    pub fn port(&self) -> &Arc<OutboundPort<ArrayBlockingQueueContract>> {
        &self.port
    }

    async fn count(&self, request: QueueRequest) -> Result<u32> {
        match self.port.call(request).await? {
            QueueResponse::Count { value } => Ok(value),
            other => Err(unexpected(ArrayBlockingQueueContract::ID, other)),
        }
    }

    /// Append `item`, waiting while the queue is full
    pub async fn put<T: Serialize>(&self, item: &T) -> Result<()> {
        let item = serde_json::to_value(item)?;
        match self.port.call(QueueRequest::Put { item }).await? {
            QueueResponse::Done => Ok(()),
            other => Err(unexpected(ArrayBlockingQueueContract::ID, other)),
        }
    }

    /// Remove the head, waiting while the queue is empty
    pub async fn take<T: DeserializeOwned>(&self) -> Result<T> {
        match self.port.call(QueueRequest::Take).await? {
            QueueResponse::Item { item } => Ok(serde_json::from_value(item)?),
            other => Err(unexpected(ArrayBlockingQueueContract::ID, other)),
        }
    }

    /// Append `item` if there is room
    pub async fn offer<T: Serialize>(&self, item: &T) -> Result<bool> {
        let item = serde_json::to_value(item)?;
        match self.port.call(QueueRequest::Offer { item }).await? {
            QueueResponse::Offered { accepted } => Ok(accepted),
            other => Err(unexpected(ArrayBlockingQueueContract::ID, other)),
        }
    }

    /// Remove the head if there is one
    pub async fn poll<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.port.call(QueueRequest::Poll).await? {
            QueueResponse::Polled { item } => item
                .map(serde_json::from_value::<T>)
                .transpose()
                .map_err(CvmError::from),
            other => Err(unexpected(ArrayBlockingQueueContract::ID, other)),
        }
    }

    /// Items currently buffered
    pub async fn size(&self) -> Result<u32> {
        self.count(QueueRequest::Size).await
    }

    /// Items that can be added without blocking
    pub async fn remaining_capacity(&self) -> Result<u32> {
        self.count(QueueRequest::RemainingCapacity).await
    }

    /// Raw JSON take, for heterogeneous queues
    pub async fn take_value(&self) -> Result<Value> {
        self.take::<Value>().await
    }
}
