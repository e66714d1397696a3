// src/sync/contracts.rs
//! Service contracts of the synchronization tools and their manager

use crate::component::contract::ServiceContract;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The four kinds of synchronization tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Semaphore,
    CyclicBarrier,
    CountDownLatch,
    ArrayBlockingQueue,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Semaphore,
        ToolKind::CyclicBarrier,
        ToolKind::CountDownLatch,
        ToolKind::ArrayBlockingQueue,
    ];

    /// Factory type tag used to create the tool component
    pub fn type_tag(&self) -> &'static str {
        match self {
            ToolKind::Semaphore => "cvm.sync.semaphore",
            ToolKind::CyclicBarrier => "cvm.sync.cyclic-barrier",
            ToolKind::CountDownLatch => "cvm.sync.count-down-latch",
            ToolKind::ArrayBlockingQueue => "cvm.sync.array-blocking-queue",
        }
    }

    /// Contract offered by the tool's client ports
    pub fn contract_id(&self) -> &'static str {
        match self {
            ToolKind::Semaphore => SemaphoreContract::ID,
            ToolKind::CyclicBarrier => CyclicBarrierContract::ID,
            ToolKind::CountDownLatch => CountDownLatchContract::ID,
            ToolKind::ArrayBlockingQueue => ArrayBlockingQueueContract::ID,
        }
    }

    /// Short name used in logs, metric labels and component URIs
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Semaphore => "semaphore",
            ToolKind::CyclicBarrier => "cyclic_barrier",
            ToolKind::CountDownLatch => "count_down_latch",
            ToolKind::ArrayBlockingQueue => "array_blocking_queue",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---- Semaphore ----

pub struct SemaphoreContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SemaphoreRequest {
    Acquire { permits: u32 },
    Release { permits: u32 },
    TryAcquire { permits: u32 },
    TryAcquireTimeout { permits: u32, timeout_ms: u64 },
    AvailablePermits,
    QueueLength,
    DrainPermits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SemaphoreResponse {
    Done,
    Acquired { acquired: bool },
    Count { value: u32 },
}

impl ServiceContract for SemaphoreContract {
    const ID: &'static str = "cvm.sync.semaphore";
    type Request = SemaphoreRequest;
    type Response = SemaphoreResponse;
}

// ---- CyclicBarrier ----

pub struct CyclicBarrierContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CyclicBarrierRequest {
    Await,
    NumberWaiting,
    NumberToWait,
    Parties,
    Generation,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CyclicBarrierResponse {
    /// Arrival index: parties - 1 for the first arriver, 0 for the last
    Arrived { index: u32 },
    Count { value: u32 },
    Generation { value: u64 },
    Done,
}

impl ServiceContract for CyclicBarrierContract {
    const ID: &'static str = "cvm.sync.cyclic-barrier";
    type Request = CyclicBarrierRequest;
    type Response = CyclicBarrierResponse;
}

// ---- CountDownLatch ----

pub struct CountDownLatchContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CountDownLatchRequest {
    Await,
    CountDown,
    GetCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CountDownLatchResponse {
    Done,
    Count { value: u32 },
}

impl ServiceContract for CountDownLatchContract {
    const ID: &'static str = "cvm.sync.count-down-latch";
    type Request = CountDownLatchRequest;
    type Response = CountDownLatchResponse;
}

// ---- ArrayBlockingQueue ----

pub struct ArrayBlockingQueueContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueueRequest {
    Put { item: Value },
    Take,
    Offer { item: Value },
    Poll,
    Size,
    RemainingCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QueueResponse {
    Done,
    Item { item: Value },
    Offered { accepted: bool },
    Polled { item: Option<Value> },
    Count { value: u32 },
}

impl ServiceContract for ArrayBlockingQueueContract {
    const ID: &'static str = "cvm.sync.array-blocking-queue";
    type Request = QueueRequest;
    type Response = QueueResponse;
}

// ---- SynchronizerManager ----

pub struct SynchronizerManagerContract;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ManagerRequest {
    /// Grant `client` a dedicated port on the tool of (`kind`, `group`)
    ProvideUri {
        kind: ToolKind,
        group: String,
        client: String,
    },
    /// Return a previously granted port
    ReleaseUri {
        kind: ToolKind,
        group: String,
        client: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ManagerResponse {
    Uri { uri: String },
    Released,
}

impl ServiceContract for SynchronizerManagerContract {
    const ID: &'static str = "cvm.sync.synchronizer-manager";
    type Request = ManagerRequest;
    type Response = ManagerResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = SemaphoreRequest::TryAcquireTimeout {
            permits: 2,
            timeout_ms: 500,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"op": "try_acquire_timeout", "permits": 2, "timeout_ms": 500})
        );

        let request: ManagerRequest = serde_json::from_value(json!({
            "op": "provide_uri",
            "kind": "cyclic_barrier",
            "group": "g1:2",
            "client": "cvm://a/client"
        }))
        .unwrap();
        assert!(matches!(
            request,
            ManagerRequest::ProvideUri { kind: ToolKind::CyclicBarrier, .. }
        ));
    }

    #[test]
    fn test_kind_tags_are_distinct() {
        let tags: std::collections::HashSet<_> = ToolKind::ALL.iter().map(|k| k.type_tag()).collect();
        assert_eq!(tags.len(), ToolKind::ALL.len());
        assert_eq!(ToolKind::Semaphore.contract_id(), SemaphoreContract::ID);
    }
}
