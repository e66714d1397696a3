//! Integration tests for ports, connectors and component lifecycle.
//!
//! These tests verify:
//! - Connection and disconnection errors
//! - Contract translation through a two-way connector
//! - Fire-and-forget requests and the failure log
//! - Mandatory ports gating `start`
//! - Best-effort teardown at shutdown

use async_trait::async_trait;
use cvm_runtime::component::{
    Component, ComponentCore, ComponentHandle, DispatchMode, FailureOrigin, LifecycleState,
    PlainComponent, ServiceContract,
};
use cvm_runtime::cvm::Cvm;
use cvm_runtime::port::{DataTransform, InboundPort, OutboundPort, Reply, ServiceHandler, TwoWayConnector};
use cvm_runtime::{CvmError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Contracts
// =============================================================================

/// Offered: a counter that can be bumped synchronously or in the background
struct Counter;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum CounterRequest {
    Add(u32),
    AddLater(u32),
    Get,
}

impl ServiceContract for Counter {
    const ID: &'static str = "test.counter";
    type Request = CounterRequest;
    type Response = u32;

    fn dispatch_mode(request: &CounterRequest) -> DispatchMode {
        match request {
            CounterRequest::AddLater(_) => DispatchMode::Async,
            _ => DispatchMode::Sync,
        }
    }
}

/// Required by clients that speak in strings
struct Tally;

impl ServiceContract for Tally {
    const ID: &'static str = "test.tally";
    type Request = String;
    type Response = String;
}

struct CounterHandler {
    value: AtomicU32,
}

#[async_trait]
impl ServiceHandler<Counter> for CounterHandler {
    async fn handle(&self, request: CounterRequest) -> Result<Reply<u32>> {
        match request {
            CounterRequest::Add(n) => Ok(Reply::Ready(self.value.fetch_add(n, Ordering::SeqCst) + n)),
            CounterRequest::AddLater(0) => Err(CvmError::TaskFailed("nothing to add".to_string())),
            CounterRequest::AddLater(n) => {
                self.value.fetch_add(n, Ordering::SeqCst);
                Ok(Reply::Ready(0))
            }
            CounterRequest::Get => Ok(Reply::Ready(self.value.load(Ordering::SeqCst))),
        }
    }
}

struct TallyToCounter;

impl DataTransform<Tally, Counter> for TallyToCounter {
    fn required_to_offered(&self, request: String) -> CounterRequest {
        match request.parse::<u32>() {
            Ok(n) => CounterRequest::Add(n),
            Err(_) => CounterRequest::Get,
        }
    }

    fn offered_to_required(&self, response: u32) -> String {
        format!("total={}", response)
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    cvm: Cvm,
    server: Arc<PlainComponent>,
    counter_uri: String,
}

async fn fixture() -> Fixture {
    let cvm = Cvm::local("node-a").unwrap();

    let server = PlainComponent::new(ComponentCore::new(&cvm, "server"));
    server.core().add_offered_interface::<Counter>();
    let port = InboundPort::<Counter>::create(
        server.core(),
        Arc::new(CounterHandler {
            value: AtomicU32::new(0),
        }),
    )
    .unwrap();
    port.publish_for_mode().unwrap();

    let handle = ComponentHandle::new(server.clone());
    cvm.deploy(handle.clone()).unwrap();
    handle.start().await.unwrap();

    Fixture {
        cvm,
        server,
        counter_uri: port.uri().to_string(),
    }
}

fn client(cvm: &Cvm) -> Arc<PlainComponent> {
    let client = PlainComponent::new(ComponentCore::new(cvm, "client"));
    client.core().add_required_interface::<Counter>();
    client
}

// =============================================================================
// Connection Protocol
// =============================================================================

#[tokio::test]
async fn test_port_requires_declared_contract() {
    let f = fixture().await;
    let bare = PlainComponent::new(ComponentCore::new(&f.cvm, "bare"));

    let result = OutboundPort::<Counter>::create(bare.core());
    assert!(matches!(result, Err(CvmError::Construction(_))));

    let offered = InboundPort::<Counter>::create(
        bare.core(),
        Arc::new(CounterHandler {
            value: AtomicU32::new(0),
        }),
    );
    assert!(matches!(offered, Err(CvmError::Construction(_))));
}

#[tokio::test]
async fn test_connection_errors() {
    let f = fixture().await;
    let client = client(&f.cvm);
    let port = OutboundPort::<Counter>::create(client.core()).unwrap();

    assert!(matches!(port.call(CounterRequest::Get).await, Err(CvmError::Connection(_))));
    assert!(matches!(port.do_disconnection().await, Err(CvmError::Connection(_))));

    let missing = format!("cvm://{}/missing", f.cvm.node_id());
    assert!(matches!(port.connect(&missing).await, Err(CvmError::Connection(_))));
    assert!(!port.is_connected());

    port.connect(&f.counter_uri).await.unwrap();
    assert_eq!(port.peer_uri().as_deref(), Some(f.counter_uri.as_str()));
    assert!(matches!(port.connect(&f.counter_uri).await, Err(CvmError::Connection(_))));

    assert_eq!(port.call(CounterRequest::Add(5)).await.unwrap(), 5);

    port.do_disconnection().await.unwrap();
    assert!(matches!(port.do_disconnection().await, Err(CvmError::Connection(_))));

    // Reconnecting after a disconnection is allowed
    port.connect(&f.counter_uri).await.unwrap();
    assert_eq!(port.call(CounterRequest::Get).await.unwrap(), 5);
}

#[tokio::test]
async fn test_foreign_node_unresolvable_in_local_mode() {
    let f = fixture().await;
    let client = client(&f.cvm);
    let port = OutboundPort::<Counter>::create(client.core()).unwrap();

    let result = port.connect("cvm://node-z/anything").await;
    assert!(matches!(result, Err(CvmError::Connection(_))));
}

#[tokio::test]
async fn test_two_way_connector_translates_both_ways() {
    let f = fixture().await;
    let client = PlainComponent::new(ComponentCore::new(&f.cvm, "tally-client"));
    client.core().add_required_interface::<Tally>();
    let port = OutboundPort::<Tally>::create(client.core()).unwrap();

    port.do_connection(&f.counter_uri, &TwoWayConnector::<Counter, _>::new(TallyToCounter))
        .await
        .unwrap();

    assert_eq!(port.call("3".to_string()).await.unwrap(), "total=3");
    assert_eq!(port.call("4".to_string()).await.unwrap(), "total=7");
    assert_eq!(port.call("?".to_string()).await.unwrap(), "total=7");
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_async_requests_report_to_failure_log() {
    let f = fixture().await;
    let client = client(&f.cvm);
    let port = OutboundPort::<Counter>::create(client.core()).unwrap();
    port.connect(&f.counter_uri).await.unwrap();

    // No result travels back for background requests
    assert!(port.invoke(CounterRequest::AddLater(2)).await.unwrap().is_none());
    port.send(CounterRequest::AddLater(0)).await.unwrap();

    let mut failures = Vec::new();
    for _ in 0..100 {
        failures.extend(f.server.core().recent_failures());
        if !failures.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].origin, FailureOrigin::AsyncRequest);
    assert!(matches!(failures[0].error, CvmError::TaskFailed(_)));

    // Nothing leaked to the client, and the good request was applied
    assert!(client.core().recent_failures().is_empty());
    assert_eq!(port.call(CounterRequest::Get).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_task_on_component() {
    let f = fixture().await;
    let ticks = Arc::new(AtomicU32::new(0));

    let counted = Arc::clone(&ticks);
    let task = f
        .server
        .core()
        .schedule_task_at_fixed_rate(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    task.cancel();
    let fired = ticks.load(Ordering::SeqCst);
    assert_eq!(fired, 3);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), fired);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_mandatory_port_gates_start() {
    let f = fixture().await;
    let client = client(&f.cvm);
    let port = OutboundPort::<Counter>::create(client.core()).unwrap();
    client.core().mark_mandatory(port.uri()).unwrap();

    let handle = ComponentHandle::new(client.clone());
    f.cvm.deploy(handle.clone()).unwrap();

    assert!(matches!(handle.start().await, Err(CvmError::Lifecycle(_))));
    assert_eq!(handle.state(), LifecycleState::Created);

    port.connect(&f.counter_uri).await.unwrap();
    handle.start().await.unwrap();
    assert_eq!(handle.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_shutdown_tears_down_ports() {
    let f = fixture().await;
    let client = client(&f.cvm);
    let port = OutboundPort::<Counter>::create(client.core()).unwrap();
    port.connect(&f.counter_uri).await.unwrap();

    let handle = ComponentHandle::new(client.clone());
    f.cvm.deploy(handle.clone()).unwrap();
    handle.start().await.unwrap();

    handle.shutdown().await.unwrap();
    assert_eq!(handle.state(), LifecycleState::Terminated);
    assert!(!port.is_connected());
    assert!(client.core().port_uris().is_empty());
    assert!(f.cvm.component(handle.uri()).is_none());

    // Shutting down again is a no-op
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cvm_shutdown_unpublishes_everything() {
    let f = fixture().await;
    assert!(f.cvm.is_published(&f.counter_uri));

    f.cvm.shutdown().await.unwrap();

    assert!(!f.cvm.is_published(&f.counter_uri));
    assert!(f.cvm.components().is_empty());
    assert_eq!(f.server.core().state(), LifecycleState::Terminated);
}
