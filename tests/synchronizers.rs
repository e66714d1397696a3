//! Integration tests for the synchronization tools.
//!
//! These tests drive the tools the way components do: through the
//! SynchronizerManager and the typed clients, with every call crossing an
//! outbound port.

use cvm_runtime::component::{Component, ComponentCore, ComponentHandle, PlainComponent};
use cvm_runtime::cvm::Cvm;
use cvm_runtime::sync::{
    GroupId, SemaphoreClient, SemaphoreTool, SynchronizerManager, SynchronizerManagerClient, ToolKind,
};
use cvm_runtime::CvmError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

async fn node() -> (Cvm, ComponentHandle) {
    let cvm = Cvm::local("node-a").unwrap();
    let manager = SynchronizerManager::install(&cvm).await.unwrap();
    (cvm, manager)
}

/// A client component connected to the local manager
async fn client(cvm: &Cvm, name: &str) -> (Arc<PlainComponent>, SynchronizerManagerClient) {
    let owner = PlainComponent::new(ComponentCore::new(cvm, name));
    let manager = SynchronizerManagerClient::connect(owner.core(), cvm.node_id())
        .await
        .unwrap();
    (owner, manager)
}

fn group(name: &str, parameter: u32) -> GroupId {
    GroupId::new(name, parameter).unwrap()
}

/// Yield until `condition` holds, giving parked callers time to register
async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..1_000 {
        if condition().await {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}

// =============================================================================
// Semaphore
// =============================================================================

#[tokio::test]
async fn test_semaphore_hands_permit_to_blocked_client() {
    let (cvm, _manager) = node().await;
    let g1 = group("g1", 1);
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let (owner_a, manager_a) = client(&cvm, "client-a").await;
    let (owner_b, manager_b) = client(&cvm, "client-b").await;

    let uri_a = manager_a.provide_uri(ToolKind::Semaphore, &g1).await.unwrap();
    let uri_b = manager_b.provide_uri(ToolKind::Semaphore, &g1).await.unwrap();
    assert_ne!(uri_a, uri_b);

    let sem_a = SemaphoreClient::connect(owner_a.core(), &uri_a)
        .await
        .unwrap();
    let sem_b = SemaphoreClient::connect(owner_b.core(), &uri_b)
        .await
        .unwrap();

    sem_a.acquire().await.unwrap();
    log.lock().push("a acquired");

    let b_log = Arc::clone(&log);
    let blocked = tokio::spawn(async move {
        sem_b.acquire().await.unwrap();
        b_log.lock().push("b acquired");
    });

    let observer = &sem_a;
    eventually(|| async move { observer.queue_length().await.unwrap() == 1 }).await;
    assert_eq!(sem_a.available_permits().await.unwrap(), 0);

    log.lock().push("a releasing");
    sem_a.release().await.unwrap();
    blocked.await.unwrap();

    assert_eq!(*log.lock(), vec!["a acquired", "a releasing", "b acquired"]);
    assert_eq!(sem_a.queue_length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_semaphore_try_acquire_and_drain() {
    let (cvm, _manager) = node().await;
    let (owner, manager) = client(&cvm, "client").await;
    let sem = manager.semaphore(owner.core(), &group("pool", 3)).await.unwrap();

    assert!(sem.try_acquire().await.unwrap());
    assert_eq!(sem.drain_permits().await.unwrap(), 2);
    assert!(!sem.try_acquire().await.unwrap());

    sem.release_many(2).await.unwrap();
    sem.acquire_many(2).await.unwrap();
    assert_eq!(sem.available_permits().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_semaphore_timed_attempt_expires() {
    let (cvm, _manager) = node().await;
    let (owner, manager) = client(&cvm, "client").await;
    let sem = manager.semaphore(owner.core(), &group("timed", 0)).await.unwrap();

    let started = tokio::time::Instant::now();
    let acquired = sem
        .try_acquire_timeout(1, Duration::from_millis(500))
        .await
        .unwrap();

    assert!(!acquired);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(sem.queue_length().await.unwrap(), 0);
}

// =============================================================================
// Cyclic Barrier
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_barrier_releases_first_caller_only_after_second_arrives() {
    let (cvm, _manager) = node().await;
    let pair = group("pair", 2);

    let (owner_a, manager_a) = client(&cvm, "client-a").await;
    let (owner_b, manager_b) = client(&cvm, "client-b").await;
    let barrier_a = manager_a.cyclic_barrier(owner_a.core(), &pair).await.unwrap();
    let barrier_b = manager_b.cyclic_barrier(owner_b.core(), &pair).await.unwrap();

    let started = tokio::time::Instant::now();
    let first = tokio::spawn(async move {
        let index = barrier_a.await_barrier().await.unwrap();
        (index, started.elapsed())
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(barrier_b.number_waiting().await.unwrap(), 1);
    let second_index = barrier_b.await_barrier().await.unwrap();

    let (first_index, first_elapsed) = first.await.unwrap();
    assert!(first_elapsed >= Duration::from_secs(2));
    assert_eq!(first_index, 1);
    assert_eq!(second_index, 0);
    assert_eq!(barrier_b.generation().await.unwrap(), 1);
    assert_eq!(barrier_b.number_to_wait().await.unwrap(), 2);
}

#[tokio::test]
async fn test_barrier_reset_breaks_waiters() {
    let (cvm, _manager) = node().await;
    let trio = group("trio", 3);

    let (owner_a, manager_a) = client(&cvm, "client-a").await;
    let (owner_b, manager_b) = client(&cvm, "client-b").await;
    let barrier_a = manager_a.cyclic_barrier(owner_a.core(), &trio).await.unwrap();
    let barrier_b = manager_b.cyclic_barrier(owner_b.core(), &trio).await.unwrap();

    let waiting = tokio::spawn(async move { barrier_a.await_barrier().await });
    let observer = &barrier_b;
    eventually(|| async move { observer.number_waiting().await.unwrap() == 1 }).await;

    barrier_b.reset().await.unwrap();
    assert!(matches!(waiting.await.unwrap(), Err(CvmError::BrokenBarrier(_))));
    assert_eq!(barrier_b.parties().await.unwrap(), 3);
    assert_eq!(barrier_b.number_waiting().await.unwrap(), 0);
}

// =============================================================================
// Count-Down Latch
// =============================================================================

#[tokio::test]
async fn test_latch_releases_all_waiters() {
    let (cvm, _manager) = node().await;
    let gate = group("gate", 2);

    let mut waiters = Vec::new();
    let mut owners = Vec::new();
    for i in 0..3 {
        let (owner, manager) = client(&cvm, &format!("waiter-{}", i)).await;
        let latch = manager.count_down_latch(owner.core(), &gate).await.unwrap();
        waiters.push(tokio::spawn(async move { latch.await_latch().await }));
        owners.push(owner);
    }

    let (owner, manager) = client(&cvm, "counter").await;
    let latch = manager.count_down_latch(owner.core(), &gate).await.unwrap();

    latch.count_down().await.unwrap();
    assert_eq!(latch.get_count().await.unwrap(), 1);
    for waiter in &waiters {
        assert!(!waiter.is_finished());
    }

    latch.count_down().await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }

    // Later callers pass straight through
    latch.await_latch().await.unwrap();
    assert_eq!(latch.get_count().await.unwrap(), 0);
}

// =============================================================================
// Array Blocking Queue
// =============================================================================

#[tokio::test]
async fn test_queue_preserves_order_under_backpressure() {
    let (cvm, _manager) = node().await;
    let jobs = group("jobs", 2);

    let (producer_owner, producer_manager) = client(&cvm, "producer").await;
    let (consumer_owner, consumer_manager) = client(&cvm, "consumer").await;
    let producer = producer_manager
        .array_blocking_queue(producer_owner.core(), &jobs)
        .await
        .unwrap();
    let consumer = consumer_manager
        .array_blocking_queue(consumer_owner.core(), &jobs)
        .await
        .unwrap();

    let producing = tokio::spawn(async move {
        for i in 0..5u32 {
            producer.put(&i).await.unwrap();
        }
        producer
    });

    let mut taken = Vec::new();
    for _ in 0..5 {
        taken.push(consumer.take::<u32>().await.unwrap());
    }
    let producer = producing.await.unwrap();

    assert_eq!(taken, vec![0, 1, 2, 3, 4]);
    assert_eq!(consumer.size().await.unwrap(), 0);
    assert_eq!(consumer.remaining_capacity().await.unwrap(), 2);

    assert!(producer.offer(&"a").await.unwrap());
    assert!(producer.offer(&"b").await.unwrap());
    assert!(!producer.offer(&"c").await.unwrap());
    assert_eq!(consumer.poll::<String>().await.unwrap().as_deref(), Some("a"));
}

// =============================================================================
// Manager
// =============================================================================

#[tokio::test]
async fn test_duplicate_grant_rejected() {
    let (cvm, _manager) = node().await;
    let (_owner, manager) = client(&cvm, "client").await;
    let g = group("dup", 1);

    manager.provide_uri(ToolKind::Semaphore, &g).await.unwrap();
    let again = manager.provide_uri(ToolKind::Semaphore, &g).await;
    assert!(matches!(again, Err(CvmError::ToolProtocol(_))));

    // Same group name under another kind is a different tool
    assert!(manager.provide_uri(ToolKind::CountDownLatch, &g).await.is_ok());
}

#[tokio::test]
async fn test_release_allows_new_grant() {
    let (cvm, handle) = node().await;
    let manager_component = handle.downcast::<SynchronizerManager>().unwrap();
    let (_owner, manager) = client(&cvm, "client").await;
    let g = group("cycle", 1);

    let first = manager.provide_uri(ToolKind::Semaphore, &g).await.unwrap();
    assert!(cvm.is_published(&first));

    manager.release_uri(ToolKind::Semaphore, &g).await.unwrap();
    assert!(!cvm.is_published(&first));

    let second = manager.provide_uri(ToolKind::Semaphore, &g).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(manager_component.tool_count().await, 1);

    let unknown = manager.release_uri(ToolKind::CyclicBarrier, &g).await;
    assert!(matches!(unknown, Err(CvmError::ToolProtocol(_))));
}

#[tokio::test]
async fn test_mistyped_tool_is_torn_down() {
    let (cvm, _manager) = node().await;
    cvm.register_factory(
        ToolKind::Semaphore.type_tag(),
        |cvm: &Cvm, (name, _permits): (String, u32)| {
            Ok(ComponentHandle::new(PlainComponent::new(ComponentCore::new(cvm, &name))))
        },
    );
    let (_owner, manager) = client(&cvm, "client").await;
    let deployed = cvm.components().len();

    let result = manager.provide_uri(ToolKind::Semaphore, &group("impostor", 1)).await;

    assert!(matches!(result, Err(CvmError::ToolProtocol(_))));
    assert_eq!(cvm.components().len(), deployed);
}

#[tokio::test]
async fn test_shutdown_fails_parked_callers() {
    let (cvm, handle) = node().await;
    let closing = group("closing", 0);
    let (owner, manager) = client(&cvm, "client").await;
    let sem = manager.semaphore(owner.core(), &closing).await.unwrap();

    let tool_uri = handle
        .downcast::<SynchronizerManager>()
        .unwrap()
        .tool_uri(ToolKind::Semaphore, &closing)
        .await
        .unwrap();
    let tool = cvm
        .component(&tool_uri)
        .and_then(|h| h.downcast::<SemaphoreTool>())
        .unwrap();

    let parked = tokio::spawn(async move { sem.acquire().await });
    let observed = &tool;
    eventually(|| async move { observed.service().queue_length() == 1 }).await;

    handle.shutdown().await.unwrap();

    assert!(matches!(
        parked.await.unwrap(),
        Err(CvmError::ComponentTerminated(_))
    ));
    assert!(cvm.component(&tool_uri).is_none());
}
