//! Request dispatch throughput: executor round trips, local port calls and
//! semaphore acquire/release through the synchronizer manager.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cvm_runtime::component::{Component, ComponentCore, PlainComponent};
use cvm_runtime::cvm::Cvm;
use cvm_runtime::sync::{GroupId, SynchronizerManager, SynchronizerManagerClient};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_sync_requests(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("executor");

    for threads in [1usize, 4] {
        let (_cvm, component) = rt.block_on(async {
            let cvm = Cvm::local("bench").unwrap();
            let component = PlainComponent::new(ComponentCore::with_threads(&cvm, "worker", threads));
            (cvm, component)
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("sync_request", threads), &component, |b, component| {
            let component: Arc<PlainComponent> = Arc::clone(component);
            b.to_async(&rt).iter(|| {
                let component = Arc::clone(&component);
                async move {
                    component
                        .core()
                        .handle_request_sync(|| async { Ok(1u64) })
                        .await
                        .unwrap()
                }
            });
        });
    }

    group.finish();
}

fn bench_semaphore_round_trip(c: &mut Criterion) {
    let rt = runtime();

    let (_cvm, _owner, semaphore) = rt.block_on(async {
        let cvm = Cvm::local("bench").unwrap();
        SynchronizerManager::install(&cvm).await.unwrap();

        let owner = PlainComponent::new(ComponentCore::new(&cvm, "client"));
        let manager = SynchronizerManagerClient::connect(owner.core(), cvm.node_id())
            .await
            .unwrap();
        let semaphore = manager
            .semaphore(owner.core(), &GroupId::new("bench", 1).unwrap())
            .await
            .unwrap();
        (cvm, owner, Arc::new(semaphore))
    });

    c.bench_function("semaphore_acquire_release", |b| {
        b.to_async(&rt).iter(|| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                semaphore.acquire().await.unwrap();
                semaphore.release().await.unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_sync_requests, bench_semaphore_round_trip);
criterion_main!(benches);
