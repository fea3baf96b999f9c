//! Throughput of submit -> dispatch -> await_result on the in-memory
//! backend, with a single worker and with four.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Value;
use tokio::runtime::Runtime;

use honeyqueue::backend::memory::MemoryBackend;
use honeyqueue::error::Result;
use honeyqueue::failure_mode::MemoryFailureMode;
use honeyqueue::registry::PoolRegistry;
use honeyqueue::types::{OwnerId, PoolConfig, PoolId, Task};
use honeyqueue::worker::WorkerModule;
use honeyqueue::pool;

struct NoopWorker;

#[async_trait]
impl WorkerModule for NoopWorker {
    type State = ();

    async fn init(&self) -> Result<Self::State> {
        Ok(())
    }

    async fn call(&self, _state: &Self::State, _task: &Task) -> Result<Value> {
        Ok(Value::Null)
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("submit_await_result");

    for workers in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            let submission = rt.block_on(async {
                let backend: Arc<dyn honeyqueue::QueueBackend> = Arc::new(MemoryBackend::new());
                let registry = Arc::new(PoolRegistry::new());
                let config = PoolConfig::new(PoolId::local("bench")).with_workers(workers);
                pool::start(
                    config,
                    backend,
                    Arc::new(NoopWorker),
                    Arc::new(MemoryFailureMode::default()),
                    registry,
                )
                .await
                .unwrap()
            });
            let owner = OwnerId::new("bench");

            b.to_async(&rt).iter(|| {
                let submission = submission.clone();
                let owner = owner.clone();
                async move {
                    let request_id = submission.submit(owner.clone(), Task::method("noop")).await.unwrap();
                    submission
                        .await_result(&owner, request_id, Duration::from_secs(5))
                        .await
                        .unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
