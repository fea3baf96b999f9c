//! End-to-end tests exercising a pool running entirely on the in-memory
//! backend: happy-path replies, no-reply submissions, back-pressure with
//! more jobs than workers, owner mismatch, worker errors, and worker
//! crashes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use honeyqueue::backend::memory::MemoryBackend;
use honeyqueue::error::{JobError, Result};
use honeyqueue::failure_mode::{FailureMode, MemoryFailureMode};
use honeyqueue::registry::PoolRegistry;
use honeyqueue::types::{JobResult, OwnerId, PoolConfig, PoolId, Task};
use honeyqueue::worker::WorkerModule;
use honeyqueue::pool;

struct Calculator;

#[async_trait]
impl WorkerModule for Calculator {
    type State = ();

    async fn init(&self) -> Result<Self::State> {
        Ok(())
    }

    async fn call(&self, _state: &Self::State, task: &Task) -> Result<Value> {
        match task.method_name() {
            "add" => {
                let args = task.args();
                let a = args[0].as_i64().unwrap_or(0);
                let b = args[1].as_i64().unwrap_or(0);
                Ok(serde_json::json!(a + b))
            }
            "boom" => Err(JobError::WorkerCrashed("division by zero".into())),
            "panic" => panic!("calculator exploded"),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Value::Null)
            }
            other => Err(JobError::NotFound(other.to_string())),
        }
    }
}

async fn start_pool(workers: usize, failure_mode: Arc<dyn FailureMode>) -> honeyqueue::Pool {
    let backend: Arc<dyn honeyqueue::QueueBackend> = Arc::new(MemoryBackend::new());
    let registry = Arc::new(PoolRegistry::new());
    let config = PoolConfig::new(PoolId::local("calc")).with_workers(workers).with_queues(1);

    pool::start(config, backend, Arc::new(Calculator), failure_mode, registry)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_submit_and_await_result_happy_path() {
    let submission = start_pool(1, Arc::new(MemoryFailureMode::default())).await;
    let owner = OwnerId::new("alice");

    let request_id = submission
        .submit(owner.clone(), Task::method_args("add", vec![serde_json::json!(2), serde_json::json!(3)]))
        .await
        .unwrap();

    let result = submission
        .await_result(&owner, request_id, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("job should complete within the timeout");

    match result {
        JobResult::Ok { value } => assert_eq!(value, serde_json::json!(5)),
        JobResult::Err { message } => panic!("unexpected error: {message}"),
    }
}

#[tokio::test]
async fn test_submit_no_reply_does_not_block_caller() {
    let submission = start_pool(1, Arc::new(MemoryFailureMode::default())).await;
    let id = submission.submit_no_reply(Task::method("slow")).await.unwrap();
    assert_ne!(id, uuid::Uuid::nil());
}

#[tokio::test]
async fn test_await_result_rejects_non_owner() {
    let submission = start_pool(1, Arc::new(MemoryFailureMode::default())).await;
    let owner = OwnerId::new("alice");
    let request_id = submission.submit(owner, Task::method("add")).await.unwrap();

    let attacker = OwnerId::new("mallory");
    let result = submission
        .await_result(&attacker, request_id, Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(JobError::OwnerMismatch)));
}

#[tokio::test]
async fn test_worker_error_completes_normally_without_failure_mode() {
    // An ordinary `Err` from `WorkerModule::call` (no panic) is a
    // completed job: it gets acked and a normal reply, and must never
    // invoke the failure mode — only a worker crash does that.
    let failure_mode = Arc::new(MemoryFailureMode::default());
    let submission = start_pool(1, failure_mode.clone() as Arc<dyn FailureMode>).await;
    let owner = OwnerId::new("alice");

    let request_id = submission.submit(owner.clone(), Task::method("boom")).await.unwrap();
    let result = submission
        .await_result(&owner, request_id, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("an ordinary error still delivers a reply");

    assert!(matches!(result, JobResult::Err { .. }));
    assert_eq!(failure_mode.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_panic_times_out_the_waiter_and_invokes_failure_mode() {
    // A panic kills the worker task before it can reply. The submitter
    // never gets an answer — `await_result` times out instead of
    // receiving an `Err` — and the job is handed to the failure mode
    // after being nacked with redeliver=true.
    let failure_mode = Arc::new(MemoryFailureMode::default());
    let submission = start_pool(1, failure_mode.clone() as Arc<dyn FailureMode>).await;
    let owner = OwnerId::new("alice");

    let request_id = submission.submit(owner.clone(), Task::method("panic")).await.unwrap();
    let result = submission
        .await_result(&owner, request_id, Duration::from_millis(300))
        .await
        .unwrap();

    assert!(result.is_none(), "a crashed job must never deliver a normal reply");

    // The monitor's failure-mode call is spawned off detached, give it a
    // moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(failure_mode.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_two_workers_process_concurrent_submissions() {
    let submission = start_pool(2, Arc::new(MemoryFailureMode::default())).await;
    let owner = OwnerId::new("alice");

    let mut request_ids = Vec::new();
    for _ in 0..4 {
        let id = submission
            .submit(owner.clone(), Task::method("slow"))
            .await
            .unwrap();
        request_ids.push(id);
    }

    for id in request_ids {
        submission
            .await_result(&owner, id, Duration::from_secs(2))
            .await
            .unwrap()
            .expect("job should complete within the timeout");
    }
}

#[tokio::test]
async fn test_suspend_pauses_dispatch_until_resume() {
    let submission = start_pool(1, Arc::new(MemoryFailureMode::default())).await;
    submission.suspend();

    let owner = OwnerId::new("alice");
    let request_id = submission
        .submit(owner.clone(), Task::method_args("add", vec![serde_json::json!(1), serde_json::json!(1)]))
        .await
        .unwrap();

    let quick = submission
        .await_result(&owner, request_id, Duration::from_millis(150))
        .await
        .unwrap();
    assert!(quick.is_none(), "job should not complete while suspended");

    submission.resume();
    let result = submission
        .await_result(&owner, request_id, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("job should complete after resume");
    assert!(matches!(result, JobResult::Ok { .. }));
}

#[tokio::test]
async fn test_filter_finds_ready_jobs_not_yet_dispatched() {
    let submission = start_pool(1, Arc::new(MemoryFailureMode::default())).await;
    submission.suspend();

    submission.submit_no_reply(Task::method("add")).await.unwrap();
    submission.submit_no_reply(Task::method("slow")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let matches = submission
        .filter(Box::new(|job| job.task.method_name() == "slow"))
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].task.method_name(), "slow");
}
