//! Worker: executes one job at a time against a user-supplied module.
//!
//! Deliberately does *not* catch panics here — a panicking task is the
//! crash signal the worker monitor's `JoinHandle` is built to observe
//! (see `monitor.rs`). Catching it in-line would make a genuine worker
//! death indistinguishable from an ordinary `WorkerModule::call` error,
//! which is exactly the distinction the monitor needs to decide whether
//! to run the failure mode and nack with `redeliver=true`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::error::Result;
use crate::types::{Job, JobResult, Task};

/// User-supplied behavior a pool dispatches jobs to.
///
/// `init` runs once per worker at startup (e.g. opening a DB connection);
/// its return value is threaded into every `call`.
#[async_trait]
pub trait WorkerModule: Send + Sync + 'static {
    type State: Send + Sync + 'static;

    async fn init(&self) -> Result<Self::State>;

    async fn call(&self, state: &Self::State, task: &Task) -> Result<Value>;
}

/// Runs a single job against `module`'s state and turns the outcome into
/// a `JobResult`. A panic inside `module.call` is not caught here — it
/// propagates and takes down whichever task called `execute`, by design.
#[instrument(skip(module, state, job), fields(job_id = %job.id, method = %job.task.method_name()))]
pub async fn execute<M: WorkerModule>(module: &M, state: &M::State, job: &Job) -> JobResult {
    match module.call(state, &job.task).await {
        Ok(value) => JobResult::Ok { value },
        Err(err) => JobResult::Err {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    struct Echo;

    #[async_trait]
    impl WorkerModule for Echo {
        type State = ();

        async fn init(&self) -> Result<Self::State> {
            Ok(())
        }

        async fn call(&self, _state: &Self::State, task: &Task) -> Result<Value> {
            match task.method_name() {
                "echo" => Ok(task.args().first().cloned().unwrap_or(Value::Null)),
                "fail" => Err(JobError::WorkerCrashed("intentional failure".into())),
                "panic" => panic!("intentional panic"),
                other => Err(JobError::NotFound(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_execute_returns_ok_result() {
        let module = Echo;
        let job = Job::new(Task::method_args("echo", vec![serde_json::json!("hi")]));
        let result = execute(&module, &(), &job).await;
        assert!(matches!(result, JobResult::Ok { .. }));
    }

    #[tokio::test]
    async fn test_execute_returns_err_on_module_error() {
        let module = Echo;
        let job = Job::new(Task::method("fail"));
        let result = execute(&module, &(), &job).await;
        assert!(matches!(result, JobResult::Err { .. }));
    }

    #[tokio::test]
    #[should_panic(expected = "intentional panic")]
    async fn test_execute_propagates_panic_rather_than_catching_it() {
        let module = Echo;
        let job = Job::new(Task::method("panic"));
        execute(&module, &(), &job).await;
    }
}
