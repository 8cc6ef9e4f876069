//! Execution strategies for a tool batch.
//!
//! Both strategies fan out every invocation and join them all before
//! returning; results come back in input order whatever the completion order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::ParleyError;
use crate::tools::{Capability, ToolArguments};

/// One capability invocation within a batch.
pub struct Invocation {
    pub call_id: String,
    pub capability: Arc<dyn Capability>,
    pub arguments: Option<ToolArguments>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("call_id", &self.call_id)
            .field("capability", &self.capability.name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Explicit per-call result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Success(Value),
    Failure(String),
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<Value, ParleyError>> for CallResult {
    fn from(result: Result<Value, ParleyError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("capability panicked: {message}")
}

/// How the dispatcher runs a batch.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run every invocation to completion. One result per invocation, in
    /// input order; a failing invocation never affects its siblings.
    async fn run_batch(&self, batch: Vec<Invocation>) -> Vec<CallResult>;
}

/// Every invocation as a future on the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cooperative;

#[async_trait]
impl ExecutionStrategy for Cooperative {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    async fn run_batch(&self, batch: Vec<Invocation>) -> Vec<CallResult> {
        let futures = batch.into_iter().map(|inv| async move {
            let invoked = AssertUnwindSafe(inv.capability.invoke(inv.arguments))
                .catch_unwind()
                .await;
            match invoked {
                Ok(result) => CallResult::from(result),
                Err(payload) => CallResult::Failure(panic_reason(payload.as_ref())),
            }
        });
        future::join_all(futures).await
    }
}

/// Each invocation on a blocking worker thread, at most `max_workers` at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl ExecutionStrategy for WorkerPool {
    fn name(&self) -> &'static str {
        "worker_pool"
    }

    async fn run_batch(&self, batch: Vec<Invocation>) -> Vec<CallResult> {
        let handle = tokio::runtime::Handle::current();
        let jobs = batch.into_iter().map(|inv| {
            let permits = Arc::clone(&self.permits);
            let handle = handle.clone();
            async move {
                let _permit = permits.acquire_owned().await.ok();
                let worker = tokio::task::spawn_blocking(move || {
                    handle.block_on(inv.capability.invoke(inv.arguments))
                });
                match worker.await {
                    Ok(result) => CallResult::from(result),
                    Err(join_error) if join_error.is_panic() => {
                        CallResult::Failure(panic_reason(join_error.into_panic().as_ref()))
                    }
                    Err(join_error) => CallResult::Failure(join_error.to_string()),
                }
            }
        });
        future::join_all(jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CapabilityParameters, FnCapability};
    use std::time::Duration;

    fn delayed(name: &'static str, millis: u64) -> Arc<dyn Capability> {
        Arc::new(FnCapability::new(
            name,
            "sleeps then echoes",
            CapabilityParameters::empty(),
            move |_| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Value::String(name.to_string()))
            },
        ))
    }

    fn panicking() -> Arc<dyn Capability> {
        Arc::new(FnCapability::new(
            "explode",
            "panics",
            CapabilityParameters::empty(),
            |_| async move {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            },
        ))
    }

    fn invocation(id: &str, capability: Arc<dyn Capability>) -> Invocation {
        Invocation {
            call_id: id.to_string(),
            capability,
            arguments: None,
        }
    }

    async fn check_strategy(strategy: &dyn ExecutionStrategy) {
        let batch = vec![
            invocation("slow", delayed("slow", 40)),
            invocation("boom", panicking()),
            invocation("fast", delayed("fast", 1)),
        ];

        let results = strategy.run_batch(batch).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], CallResult::Success(Value::String("slow".into())));
        assert!(matches!(&results[1], CallResult::Failure(reason) if reason.contains("boom")));
        assert_eq!(results[2], CallResult::Success(Value::String("fast".into())));
    }

    #[tokio::test]
    async fn cooperative_preserves_order_and_isolates_panics() {
        check_strategy(&Cooperative).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_pool_preserves_order_and_isolates_panics() {
        check_strategy(&WorkerPool::new(2)).await;
    }

    #[test]
    fn worker_pool_needs_at_least_one_worker() {
        assert_eq!(WorkerPool::new(0).max_workers(), 1);
    }
}
