//! SQL executor strategies
//!
//! Both strategies run the same [`ExecuteTask`]: the synchronous one on the
//! calling flow under a deadline, the asynchronous one by handing it to a
//! [`WorkQueue`] and returning straight away.

use async_trait::async_trait;
use querydesk_core::{
    Error, ErrorLevel, ErrorType, ExecutionContext, ExecutionStatus, LogParams, QueryId, Result,
    SqlLabError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::work_queue::{ExecuteTask, TaskRequest, WorkQueue};

pub const ASYNC_DISPATCH_FAILED_MESSAGE: &str = "Failed to start remote query on a worker.";

/// Strategy for running a prepared query
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(
        &self,
        context: &ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
    ) -> Result<ExecutionStatus>;
}

/// Runs the task in-process and waits for it, up to `timeout`
pub struct SynchronousSqlExecutor {
    task: Arc<dyn ExecuteTask>,
    timeout: Duration,
}

impl SynchronousSqlExecutor {
    pub fn new(task: Arc<dyn ExecuteTask>, timeout: Duration) -> Self {
        Self { task, timeout }
    }
}

#[async_trait]
impl SqlExecutor for SynchronousSqlExecutor {
    async fn execute(
        &self,
        context: &ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
    ) -> Result<ExecutionStatus> {
        let request = TaskRequest::new(context, query_id, ctas_no_limit, log_params);
        let task = Arc::clone(&self.task);

        // The task keeps running past the deadline
        let running = tokio::spawn(async move { task.execute(request).await });

        match tokio::time::timeout(self.timeout, running).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::ExecutionFailure(format!(
                "Query {} task aborted: {}",
                query_id, join_error
            ))),
            Err(_) => {
                warn!(query_id = %query_id, "Query exceeded the {} seconds timeout", self.timeout.as_secs());
                Err(Error::ExecutionTimeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Submits the task to a work queue and reports it as running
pub struct AsynchronousSqlExecutor {
    queue: Arc<dyn WorkQueue>,
}

impl AsynchronousSqlExecutor {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl SqlExecutor for AsynchronousSqlExecutor {
    async fn execute(
        &self,
        context: &ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
    ) -> Result<ExecutionStatus> {
        let request = TaskRequest::new(context, query_id, ctas_no_limit, log_params);

        let handle = match self.queue.submit(request).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(query_id = %query_id, "Query {}: {}", query_id, e);
                return Err(Error::AsyncDispatchFailure(SqlLabError::new(
                    ASYNC_DISPATCH_FAILED_MESSAGE,
                    ErrorType::AsyncWorkersError,
                    ErrorLevel::Error,
                )));
            }
        };

        if self.queue.supports_detach() {
            if let Err(e) = handle.detach() {
                warn!(task_id = %handle.id(), "Unable to detach task: {}", e);
            }
        } else {
            warn!(
                task_id = %handle.id(),
                "Unable to detach task as the results backend does not support it"
            );
        }

        debug!(query_id = %query_id, task_id = %handle.id(), "Query dispatched to worker");
        Ok(ExecutionStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::TaskHandle;
    use mockall::mock;
    use querydesk_core::DatabaseRef;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SleepyTask {
        delay: Duration,
        status: ExecutionStatus,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ExecuteTask for SleepyTask {
        async fn execute(&self, _request: TaskRequest) -> Result<ExecutionStatus> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(self.status)
        }
    }

    fn sleepy(delay: Duration, status: ExecutionStatus) -> (Arc<SleepyTask>, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        let task = Arc::new(SleepyTask {
            delay,
            status,
            finished: Arc::clone(&finished),
        });
        (task, finished)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(DatabaseRef::new(1, "sales", "sqlite"), 1000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_returns_task_status() {
        let (task, _) = sleepy(Duration::from_secs(1), ExecutionStatus::Success);
        let executor = SynchronousSqlExecutor::new(task, Duration::from_secs(30));

        let status = executor
            .execute(&context(), QueryId::new(1), false, &LogParams::new())
            .await
            .unwrap();
        assert_eq!(status, ExecutionStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_timeout_carries_configured_seconds() {
        let (task, finished) = sleepy(Duration::from_secs(45), ExecutionStatus::Success);
        let executor = SynchronousSqlExecutor::new(task, Duration::from_secs(30));

        let err = executor
            .execute(&context(), QueryId::new(1), false, &LogParams::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ExecutionTimeout { seconds: 30 }));
        assert_eq!(err.to_string(), "The query exceeded the 30 seconds timeout.");
        assert!(!finished.load(Ordering::SeqCst));

        // The task is not cancelled by the deadline
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sync_task_panic_is_execution_failure() {
        struct PanickingTask;

        #[async_trait]
        impl ExecuteTask for PanickingTask {
            async fn execute(&self, _request: TaskRequest) -> Result<ExecutionStatus> {
                panic!("driver crashed");
            }
        }

        let executor = SynchronousSqlExecutor::new(Arc::new(PanickingTask), Duration::from_secs(5));
        let err = executor
            .execute(&context(), QueryId::new(1), false, &LogParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailure(_)));
    }

    mock! {
        Queue {}

        #[async_trait]
        impl WorkQueue for Queue {
            async fn submit(&self, request: TaskRequest) -> Result<Box<dyn TaskHandle>>;
            fn supports_detach(&self) -> bool;
        }
    }

    struct RecordingHandle {
        detaches: Arc<AtomicUsize>,
    }

    impl TaskHandle for RecordingHandle {
        fn id(&self) -> &str {
            "task-1"
        }

        fn detach(&self) -> Result<()> {
            self.detaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue_with_handle(supports_detach: bool, detaches: Arc<AtomicUsize>) -> MockQueue {
        let mut queue = MockQueue::new();
        queue.expect_submit().times(1).returning(move |request| {
            assert_eq!(request.query_id, QueryId::new(7));
            assert!(request.ctas_no_limit);
            Ok(Box::new(RecordingHandle {
                detaches: Arc::clone(&detaches),
            }) as Box<dyn TaskHandle>)
        });
        queue.expect_supports_detach().return_const(supports_detach);
        queue
    }

    #[tokio::test]
    async fn test_async_returns_running_and_detaches() {
        let detaches = Arc::new(AtomicUsize::new(0));
        let executor =
            AsynchronousSqlExecutor::new(Arc::new(queue_with_handle(true, Arc::clone(&detaches))));

        let status = executor
            .execute(&context(), QueryId::new(7), true, &LogParams::new())
            .await
            .unwrap();

        assert_eq!(status, ExecutionStatus::Running);
        assert_eq!(detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_tolerates_missing_detach_support() {
        let detaches = Arc::new(AtomicUsize::new(0));
        let executor =
            AsynchronousSqlExecutor::new(Arc::new(queue_with_handle(false, Arc::clone(&detaches))));

        let status = executor
            .execute(&context(), QueryId::new(7), true, &LogParams::new())
            .await
            .unwrap();

        assert_eq!(status, ExecutionStatus::Running);
        assert_eq!(detaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_submission_failure() {
        let mut queue = MockQueue::new();
        queue
            .expect_submit()
            .returning(|_| Err(Error::Internal("broker unreachable".to_string())));
        queue.expect_supports_detach().never();

        let executor = AsynchronousSqlExecutor::new(Arc::new(queue));
        let err = executor
            .execute(&context(), QueryId::new(7), false, &LogParams::new())
            .await
            .unwrap_err();

        match err {
            Error::AsyncDispatchFailure(payload) => {
                assert_eq!(payload.message, ASYNC_DISPATCH_FAILED_MESSAGE);
                assert_eq!(payload.error_type, ErrorType::AsyncWorkersError);
                assert_eq!(payload.level, ErrorLevel::Error);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
