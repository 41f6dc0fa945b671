//! Work queue for detached query execution
//!
//! The asynchronous executor hands [`TaskRequest`]s to a [`WorkQueue`] and
//! never waits for them. Completion is observed through the query record the
//! task updates, not through the queue.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use querydesk_core::{Error, ExecutionContext, ExecutionStatus, LogParams, QueryId, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Arguments of one execute-task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub context: ExecutionContext,
    pub query_id: QueryId,
    pub ctas_no_limit: bool,
    #[serde(default)]
    pub log_params: LogParams,
}

impl TaskRequest {
    pub fn new(
        context: &ExecutionContext,
        query_id: QueryId,
        ctas_no_limit: bool,
        log_params: &LogParams,
    ) -> Self {
        Self {
            context: context.clone(),
            query_id,
            ctas_no_limit,
            log_params: log_params.clone(),
        }
    }
}

/// The unit of work both executor strategies run
#[async_trait]
pub trait ExecuteTask: Send + Sync {
    async fn execute(&self, request: TaskRequest) -> Result<ExecutionStatus>;
}

/// Handle on a submitted task
pub trait TaskHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Stop tracking the task's result
    ///
    /// # Errors
    /// - `Error::Internal` if the queue keeps no results
    fn detach(&self) -> Result<()>;
}

/// Queue feeding execute tasks to workers
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a task without waiting for it to run
    ///
    /// # Errors
    /// Any error means the task was not accepted.
    async fn submit(&self, request: TaskRequest) -> Result<Box<dyn TaskHandle>>;

    /// Whether handles returned by `submit` support `detach`
    fn supports_detach(&self) -> bool;
}

/// Final state of a task run by a [`LocalWorkQueue`] worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(ExecutionStatus),
    Failed(String),
    TimeLimitExceeded,
}

/// Local queue settings
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    pub worker_count: usize,
    pub capacity: usize,
    /// Hard limit per task
    pub task_time_limit: Duration,
    /// Keep task outcomes until they are detached
    pub results_backend: bool,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            capacity: 256,
            task_time_limit: Duration::from_secs(60),
            results_backend: true,
        }
    }
}

#[derive(Debug)]
enum ResultSlot {
    Outcome(TaskOutcome),
    Detached,
}

/// Outcomes keyed by task id; a slot is dropped once both the outcome and
/// the detach request have been seen
#[derive(Debug, Default)]
struct ResultStore {
    slots: DashMap<String, ResultSlot>,
}

impl ResultStore {
    fn record(&self, id: &str, outcome: TaskOutcome) {
        match self.slots.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                entry.remove();
            }
            Entry::Vacant(entry) => {
                entry.insert(ResultSlot::Outcome(outcome));
            }
        }
    }

    fn detach(&self, id: &str) {
        match self.slots.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                entry.remove();
            }
            Entry::Vacant(entry) => {
                entry.insert(ResultSlot::Detached);
            }
        }
    }

    fn outcome(&self, id: &str) -> Option<TaskOutcome> {
        match self.slots.get(id).as_deref() {
            Some(ResultSlot::Outcome(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn retained(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), ResultSlot::Outcome(_)))
            .count()
    }
}

struct Job {
    id: String,
    request: TaskRequest,
}

struct LocalTaskHandle {
    id: String,
    results: Option<Arc<ResultStore>>,
}

impl TaskHandle for LocalTaskHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn detach(&self) -> Result<()> {
        match &self.results {
            Some(results) => {
                results.detach(&self.id);
                Ok(())
            }
            None => Err(Error::Internal(
                "Work queue has no results backend to detach from".to_string(),
            )),
        }
    }
}

/// In-process work queue backed by a bounded channel and a tokio worker pool
pub struct LocalWorkQueue {
    sender: mpsc::Sender<Job>,
    results: Option<Arc<ResultStore>>,
}

impl LocalWorkQueue {
    /// Start `config.worker_count` workers running `task`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(task: Arc<dyn ExecuteTask>, config: WorkQueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let results = config
            .results_backend
            .then(|| Arc::new(ResultStore::default()));

        for worker in 0..config.worker_count.max(1) {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&task),
                results.clone(),
                config.task_time_limit,
            ));
        }

        info!(
            workers = config.worker_count.max(1),
            capacity = config.capacity,
            results_backend = config.results_backend,
            "Started local work queue"
        );

        Self { sender, results }
    }

    /// Outcome of a finished, non-detached task
    pub fn outcome(&self, task_id: &str) -> Option<TaskOutcome> {
        self.results.as_ref().and_then(|r| r.outcome(task_id))
    }

    /// Number of outcomes currently retained
    pub fn retained_outcomes(&self) -> usize {
        self.results.as_ref().map_or(0, |r| r.retained())
    }
}

#[async_trait]
impl WorkQueue for LocalWorkQueue {
    async fn submit(&self, request: TaskRequest) -> Result<Box<dyn TaskHandle>> {
        let id = Uuid::new_v4().to_string();
        let query_id = request.query_id;

        self.sender
            .try_send(Job {
                id: id.clone(),
                request,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Internal("Work queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Internal("Work queue is shut down".to_string())
                }
            })?;

        debug!(task_id = %id, query_id = %query_id, "Task submitted");
        Ok(Box::new(LocalTaskHandle {
            id,
            results: self.results.clone(),
        }))
    }

    fn supports_detach(&self) -> bool {
        self.results.is_some()
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    task: Arc<dyn ExecuteTask>,
    results: Option<Arc<ResultStore>>,
    time_limit: Duration,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(Job { id, request }) = job else {
            debug!(worker, "Work queue closed, worker exiting");
            return;
        };

        let query_id = request.query_id;
        let outcome = match tokio::time::timeout(time_limit, task.execute(request)).await {
            Ok(Ok(status)) => {
                debug!(worker, task_id = %id, query_id = %query_id, %status, "Task finished");
                TaskOutcome::Completed(status)
            }
            Ok(Err(e)) => {
                error!(worker, task_id = %id, query_id = %query_id, "Task failed: {}", e);
                TaskOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    worker,
                    task_id = %id,
                    query_id = %query_id,
                    "Task exceeded the {} seconds time limit",
                    time_limit.as_secs()
                );
                TaskOutcome::TimeLimitExceeded
            }
        };

        if let Some(results) = &results {
            results.record(&id, outcome);
        }
    }
}
