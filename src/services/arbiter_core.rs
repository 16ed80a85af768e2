//! Arbiter execution core.
//!
//! Owns one bounded priority queue and a single active-task slot. Each task
//! runs through the circuit breaker with a timeout race; failures are
//! retried with exponential backoff until the task's budget is spent.
//! Identity, metrics and bounded histories are persisted to the state store
//! so a restarted arbiter resumes its generation and lineage.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::circuit_breaker::{CircuitBreaker, CircuitCheckResult, CircuitStats};
use super::event_bus::{Envelope, EventBus, Subscription};
use super::lineage::{self, CloneOverrides, EvolutionOutcome};
use super::task_queue::TaskQueue;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    state_key, ArbiterConfig, ArbiterIdentity, ArbiterMetrics, ArbiterSnapshot, Capability,
    CapabilitySet, CircuitBreakerConfig, Config, ContextEntry, ErrorLogEntry, EvolutionEvent,
    EvolutionKind, RetryConfig, Task, TaskOutput, TaskPriority, TaskResult, TaskStatus,
};
use crate::domain::ports::{Clock, FitnessEvaluator, StateStore, TaskExecutor};

pub const TASK_COMPLETED_TOPIC: &str = "arbiter.task.completed";
pub const TASK_RETRYING_TOPIC: &str = "arbiter.task.retrying";
pub const TASK_FAILED_TOPIC: &str = "arbiter.task.failed";
pub const LIFECYCLE_TOPIC: &str = "arbiter.lifecycle";
pub const HEARTBEAT_TOPIC: &str = "arbiter.heartbeat";

/// Topic an arbiter listens on for inbound task messages.
pub fn inbox_topic(name: &str) -> String {
    format!("arbiter.{name}.inbox")
}

/// Delay before the next execution of a task that has run `attempts` times.
pub fn backoff_delay(retry: &RetryConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    let ms = retry
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(retry.max_backoff_ms);
    Duration::from_millis(ms)
}

/// Collaborators shared by an arbiter and the children it derives.
#[derive(Clone)]
pub struct ArbiterDeps {
    pub clock: Arc<dyn Clock>,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn StateStore>,
}

/// Task request accepted from the inbox topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub query: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub required_capability: Option<Capability>,
}

/// Result of one `process_next` step.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed(TaskResult),
    /// The task failed and was put back at the front of its band.
    Retrying {
        task_id: Uuid,
        attempts: u32,
        backoff: Duration,
    },
    Failed(TaskResult),
}

impl ProcessOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying { .. })
    }
}

/// Task currently held in the active slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: Uuid,
    pub query: String,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

/// Status surface of an arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterStatus {
    pub name: String,
    pub generation: u32,
    pub dna: String,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub active_task: Option<ActiveTask>,
    pub metrics: ArbiterMetrics,
    pub breaker: CircuitStats,
    pub accepting: bool,
}

/// Resolves to a submitted task's terminal result.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: Uuid,
    receiver: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub async fn wait(self) -> DomainResult<TaskResult> {
        self.receiver.await.map_err(|_| {
            DomainError::ExecutionFailed(format!("task {} was dropped before finishing", self.id))
        })
    }
}

/// Outcome of `evolve`: the child core is returned only when promoted.
pub struct Evolved<E: TaskExecutor> {
    pub outcome: EvolutionOutcome,
    pub child: Option<ArbiterCore<E>>,
}

pub struct ArbiterCore<E: TaskExecutor> {
    config: ArbiterConfig,
    retry: RetryConfig,
    breaker_config: CircuitBreakerConfig,
    default_timeout: Duration,
    executor: RwLock<Arc<E>>,
    identity: RwLock<ArbiterIdentity>,
    metrics: RwLock<ArbiterMetrics>,
    queue: Mutex<TaskQueue>,
    active: RwLock<Option<ActiveTask>>,
    breaker: CircuitBreaker,
    deps: ArbiterDeps,
    context_history: RwLock<VecDeque<ContextEntry>>,
    error_log: RwLock<VecDeque<ErrorLogEntry>>,
    recent_tasks: RwLock<VecDeque<Task>>,
    waiters: StdMutex<HashMap<Uuid, oneshot::Sender<TaskResult>>>,
    /// Held for the duration of one task step
    processing: Mutex<()>,
    notify: Notify,
    accepting: AtomicBool,
    inbox: StdMutex<Option<Subscription>>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

impl<E: TaskExecutor> ArbiterCore<E> {
    /// Build an arbiter from configuration. Call [`initialize`] before use
    /// to restore persisted state.
    ///
    /// [`initialize`]: ArbiterCore::initialize
    pub fn new(config: &Config, executor: E, deps: ArbiterDeps) -> Self {
        let declared: CapabilitySet = config.arbiter.capabilities.iter().copied().collect();
        let supported = executor.capabilities();
        let capabilities: CapabilitySet = declared.intersection(&supported).copied().collect();
        for dropped in declared.difference(&supported) {
            warn!(
                arbiter = %config.arbiter.name,
                capability = %dropped,
                "declared capability not supported by worker, ignoring"
            );
        }

        if config.arbiter.role != executor.role() {
            warn!(
                arbiter = %config.arbiter.name,
                configured = %config.arbiter.role,
                worker = %executor.role(),
                "configured role differs from worker role, using worker role"
            );
        }

        let identity = ArbiterIdentity::new(
            config.arbiter.name.clone(),
            executor.role(),
            capabilities,
            config.arbiter.version.clone(),
        )
        .with_traits(config.arbiter.traits.clone());

        let executor = if identity.traits.is_empty() {
            executor
        } else {
            executor.derive(&identity.traits)
        };

        Self::assemble(
            config.arbiter.clone(),
            config.retry.clone(),
            config.circuit_breaker.clone(),
            Duration::from_secs(config.task.default_timeout_secs),
            identity,
            executor,
            deps,
        )
    }

    fn assemble(
        config: ArbiterConfig,
        retry: RetryConfig,
        breaker_config: CircuitBreakerConfig,
        default_timeout: Duration,
        identity: ArbiterIdentity,
        executor: E,
        deps: ArbiterDeps,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            format!("{}.executor", identity.name),
            &breaker_config,
            deps.clock.clone(),
        );
        Self {
            queue: Mutex::new(TaskQueue::new(config.queue_capacity)),
            config,
            retry,
            breaker_config,
            default_timeout,
            executor: RwLock::new(Arc::new(executor)),
            identity: RwLock::new(identity),
            metrics: RwLock::new(ArbiterMetrics::default()),
            active: RwLock::new(None),
            breaker,
            deps,
            context_history: RwLock::new(VecDeque::new()),
            error_log: RwLock::new(VecDeque::new()),
            recent_tasks: RwLock::new(VecDeque::new()),
            waiters: StdMutex::new(HashMap::new()),
            processing: Mutex::new(()),
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            inbox: StdMutex::new(None),
            heartbeat: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.deps.bus
    }

    pub async fn identity(&self) -> ArbiterIdentity {
        self.identity.read().await.clone()
    }

    pub async fn metrics(&self) -> ArbiterMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn executor(&self) -> Arc<E> {
        self.executor.read().await.clone()
    }

    /// A new task carrying this arbiter's configured retry and timeout defaults.
    pub fn task(&self, query: impl Into<String>) -> Task {
        Task::new(query)
            .with_max_retries(self.retry.default_max_retries)
            .with_timeout(self.default_timeout)
    }

    fn task_from_request(&self, request: TaskRequest) -> Task {
        let mut task = self.task(request.query).with_priority(request.priority);
        task.context = request.context;
        if let Some(max_retries) = request.max_retries {
            task.max_retries = max_retries;
        }
        if let Some(ms) = request.timeout_ms {
            task.timeout = Duration::from_millis(ms);
        }
        task.required_capability = request.required_capability;
        task
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Load persisted state, start listening on the inbox and begin the
    /// heartbeat. Missing state is a fresh start.
    pub async fn initialize(self: &Arc<Self>) -> DomainResult<()> {
        let key = state_key(&self.config.name);
        match self.deps.store.read_state(&key).await? {
            Some(value) => {
                let snapshot: ArbiterSnapshot = serde_json::from_value(value)?;
                self.restore(snapshot).await;
            }
            None => {
                info!(arbiter = %self.config.name, "no persisted state, starting fresh");
            }
        }
        self.persist().await?;

        self.start_inbox();
        self.start_heartbeat();

        let identity = self.identity().await;
        info!(
            arbiter = %identity.name,
            generation = identity.generation,
            dna = %identity.dna.short(),
            "arbiter initialized"
        );
        self.emit(
            LIFECYCLE_TOPIC,
            "initialized",
            serde_json::json!({
                "name": identity.name,
                "generation": identity.generation,
                "lineage": identity.lineage,
            }),
        )
        .await;
        Ok(())
    }

    async fn restore(&self, snapshot: ArbiterSnapshot) {
        let ArbiterSnapshot {
            mut identity,
            metrics,
            context_history,
            error_log,
            ..
        } = snapshot;

        // Capabilities come from configuration and the worker, never from
        // the snapshot, so a revoked capability stays revoked.
        let granted = self.identity.read().await.capabilities.clone();
        if identity.capabilities != granted {
            for revoked in identity.capabilities.difference(&granted) {
                info!(arbiter = %identity.name, capability = %revoked, "persisted capability no longer granted");
            }
            identity.capabilities = granted;
            identity.refresh_dna();
        }

        info!(
            arbiter = %identity.name,
            generation = identity.generation,
            mutations = identity.mutations.len(),
            "restored persisted identity"
        );

        if !identity.traits.is_empty() {
            let mut executor = self.executor.write().await;
            let derived = executor.derive(&identity.traits);
            *executor = Arc::new(derived);
        }
        *self.identity.write().await = identity;
        *self.metrics.write().await = metrics;

        let mut history = self.context_history.write().await;
        history.clear();
        for entry in context_history {
            push_bounded(&mut *history, entry, self.config.context_history_limit);
        }
        drop(history);

        let mut log = self.error_log.write().await;
        log.clear();
        for entry in error_log {
            push_bounded(&mut *log, entry, self.config.error_log_limit);
        }
    }

    fn start_inbox(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = self
            .deps
            .bus
            .subscribe_with(inbox_topic(&self.config.name), move |envelope| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(core) => core.accept_inbox(envelope).await,
                        None => Ok(()),
                    }
                }
            });
        if let Some(previous) = lock(&self.inbox).replace(subscription) {
            previous.cancel();
        }
    }

    async fn accept_inbox(&self, envelope: Envelope) -> DomainResult<()> {
        if envelope.kind != "task" {
            debug!(kind = %envelope.kind, "ignoring inbox message");
            return Ok(());
        }
        let request: TaskRequest = serde_json::from_value(envelope.payload)?;
        let task_id = self.enqueue(self.task_from_request(request)).await?;
        debug!(%task_id, from = %envelope.from, "task accepted from inbox");
        Ok(())
    }

    fn start_heartbeat(self: &Arc<Self>) {
        if self.config.heartbeat_interval_secs == 0 {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.heartbeat_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(core) = weak.upgrade() else { break };
                if !core.is_accepting() {
                    break;
                }
                let status = core.status().await;
                core.emit(
                    HEARTBEAT_TOPIC,
                    "heartbeat",
                    serde_json::json!({
                        "name": status.name,
                        "queue_size": status.queue_size,
                        "active": status.active_task.is_some(),
                        "success_rate": status.metrics.success_rate,
                    }),
                )
                .await;
            }
        });
        if let Some(previous) = lock(&self.heartbeat).replace(handle) {
            previous.abort();
        }
    }

    /// Stop accepting tasks, give the in-flight task a grace period,
    /// fail whatever is still queued and persist final state.
    pub async fn shutdown(&self) -> DomainResult<()> {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.notify.notify_one();
        info!(arbiter = %self.config.name, "arbiter shutting down");

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        match tokio::time::timeout(grace, self.processing.lock()).await {
            Ok(_guard) => {}
            Err(_) => warn!(
                arbiter = %self.config.name,
                grace_ms = self.config.shutdown_grace_ms,
                "in-flight task did not finish within grace period"
            ),
        }

        if let Some(subscription) = lock(&self.inbox).take() {
            subscription.cancel();
        }
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }

        self.settle_queue().await?;
        self.emit(
            LIFECYCLE_TOPIC,
            "shutdown",
            serde_json::json!({ "name": self.config.name }),
        )
        .await;
        Ok(())
    }

    /// Fail everything still queued and persist. Runs on shutdown and
    /// again after a step that was still in flight when shutdown began.
    async fn settle_queue(&self) -> DomainResult<()> {
        let abandoned = self.queue.lock().await.drain_all();
        for task in abandoned {
            self.fail_terminal(task, DomainError::ShuttingDown, Duration::ZERO)
                .await;
        }
        self.persist().await
    }

    /// Write identity, metrics and bounded histories to the state store.
    pub async fn persist(&self) -> DomainResult<()> {
        let snapshot = self.snapshot().await;
        let value = serde_json::to_value(&snapshot)?;
        self.deps
            .store
            .write_state(&snapshot.identity.state_key(), &value)
            .await?;
        debug!(arbiter = %snapshot.identity.name, "state persisted");
        Ok(())
    }

    pub async fn snapshot(&self) -> ArbiterSnapshot {
        ArbiterSnapshot {
            identity: self.identity().await,
            metrics: self.metrics().await,
            context_history: self.context_history.read().await.iter().cloned().collect(),
            error_log: self.error_log.read().await.iter().cloned().collect(),
            saved_at: self.deps.clock.now(),
        }
    }

    // ---------------------------------------------------------------
    // Task submission
    // ---------------------------------------------------------------

    /// Queue a task, returning its id.
    pub async fn enqueue(&self, task: Task) -> DomainResult<Uuid> {
        if !self.is_accepting() {
            return Err(DomainError::ShuttingDown);
        }
        if task.status != TaskStatus::Pending {
            return Err(DomainError::ValidationFailed(format!(
                "task {} is {}, only pending tasks can be queued",
                task.id, task.status
            )));
        }
        if let Some(capability) = task.required_capability {
            let identity = self.identity.read().await;
            if !identity.has_capability(capability) {
                return Err(DomainError::CapabilityMissing {
                    capability: capability.to_string(),
                    arbiter: identity.name.clone(),
                });
            }
        }

        let task_id = task.id;
        let priority = task.priority;
        let queue_size = {
            let mut queue = self.queue.lock().await;
            queue.push_back(task)?;
            queue.len()
        };
        self.notify.notify_one();
        debug!(%task_id, priority = %priority.as_str(), queue_size, "task queued");
        Ok(task_id)
    }

    /// Queue a task and get a handle that resolves to its terminal result.
    pub async fn submit(&self, task: Task) -> DomainResult<TaskHandle> {
        let id = task.id;
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters).insert(id, tx);
        if let Err(e) = self.enqueue(task).await {
            lock(&self.waiters).remove(&id);
            return Err(e);
        }
        Ok(TaskHandle { id, receiver: rx })
    }

    // ---------------------------------------------------------------
    // Drain loop
    // ---------------------------------------------------------------

    /// Run the next queued task one step. Returns `None` when the queue is
    /// empty.
    #[instrument(skip(self), fields(arbiter = %self.config.name))]
    pub async fn process_next(&self) -> Option<ProcessOutcome> {
        let _processing = self.processing.lock().await;
        let task = self.queue.lock().await.pop()?;
        let outcome = self.step(task).await;

        if !self.is_accepting() {
            // Shutdown may have given up waiting on this step
            if let Err(e) = self.settle_queue().await {
                warn!(arbiter = %self.config.name, error = %e, "failed to persist after shutdown");
            }
        }
        Some(outcome)
    }

    async fn step(&self, mut task: Task) -> ProcessOutcome {

        // Before the breaker check, so an invalid task never holds the
        // half-open trial call
        if let Err(e) = task.transition_to(TaskStatus::Running) {
            error!(task_id = %task.id, error = %e, "dequeued task in unexpected state");
            return self
                .fail_terminal(task, DomainError::ValidationFailed(e), Duration::ZERO)
                .await;
        }

        if let CircuitCheckResult::Blocked { retry_after } = self.breaker.check().await {
            warn!(task_id = %task.id, %retry_after, "circuit open, rejecting task");
            return self
                .fail_terminal(task, DomainError::CircuitOpen { retry_after }, Duration::ZERO)
                .await;
        }

        let started_at = self.deps.clock.now();
        task.attempts += 1;
        task.started_at.get_or_insert(started_at);
        *self.active.write().await = Some(ActiveTask {
            id: task.id,
            query: task.query.clone(),
            attempts: task.attempts,
            started_at,
        });
        debug!(task_id = %task.id, attempt = task.attempts, "executing task");

        let executor = self.executor().await;
        let timer = Instant::now();
        let result = match tokio::time::timeout(task.timeout, executor.execute(&task)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::TaskTimeout {
                timeout_ms: u64::try_from(task.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let elapsed = timer.elapsed();
        *self.active.write().await = None;

        match result {
            Ok(output) => {
                self.breaker.record_success().await;
                self.complete(task, output, elapsed).await
            }
            Err(e) => {
                self.breaker.record_failure().await;
                self.handle_failure(task, e, elapsed).await
            }
        }
    }

    async fn complete(
        &self,
        mut task: Task,
        output: TaskOutput,
        elapsed: Duration,
    ) -> ProcessOutcome {
        let now = self.deps.clock.now();
        // Running -> Completed is always legal here
        let _ = task.transition_to(TaskStatus::Completed);
        task.completed_at = Some(now);
        let result = TaskResult::success(&self.config.name, output, elapsed, now);
        task.result = Some(result.clone());

        self.metrics.write().await.record_success(elapsed, now);
        {
            let mut history = self.context_history.write().await;
            push_bounded(
                &mut *history,
                ContextEntry {
                    task_id: task.id,
                    query: task.query.clone(),
                    confidence: result.confidence,
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    completed_at: now,
                },
                self.config.context_history_limit,
            );
        }

        info!(
            task_id = %task.id,
            attempts = task.attempts,
            confidence = result.confidence,
            duration_ms = elapsed.as_millis() as u64,
            "task completed"
        );
        self.emit(
            TASK_COMPLETED_TOPIC,
            "task_completed",
            serde_json::json!({
                "task_id": task.id,
                "attempts": task.attempts,
                "confidence": result.confidence,
                "duration_ms": elapsed.as_millis() as u64,
            }),
        )
        .await;

        self.finish(task, result.clone()).await;
        ProcessOutcome::Completed(result)
    }

    async fn handle_failure(&self, mut task: Task, error: DomainError, elapsed: Duration) -> ProcessOutcome {
        task.last_error = Some(error.to_string());

        if !error.is_retryable() || !task.can_retry() {
            return self.fail_terminal(task, error, elapsed).await;
        }

        let _ = task.transition_to(TaskStatus::Retrying);
        let backoff = backoff_delay(&self.retry, task.attempts);
        self.metrics.write().await.record_retry();
        warn!(
            task_id = %task.id,
            attempt = task.attempts,
            max_retries = task.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "task failed, retrying"
        );
        self.emit(
            TASK_RETRYING_TOPIC,
            "task_retrying",
            serde_json::json!({
                "task_id": task.id,
                "attempts": task.attempts,
                "backoff_ms": backoff.as_millis() as u64,
                "error": error.to_string(),
            }),
        )
        .await;

        self.deps.clock.sleep(backoff).await;

        let task_id = task.id;
        let attempts = task.attempts;
        let mut queue = self.queue.lock().await;
        // Checked under the queue lock so shutdown's drain cannot miss it
        if !self.is_accepting() {
            drop(queue);
            return self
                .fail_terminal(task, DomainError::ShuttingDown, elapsed)
                .await;
        }
        if queue.len() >= queue.capacity() {
            let capacity = queue.capacity();
            drop(queue);
            return self
                .fail_terminal(task, DomainError::QueueFull { capacity }, elapsed)
                .await;
        }
        if let Err(e) = queue.push_front(task) {
            // Room was checked under the same lock
            error!(%task_id, error = %e, "retry re-insertion failed");
        }
        drop(queue);
        self.notify.notify_one();

        ProcessOutcome::Retrying {
            task_id,
            attempts,
            backoff,
        }
    }

    async fn fail_terminal(&self, mut task: Task, error: DomainError, elapsed: Duration) -> ProcessOutcome {
        let now = self.deps.clock.now();
        let message = error.to_string();
        if let Err(e) = task.transition_to(TaskStatus::Failed) {
            warn!(task_id = %task.id, error = %e, "forcing task to failed");
            task.status = TaskStatus::Failed;
        }
        task.completed_at = Some(now);
        task.last_error = Some(message.clone());
        let result = TaskResult::failure(&self.config.name, message.clone(), elapsed, now);
        task.result = Some(result.clone());

        self.metrics.write().await.record_failure(elapsed, now);
        {
            let mut log = self.error_log.write().await;
            push_bounded(
                &mut *log,
                ErrorLogEntry {
                    task_id: task.id,
                    kind: error.kind().to_string(),
                    message: message.clone(),
                    attempts: task.attempts,
                    at: now,
                },
                self.config.error_log_limit,
            );
        }

        error!(
            task_id = %task.id,
            attempts = task.attempts,
            kind = error.kind(),
            error = %message,
            "task failed permanently"
        );
        self.emit(
            TASK_FAILED_TOPIC,
            "task_failed",
            serde_json::json!({
                "task_id": task.id,
                "attempts": task.attempts,
                "kind": error.kind(),
                "error": message,
            }),
        )
        .await;

        self.finish(task, result.clone()).await;
        ProcessOutcome::Failed(result)
    }

    async fn finish(&self, task: Task, result: TaskResult) {
        if let Some(waiter) = lock(&self.waiters).remove(&task.id) {
            // Receiver may have been dropped
            let _ = waiter.send(result);
        }
        let mut recent = self.recent_tasks.write().await;
        push_bounded(&mut *recent, task, self.config.recent_task_limit);
    }

    /// Process queued tasks until the queue is empty. Returns the number of
    /// steps taken, retries included.
    pub async fn drain(&self) -> usize {
        let mut steps = 0;
        while self.process_next().await.is_some() {
            steps += 1;
        }
        steps
    }

    /// Process tasks as they arrive until shutdown begins.
    pub async fn run(&self) {
        info!(arbiter = %self.config.name, "arbiter run loop started");
        while self.is_accepting() {
            if self.process_next().await.is_some() {
                continue;
            }
            self.notify.notified().await;
        }
        info!(arbiter = %self.config.name, "arbiter run loop stopped");
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    pub async fn status(&self) -> ArbiterStatus {
        let identity = self.identity.read().await;
        let (queue_size, queue_capacity) = {
            let queue = self.queue.lock().await;
            (queue.len(), queue.capacity())
        };
        ArbiterStatus {
            name: identity.name.clone(),
            generation: identity.generation,
            dna: identity.dna.short().to_string(),
            queue_size,
            queue_capacity,
            active_task: self.active.read().await.clone(),
            metrics: self.metrics.read().await.clone(),
            breaker: self.breaker.stats().await,
            accepting: self.is_accepting(),
        }
    }

    pub async fn context_history(&self) -> Vec<ContextEntry> {
        self.context_history.read().await.iter().cloned().collect()
    }

    pub async fn error_log(&self) -> Vec<ErrorLogEntry> {
        self.error_log.read().await.iter().cloned().collect()
    }

    /// A recently finished task by id.
    pub async fn recent_task(&self, id: Uuid) -> Option<Task> {
        self.recent_tasks
            .read()
            .await
            .iter()
            .rev()
            .find(|t| t.id == id)
            .cloned()
    }

    // ---------------------------------------------------------------
    // Cloning and evolution
    // ---------------------------------------------------------------

    async fn require(&self, capability: Capability) -> DomainResult<()> {
        let identity = self.identity.read().await;
        if identity.has_capability(capability) {
            Ok(())
        } else {
            Err(DomainError::CapabilityMissing {
                capability: capability.to_string(),
                arbiter: identity.name.clone(),
            })
        }
    }

    /// Build a child core without persisting it. Queue and in-flight task
    /// are never copied.
    async fn derive_child(&self, overrides: &CloneOverrides) -> ArbiterCore<E> {
        let parent = self.identity().await;
        let child_identity = lineage::derive_identity(&parent, overrides, self.deps.clock.now());
        let executor = self.executor().await.derive(&child_identity.traits);

        let mut config = self.config.clone();
        config.name = child_identity.name.clone();
        config.traits = child_identity.traits.clone();

        let child = ArbiterCore::assemble(
            config,
            self.retry.clone(),
            self.breaker_config.clone(),
            self.default_timeout,
            child_identity,
            executor,
            self.deps.clone(),
        );

        let history: Vec<ContextEntry> = self.context_history().await;
        let inherited = lineage::inherited_context(&history, overrides);
        if !inherited.is_empty() {
            let mut child_history = child.context_history.write().await;
            for entry in inherited {
                push_bounded(&mut *child_history, entry, child.config.context_history_limit);
            }
        }
        child
    }

    async fn log_evolution(&self, kind: EvolutionKind, child: &ArbiterIdentity, fitness: Option<f64>) {
        self.identity.write().await.evolution_log.push(EvolutionEvent {
            kind,
            child_id: child.id,
            child_name: child.name.clone(),
            child_generation: child.generation,
            fitness,
            at: self.deps.clock.now(),
        });
    }

    /// Derive and persist a child arbiter one generation down.
    pub async fn clone_arbiter(&self, overrides: CloneOverrides) -> DomainResult<ArbiterCore<E>> {
        self.require(Capability::Cloning).await?;

        let child = self.derive_child(&overrides).await;
        let child_identity = child.identity().await;
        child.persist().await?;
        self.log_evolution(EvolutionKind::Cloned, &child_identity, None)
            .await;
        self.persist().await?;

        info!(
            parent = %self.config.name,
            child = %child_identity.name,
            generation = child_identity.generation,
            "arbiter cloned"
        );
        self.emit(
            LIFECYCLE_TOPIC,
            "cloned",
            serde_json::json!({
                "parent": self.config.name,
                "child": child_identity.name,
                "generation": child_identity.generation,
                "dna": child_identity.dna.fingerprint,
            }),
        )
        .await;
        Ok(child)
    }

    /// Clone with trait mutations and keep the child only if it scores
    /// above the fitness threshold.
    pub async fn evolve(
        &self,
        mutations: BTreeMap<String, f64>,
        evaluator: &dyn FitnessEvaluator,
    ) -> DomainResult<Evolved<E>> {
        self.require(Capability::Evolution).await?;

        let overrides = CloneOverrides {
            traits: mutations,
            ..CloneOverrides::default()
        };
        let child = self.derive_child(&overrides).await;
        let child_identity = child.identity().await;
        let score = evaluator.evaluate(&child_identity).await?;

        let evolved = if lineage::passes_fitness(score) {
            child.persist().await?;
            self.log_evolution(EvolutionKind::Promoted, &child_identity, Some(score))
                .await;
            info!(child = %child_identity.name, score, "evolved arbiter promoted");
            Evolved {
                outcome: EvolutionOutcome::Promoted {
                    child: child_identity.clone(),
                    score,
                },
                child: Some(child),
            }
        } else {
            self.log_evolution(EvolutionKind::Underperformed, &child_identity, Some(score))
                .await;
            warn!(child = %child_identity.name, score, "evolved arbiter underperformed");
            Evolved {
                outcome: EvolutionOutcome::Underperformed {
                    child_name: child_identity.name.clone(),
                    score,
                },
                child: None,
            }
        };
        self.persist().await?;

        self.emit(
            LIFECYCLE_TOPIC,
            "evolved",
            serde_json::json!({
                "parent": self.config.name,
                "child": child_identity.name,
                "score": score,
                "promoted": evolved.outcome.is_promoted(),
            }),
        )
        .await;
        Ok(evolved)
    }

    async fn emit(&self, topic: &str, kind: &str, payload: serde_json::Value) {
        self.deps
            .bus
            .publish(Envelope::new(topic, &self.config.name, kind, payload))
            .await;
    }
}

impl<E: TaskExecutor> Drop for ArbiterCore<E> {
    fn drop(&mut self) {
        if let Some(subscription) = lock(&self.inbox).take() {
            subscription.cancel();
        }
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
