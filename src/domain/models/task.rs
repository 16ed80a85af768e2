//! Task domain model.
//!
//! Tasks are discrete units of work owned by a single arbiter. The arbiter's
//! drain loop is the only place a task is mutated once it has been enqueued.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::Capability;

/// Default retry budget for a task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default execution timeout for a task.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Currently executing in the arbiter's active slot
    Running,
    /// Failed at least once and waiting for its backoff to elapse
    Retrying,
    /// Finished successfully
    Completed,
    /// Terminal failure
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "retrying" => Some(Self::Retrying),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Retrying, Self::Failed],
            Self::Retrying => &[Self::Running, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority level for tasks. Declaration order is the dequeue order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Background = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TaskPriority {
    /// All priorities, highest first.
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Normal,
        Self::Low,
        Self::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "background" => Some(Self::Background),
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Queue band index, 0 being the most urgent.
    pub const fn band(self) -> usize {
        4 - self as usize
    }
}

/// A discrete unit of work executed by an arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Query payload handed to the worker
    pub query: String,
    /// Free-form caller context
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub max_retries: u32,
    /// Execution budget for a single attempt
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Capability the executing arbiter must declare
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capability: Option<Capability>,
    pub status: TaskStatus,
    /// Number of executions started so far
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            context: HashMap::new(),
            priority: TaskPriority::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            required_capability: None,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn requiring(mut self, capability: Capability) -> Self {
        self.required_capability = Some(capability);
        self
    }

    /// Whether another execution is allowed after the current failure.
    ///
    /// `attempts` counts executions, so a task runs at most
    /// `max_retries + 1` times.
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }

    /// Move to a new status, refusing illegal transitions.
    pub fn transition_to(&mut self, status: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(status) {
            return Err(format!(
                "invalid task transition {} -> {}",
                self.status, status
            ));
        }
        self.status = status;
        Ok(())
    }
}

/// Output produced by a worker for one successful execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub payload: serde_json::Value,
    pub confidence: f64,
    /// Internal iterations the worker performed (reflection rounds etc.)
    pub iterations: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Immutable outcome of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub payload: serde_json::Value,
    pub confidence: f64,
    /// Name of the arbiter that produced this result
    pub arbiter: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub iterations: u32,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        arbiter: impl Into<String>,
        output: TaskOutput,
        duration: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            payload: output.payload,
            confidence: output.confidence.clamp(0.0, 1.0),
            arbiter: arbiter.into(),
            duration,
            iterations: output.iterations,
            error: None,
            metadata: output.metadata,
            created_at,
        }
    }

    pub fn failure(
        arbiter: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            payload: serde_json::Value::Null,
            confidence: 0.0,
            arbiter: arbiter.into(),
            duration,
            iterations: 0,
            error: Some(error.into()),
            metadata: HashMap::new(),
            created_at,
        }
    }
}

/// Serialize durations as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
