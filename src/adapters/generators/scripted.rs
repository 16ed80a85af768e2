//! Scripted generator for tests, demos and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::GenerationError;
use crate::domain::models::{Generation, GenerationContext, GenerationPhase};
use crate::domain::ports::Generator;

/// Canned reply configuration.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub text: String,
    pub confidence: f64,
    /// Fail with a transport error carrying this message
    pub error: Option<String>,
}

impl ScriptedResponse {
    pub fn success(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            error: Some(error.into()),
        }
    }
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub prompt: String,
    pub phase: GenerationPhase,
}

/// Generator that replies from a script instead of a network backend.
///
/// Replies are picked from a one-shot queue for the call's phase, then the
/// phase default, then the generator default.
pub struct ScriptedGenerator {
    name: String,
    default_response: ScriptedResponse,
    phase_defaults: HashMap<GenerationPhase, ScriptedResponse>,
    queued: Mutex<HashMap<GenerationPhase, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<ScriptedCall>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(name: impl Into<String>, default_response: ScriptedResponse) -> Self {
        Self {
            name: name.into(),
            default_response,
            phase_defaults: HashMap::new(),
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn answering(name: impl Into<String>, text: impl Into<String>, confidence: f64) -> Self {
        Self::new(name, ScriptedResponse::success(text, confidence))
    }

    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, ScriptedResponse::failure(error))
    }

    pub fn with_phase(mut self, phase: GenerationPhase, response: ScriptedResponse) -> Self {
        self.phase_defaults.insert(phase, response);
        self
    }

    /// Simulated latency before each reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a one-shot reply for the next call in `phase`.
    pub fn push(&self, phase: GenerationPhase, response: ScriptedResponse) {
        lock(&self.queued).entry(phase).or_default().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        lock(&self.calls).clone()
    }

    fn next_response(&self, phase: GenerationPhase) -> ScriptedResponse {
        if let Some(response) = lock(&self.queued).get_mut(&phase).and_then(VecDeque::pop_front) {
            return response;
        }
        self.phase_defaults
            .get(&phase)
            .unwrap_or(&self.default_response)
            .clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<Generation, GenerationError> {
        lock(&self.calls).push(ScriptedCall {
            prompt: prompt.to_string(),
            phase: context.phase,
        });
        let response = self.next_response(context.phase);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = response.error {
            return Err(GenerationError::Transport(error));
        }
        if response.text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(Generation::new(response.text, response.confidence))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
