//! Multi-generator routing with fusion, reflection and escalation.
//!
//! A query is classified, sent to the divergent and convergent generators in
//! an order picked from its perception, fused, then refined through bounded
//! critique/expand rounds. If confidence is still low an arbiter generator
//! integrates the candidates once. The safety gate runs last on every
//! answer. Generator failures degrade the answer but never abort it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::circuit_breaker::GuardedGenerator;
use super::event_bus::{Envelope, EventBus};
use super::{fusion, perception, safety_gate};
use crate::domain::models::{
    CircuitBreakerConfig, FusedAnswer, GenerationContext, GenerationPhase, GeneratorResponse,
    GeneratorRole, PerceptionResult, ProvenanceEntry, QueryDomain, QueryOutcome, RouterConfig,
    ThoughtRecord, FAILED_RESPONSE_CONFIDENCE, MAX_CONFIDENCE,
};
use crate::domain::ports::{Clock, Generator};

pub const TRACE_TOPIC: &str = "cognition.trace";
pub const LOW_CONFIDENCE_TOPIC: &str = "cognition.low_confidence";

/// The generators one router talks to.
#[derive(Clone)]
pub struct GeneratorSet {
    pub divergent: Arc<dyn Generator>,
    pub convergent: Arc<dyn Generator>,
    /// Escalation target; escalation is skipped without one
    pub arbiter: Option<Arc<dyn Generator>>,
}

impl GeneratorSet {
    pub fn new(divergent: Arc<dyn Generator>, convergent: Arc<dyn Generator>) -> Self {
        Self {
            divergent,
            convergent,
            arbiter: None,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn Generator>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Wrap every generator in its own circuit breaker.
    pub fn guarded(self, config: &CircuitBreakerConfig, clock: &Arc<dyn Clock>) -> Self {
        let guard = |g: Arc<dyn Generator>| -> Arc<dyn Generator> {
            Arc::new(GuardedGenerator::new(g, config, clock.clone()))
        };
        Self {
            divergent: guard(self.divergent),
            convergent: guard(self.convergent),
            arbiter: self.arbiter.map(guard),
        }
    }

    fn get(&self, role: GeneratorRole) -> Option<&Arc<dyn Generator>> {
        match role {
            GeneratorRole::Divergent => Some(&self.divergent),
            GeneratorRole::Convergent => Some(&self.convergent),
            GeneratorRole::Arbiter => self.arbiter.as_ref(),
        }
    }
}

/// Aggregate counters across all queries a router has handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub total_queries: u64,
    pub reflection_iterations: u64,
    pub escalations: u64,
    pub safety_flags: u64,
    pub generator_failures: u64,
    pub low_confidence_alerts: u64,
    pub average_confidence: f64,
    pub average_latency_ms: f64,
}

/// Generator order for a perceived query: divergent first for creative or
/// novel input, convergent first otherwise.
pub fn generator_order(perception: &PerceptionResult, novelty_threshold: f64) -> [GeneratorRole; 2] {
    if perception.domain == QueryDomain::Creative || perception.novelty > novelty_threshold {
        [GeneratorRole::Divergent, GeneratorRole::Convergent]
    } else {
        [GeneratorRole::Convergent, GeneratorRole::Divergent]
    }
}

pub struct CognitiveRouter {
    name: String,
    generators: GeneratorSet,
    config: RouterConfig,
    bus: Option<Arc<EventBus>>,
    history: RwLock<VecDeque<ThoughtRecord>>,
    stats: RwLock<RouterStats>,
}

impl CognitiveRouter {
    pub fn new(name: impl Into<String>, generators: GeneratorSet, config: RouterConfig) -> Self {
        Self {
            name: name.into(),
            generators,
            history: RwLock::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            config,
            bus: None,
            stats: RwLock::new(RouterStats::default()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn generators(&self) -> &GeneratorSet {
        &self.generators
    }

    pub fn bus(&self) -> Option<&Arc<EventBus>> {
        self.bus.as_ref()
    }

    /// Route one query through generation, fusion, reflection, escalation
    /// and the safety gate. Always returns an answer.
    #[instrument(skip(self, context), fields(router = %self.name))]
    pub async fn process_query(
        &self,
        query: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> QueryOutcome {
        let started = Instant::now();
        let trace_id = Uuid::new_v4();
        let perception = perception::classify(query);
        let meta = self.base_meta(trace_id, &perception, context);

        let order = generator_order(&perception, self.config.divergent_novelty_threshold);
        debug!(
            %trace_id,
            domain = %perception.domain,
            novelty = perception.novelty,
            first = %order[0],
            "routing query"
        );

        let mut responses: Vec<GeneratorResponse> = Vec::new();
        for role in order {
            let prompt = initial_prompt(role, query);
            let response = self
                .call(role, GenerationPhase::Initial, responses.len(), &prompt, &meta, 0)
                .await;
            responses.push(response);
        }
        let mut fused = fuse_or_placeholder(&responses, perception.novelty);

        let mut iterations = 0;
        while self.config.reflection_enabled
            && fused.confidence < self.config.finalize_threshold
            && iterations < self.config.max_iterations
        {
            iterations += 1;
            let critique_prompt = critique_prompt(query, &fused.text);
            let expand_prompt = expand_prompt(query, &fused.text);
            let base = responses.len();
            let (critique, expand) = tokio::join!(
                self.call(
                    GeneratorRole::Convergent,
                    GenerationPhase::Critique,
                    base,
                    &critique_prompt,
                    &meta,
                    iterations,
                ),
                self.call(
                    GeneratorRole::Divergent,
                    GenerationPhase::Expand,
                    base + 1,
                    &expand_prompt,
                    &meta,
                    iterations,
                ),
            );
            responses.push(critique);
            responses.push(expand);
            fused = fuse_or_placeholder(&responses, perception.novelty);
            debug!(%trace_id, iteration = iterations, confidence = fused.confidence, "reflection round");
        }

        if fused.confidence < self.config.escalate_threshold {
            self.escalate(query, &mut fused, &mut responses, &meta, iterations)
                .await;
        }

        let safety_flagged = safety_gate::apply(&mut fused, &perception);

        let provenance = self.provenance(&responses, &fused);
        let failures = responses.iter().filter(|r| r.is_error()).count() as u64;
        let outcome = QueryOutcome {
            trace_id,
            answer: fused.text,
            confidence: fused.confidence,
            best_source: fused.best_source,
            provenance,
            perception: perception.clone(),
            iterations,
            escalated: fused.escalated,
            safety_flagged,
        };

        let record = ThoughtRecord {
            trace_id,
            query: query.to_string(),
            perception,
            responses: responses.len(),
            iterations,
            confidence: outcome.confidence,
            escalated: outcome.escalated,
            safety_flagged,
            timestamp: Utc::now(),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record(record, failures, latency_ms).await;

        info!(
            %trace_id,
            confidence = outcome.confidence,
            iterations,
            escalated = outcome.escalated,
            safety_flagged,
            "query answered"
        );
        outcome
    }

    async fn escalate(
        &self,
        query: &str,
        fused: &mut FusedAnswer,
        responses: &mut Vec<GeneratorResponse>,
        meta: &BTreeMap<String, serde_json::Value>,
        iteration: u32,
    ) {
        if self.generators.arbiter.is_none() {
            debug!(confidence = fused.confidence, "escalation skipped, no arbiter generator");
            return;
        }

        let prompt = escalation_prompt(query, responses, fused);
        let response = self
            .call(
                GeneratorRole::Arbiter,
                GenerationPhase::Escalation,
                responses.len(),
                &prompt,
                meta,
                iteration,
            )
            .await;

        if response.is_error() {
            warn!(
                confidence = fused.confidence,
                "arbiter generator failed, keeping fused answer"
            );
        } else {
            fused.text = format!("Integrated answer:\n{}", response.text);
            fused.confidence = (fused.confidence + self.config.escalation_boost).min(MAX_CONFIDENCE);
            fused.best_source = response.id.clone();
            fused.escalated = true;
        }
        responses.push(response);
    }

    /// Invoke one generator, turning any failure into a low-confidence
    /// placeholder response.
    async fn call(
        &self,
        role: GeneratorRole,
        phase: GenerationPhase,
        index: usize,
        prompt: &str,
        meta: &BTreeMap<String, serde_json::Value>,
        iteration: u32,
    ) -> GeneratorResponse {
        let id = format!("{role}-{phase}-{index}");
        let mut context = GenerationContext::new(phase).with_meta("iteration", iteration.into());
        context.meta.extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));

        let started = Instant::now();
        let Some(generator) = self.generators.get(role) else {
            return failed_response(id, role, "unconfigured", phase, "generator not configured", started);
        };

        match generator.invoke(prompt, &context).await {
            Ok(generation) => GeneratorResponse {
                id,
                role,
                generator: generator.name().to_string(),
                phase,
                text: generation.text,
                confidence: generation.confidence.clamp(0.0, 1.0),
                rationale: generation.reasoning,
                error: None,
                timestamp: Utc::now(),
                elapsed: started.elapsed(),
            },
            Err(e) => {
                warn!(generator = %generator.name(), %phase, error = %e, "generator call failed");
                failed_response(id, role, generator.name(), phase, &e.to_string(), started)
            }
        }
    }

    fn base_meta(
        &self,
        trace_id: Uuid,
        perception: &PerceptionResult,
        context: &HashMap<String, serde_json::Value>,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut meta = BTreeMap::new();
        meta.insert("trace_id".to_string(), trace_id.to_string().into());
        meta.insert("domain".to_string(), perception.domain.as_str().into());
        meta.insert("novelty".to_string(), perception.novelty.into());
        if !context.is_empty() {
            meta.insert(
                "context".to_string(),
                serde_json::Value::Object(context.clone().into_iter().collect()),
            );
        }
        meta
    }

    fn provenance(&self, responses: &[GeneratorResponse], fused: &FusedAnswer) -> Vec<ProvenanceEntry> {
        responses
            .iter()
            .map(|r| ProvenanceEntry {
                source: r.id.clone(),
                role: r.role,
                generator: r.generator.clone(),
                phase: r.phase,
                confidence: r.confidence,
                weight: fused.weights.get(&r.id).copied(),
                snippet: snippet(r.error.as_deref().unwrap_or(&r.text), self.config.snippet_chars),
                error: r.is_error(),
            })
            .collect()
    }

    async fn record(&self, record: ThoughtRecord, failures: u64, latency_ms: f64) {
        let low_confidence = record.confidence < self.config.low_confidence_alert;
        {
            let mut stats = self.stats.write().await;
            stats.total_queries += 1;
            stats.reflection_iterations += u64::from(record.iterations);
            stats.escalations += u64::from(record.escalated);
            stats.safety_flags += u64::from(record.safety_flagged);
            stats.generator_failures += failures;
            stats.low_confidence_alerts += u64::from(low_confidence);
            let n = stats.total_queries as f64;
            stats.average_confidence += (record.confidence - stats.average_confidence) / n;
            stats.average_latency_ms += (latency_ms - stats.average_latency_ms) / n;
        }

        if self.config.history_capacity > 0 {
            let mut history = self.history.write().await;
            while history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        let Some(bus) = &self.bus else { return };
        let payload = serde_json::to_value(&record).unwrap_or_default();
        bus.publish(Envelope::new(TRACE_TOPIC, &self.name, "trace", payload))
            .await;
        if low_confidence {
            bus.publish(Envelope::new(
                LOW_CONFIDENCE_TOPIC,
                &self.name,
                "alert",
                serde_json::json!({
                    "trace_id": record.trace_id,
                    "confidence": record.confidence,
                    "domain": record.perception.domain,
                    "query": record.query,
                }),
            ))
            .await;
        }
    }

    /// Most recent thought records, newest last.
    pub async fn recent_thoughts(&self, limit: usize) -> Vec<ThoughtRecord> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn stats(&self) -> RouterStats {
        self.stats.read().await.clone()
    }
}

fn failed_response(
    id: String,
    role: GeneratorRole,
    generator: &str,
    phase: GenerationPhase,
    error: &str,
    started: Instant,
) -> GeneratorResponse {
    GeneratorResponse {
        id,
        role,
        generator: generator.to_string(),
        phase,
        text: format!("[{generator} unavailable: {error}]"),
        confidence: FAILED_RESPONSE_CONFIDENCE,
        rationale: None,
        error: Some(error.to_string()),
        timestamp: Utc::now(),
        elapsed: started.elapsed(),
    }
}

fn fuse_or_placeholder(responses: &[GeneratorResponse], novelty: f64) -> FusedAnswer {
    fusion::fuse(responses, novelty).unwrap_or_else(|_| FusedAnswer {
        text: String::new(),
        confidence: 0.0,
        best_source: String::new(),
        weights: BTreeMap::new(),
        safety_flagged: false,
        escalated: false,
    })
}

fn snippet(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn initial_prompt(role: GeneratorRole, query: &str) -> String {
    match role {
        GeneratorRole::Divergent => format!(
            "Explore unconventional angles and alternative interpretations, then answer.\n\nQuery: {query}"
        ),
        GeneratorRole::Convergent | GeneratorRole::Arbiter => format!(
            "Give a precise, well-grounded answer.\n\nQuery: {query}"
        ),
    }
}

fn critique_prompt(query: &str, candidate: &str) -> String {
    format!(
        "Critique the candidate answer for errors and omissions, then write an improved answer.\n\nQuery: {query}\n\nCandidate answer:\n{candidate}"
    )
}

fn expand_prompt(query: &str, candidate: &str) -> String {
    format!(
        "List approaches the candidate answer missed, then write the best answer you can.\n\nQuery: {query}\n\nCandidate answer:\n{candidate}"
    )
}

fn escalation_prompt(query: &str, responses: &[GeneratorResponse], fused: &FusedAnswer) -> String {
    use std::fmt::Write;

    let mut prompt = format!(
        "Several generators answered the query below. Integrate them into one final answer, resolving disagreements.\n\nQuery: {query}\n\nCandidates:\n"
    );
    for (i, r) in responses.iter().filter(|r| !r.is_error()).enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] ({}, {}, confidence {:.2})\n{}\n",
            i + 1,
            r.role,
            r.phase,
            r.confidence,
            r.text
        );
    }
    let _ = write!(
        prompt,
        "Current fused answer (confidence {:.2}):\n{}",
        fused.confidence, fused.text
    );
    prompt
}
