//! Common test utilities for integration tests
//!
//! Shared fixtures for building arbiters over scripted generators and
//! in-memory or on-disk state.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbiter::adapters::clock::ManualClock;
use arbiter::adapters::generators::ScriptedGenerator;
use arbiter::adapters::memory::InMemoryStateStore;
use arbiter::domain::models::{Config, GenerationPhase, GeneratorResponse, GeneratorRole};
use arbiter::domain::ports::{Clock, StateStore};
use arbiter::services::{
    ArbiterCore, ArbiterDeps, CognitiveRouter, EventBus, GeneratorSet, Worker,
};
use chrono::Utc;
use tempfile::TempDir;

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("arbiter.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config tuned for tests: small queue, short timeouts, no heartbeat.
pub fn test_config(name: &str) -> Config {
    let mut config = Config::default();
    config.arbiter.name = name.to_string();
    config.arbiter.queue_capacity = 16;
    config.arbiter.heartbeat_interval_secs = 0;
    config.arbiter.shutdown_grace_ms = 200;
    config.task.default_timeout_secs = 5;
    config
}

pub fn memory_deps() -> (ArbiterDeps, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    (deps_with(store, clock.clone()), clock)
}

pub fn deps_with(store: Arc<dyn StateStore>, clock: Arc<ManualClock>) -> ArbiterDeps {
    let clock: Arc<dyn Clock> = clock;
    ArbiterDeps {
        clock,
        bus: Arc::new(EventBus::default()),
        store,
    }
}

/// Divergent and convergent generators that both answer confidently.
pub fn confident_generators() -> (Arc<ScriptedGenerator>, Arc<ScriptedGenerator>) {
    (
        Arc::new(ScriptedGenerator::answering("div", "a broad exploratory answer", 0.9)),
        Arc::new(ScriptedGenerator::answering("con", "a focused precise answer", 0.92)),
    )
}

pub fn routing_worker(
    name: &str,
    config: &Config,
    generators: GeneratorSet,
    bus: &Arc<EventBus>,
) -> Worker {
    let router = CognitiveRouter::new(name, generators, config.router.clone()).with_bus(bus.clone());
    Worker::routing(Arc::new(router))
}

/// A ready routing arbiter over the given scripted generators.
pub async fn routing_arbiter(
    config: &Config,
    divergent: Arc<ScriptedGenerator>,
    convergent: Arc<ScriptedGenerator>,
    deps: ArbiterDeps,
) -> Arc<ArbiterCore<Worker>> {
    let generators = GeneratorSet::new(divergent, convergent);
    let worker = routing_worker(&config.arbiter.name, config, generators, &deps.bus);
    let arbiter = Arc::new(ArbiterCore::new(config, worker, deps));
    arbiter.initialize().await.expect("arbiter initializes");
    arbiter
}

pub fn response(id: &str, role: GeneratorRole, confidence: f64) -> GeneratorResponse {
    GeneratorResponse {
        id: id.to_string(),
        role,
        generator: role.as_str().to_string(),
        phase: GenerationPhase::Initial,
        text: format!("answer from {id}"),
        confidence,
        rationale: None,
        error: None,
        timestamp: Utc::now(),
        elapsed: Duration::from_millis(5),
    }
}
