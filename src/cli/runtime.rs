//! Wiring shared by the commands: configuration, storage and a ready
//! arbiter built from them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::clock::SystemClock;
use crate::adapters::generators::HttpGenerator;
use crate::adapters::sqlite::{initialize_database, database_url, PoolConfig, SqliteStateStore};
use crate::domain::models::{Config, DatabaseConfig, GeneratorConfig, GeneratorsConfig};
use crate::domain::ports::{Clock, Generator};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ArbiterCore, ArbiterDeps, CognitiveRouter, EventBus, GeneratorSet, Worker};

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<SqliteStateStore>> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        ..PoolConfig::default()
    };
    let pool = initialize_database(&database_url(&config.path), Some(pool_config))
        .await
        .with_context(|| format!("Failed to open database at {}", config.path))?;
    Ok(Arc::new(SqliteStateStore::new(pool)))
}

fn http_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    let generator = HttpGenerator::new(config.clone())
        .with_context(|| format!("Failed to build generator '{}'", config.name))?;
    Ok(Arc::new(generator))
}

pub fn build_generators(config: &GeneratorsConfig) -> Result<GeneratorSet> {
    let mut generators = GeneratorSet::new(
        http_generator(&config.divergent)?,
        http_generator(&config.convergent)?,
    );
    if let Some(arbiter) = &config.arbiter {
        generators = generators.with_arbiter(http_generator(arbiter)?);
    }
    Ok(generators)
}

/// Build a routing arbiter over HTTP generators and restore its persisted
/// state.
pub async fn start_arbiter(config: &Config) -> Result<Arc<ArbiterCore<Worker>>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(EventBus::default());
    let store = open_store(&config.database).await?;

    let generators =
        build_generators(&config.generators)?.guarded(&config.circuit_breaker, &clock);
    let router = CognitiveRouter::new(
        config.arbiter.name.clone(),
        generators,
        config.router.clone(),
    )
    .with_bus(bus.clone());

    let arbiter = Arc::new(ArbiterCore::new(
        config,
        Worker::routing(Arc::new(router)),
        ArbiterDeps { clock, bus, store },
    ));
    arbiter
        .initialize()
        .await
        .context("Failed to initialize arbiter")?;
    Ok(arbiter)
}
