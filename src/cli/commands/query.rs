//! Implementation of the `arbiter query` command.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::progress::{create_spinner, ProgressBarExt};
use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::{load_config, start_arbiter};
use crate::domain::models::{Capability, QueryOutcome};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query text
    pub text: String,

    /// Answer from the first fusion pass without reflection rounds
    #[arg(long)]
    pub no_reflection: bool,
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub task_id: uuid::Uuid,
    pub duration_ms: u128,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

impl CommandOutput for QueryOutput {
    fn to_human(&self) -> String {
        let outcome = &self.outcome;
        let mut lines = vec![
            outcome.answer.clone(),
            String::new(),
            format!(
                "confidence {:.2} | domain {} | iterations {} | escalated {} | safety flagged {}",
                outcome.confidence,
                outcome.perception.domain,
                outcome.iterations,
                outcome.escalated,
                outcome.safety_flagged
            ),
            format!("best source {} | {} ms", outcome.best_source, self.duration_ms),
        ];
        if !outcome.provenance.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_provenance(&outcome.provenance));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: QueryArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if args.no_reflection {
        config.router.reflection_enabled = false;
        config
            .arbiter
            .capabilities
            .retain(|c| *c != Capability::Reflection);
    }

    let arbiter = start_arbiter(&config).await?;
    let spinner = create_spinner("Routing query...", json_mode);

    let handle = arbiter.submit(arbiter.task(args.text)).await?;
    let task_id = handle.id;
    arbiter.drain().await;
    let result = handle.wait().await;
    arbiter.shutdown().await?;
    let result = result?;

    if !result.success {
        spinner.finish_error("query failed");
        anyhow::bail!(
            "query failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    spinner.finish_and_clear();

    let outcome: QueryOutcome = serde_json::from_value(result.payload)
        .context("Router returned an unexpected payload")?;
    let output_data = QueryOutput {
        task_id,
        duration_ms: result.duration.as_millis(),
        outcome,
    };
    output(&output_data, json_mode);
    Ok(())
}
