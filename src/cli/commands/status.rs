//! Implementation of the `arbiter status` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::{load_config, open_store};
use crate::domain::models::{state_key, ArbiterSnapshot};
use crate::domain::ports::StateStore;

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub name: String,
    pub snapshot: Option<ArbiterSnapshot>,
    /// Every arbiter with persisted state, children included
    pub known_arbiters: Vec<String>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let Some(snapshot) = &self.snapshot else {
            return format!(
                "No persisted state for '{}'. Run a query to create it.",
                self.name
            );
        };
        let identity = &snapshot.identity;
        let lineage = if identity.lineage.is_empty() {
            "(root)".to_string()
        } else {
            identity.lineage.join(" -> ")
        };
        let capabilities: Vec<&str> = identity.capabilities.iter().map(|c| c.as_str()).collect();

        let mut lines = vec![
            format!("{} ({})", identity.name, identity.role),
            format!("  id:           {}", identity.id),
            format!("  generation:   {}", identity.generation),
            format!("  lineage:      {lineage}"),
            format!("  dna:          {}", identity.dna.short()),
            format!("  capabilities: {}", capabilities.join(", ")),
            format!("  mutations:    {}", identity.mutations.len()),
            format!("  saved at:     {}", snapshot.saved_at.to_rfc3339()),
            String::new(),
            TableFormatter::new().format_metrics(&snapshot.metrics),
        ];
        if self.known_arbiters.len() > 1 {
            lines.push(String::new());
            lines.push(format!("Known arbiters: {}", self.known_arbiters.join(", ")));
        }
        lines.join("\n")
    }
}

pub async fn execute(config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config.database).await?;

    let snapshot = match store.read_state(&state_key(&config.arbiter.name)).await? {
        Some(value) => Some(
            serde_json::from_value::<ArbiterSnapshot>(value)
                .context("Persisted arbiter state is corrupt")?,
        ),
        None => None,
    };
    let known_arbiters = store
        .list_keys()
        .await?
        .into_iter()
        .filter_map(|key| key.strip_prefix("arbiter:").map(str::to_string))
        .collect();

    let output_data = StatusOutput {
        name: config.arbiter.name,
        snapshot,
        known_arbiters,
    };
    output(&output_data, json_mode);
    Ok(())
}
