//! Implementation of the `arbiter clone` command.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::{load_config, start_arbiter};
use crate::domain::models::ArbiterIdentity;
use crate::services::CloneOverrides;

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Child name (defaults to <parent>-g<generation>)
    #[arg(long)]
    pub name: Option<String>,

    /// Trait override as name=value; repeatable
    #[arg(long = "trait", value_parser = parse_trait)]
    pub traits: Vec<(String, f64)>,

    /// Copy the parent's recent context history into the child
    #[arg(long)]
    pub with_context: bool,
}

fn parse_trait(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("trait name cannot be empty".to_string());
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("trait '{name}' needs a numeric value, got '{value}'"))?;
    Ok((name.to_string(), value))
}

#[derive(Debug, Serialize)]
pub struct CloneOutput {
    pub parent: String,
    pub child: ArbiterIdentity,
}

impl CommandOutput for CloneOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Cloned '{}' into '{}' (generation {}, dna {})",
            self.parent,
            self.child.name,
            self.child.generation,
            self.child.dna.short()
        )];
        for mutation in self.child.mutations.iter().filter(|m| m.generation == self.child.generation) {
            let from = mutation
                .from
                .map_or_else(|| "unset".to_string(), |v| v.to_string());
            lines.push(format!("  {}: {from} -> {}", mutation.trait_name, mutation.to));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: CloneArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let parent = start_arbiter(&config).await?;

    let overrides = CloneOverrides {
        name: args.name,
        traits: args.traits.into_iter().collect(),
        copy_context: args.with_context,
    };
    let child = parent.clone_arbiter(overrides).await;
    parent.shutdown().await?;
    let child = child?;

    let output_data = CloneOutput {
        parent: parent.name().to_string(),
        child: child.identity().await,
    };
    output(&output_data, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trait() {
        assert_eq!(
            parse_trait("finalize_threshold=0.9").unwrap(),
            ("finalize_threshold".to_string(), 0.9)
        );
        assert_eq!(parse_trait(" k = 2 ").unwrap(), ("k".to_string(), 2.0));
        assert!(parse_trait("novalue").is_err());
        assert!(parse_trait("=1").is_err());
        assert!(parse_trait("k=abc").is_err());
    }
}
