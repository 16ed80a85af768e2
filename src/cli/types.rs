//! CLI type definitions
//!
//! Clap command structures that define the `arbiter` command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::classify::ClassifyArgs;
use super::commands::clone::CloneArgs;
use super::commands::init::InitArgs;
use super::commands::query::QueryArgs;

#[derive(Parser, Debug)]
#[command(name = "arbiter")]
#[command(about = "Arbiter - supervised workers with multi-generator answer fusion", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this YAML file instead of .arbiter/
    #[arg(short, long, global = true, env = "ARBITER_CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write default configuration and create the database
    Init(InitArgs),

    /// Answer a query through the cognitive router
    Query(QueryArgs),

    /// Classify a query without generating an answer
    Classify(ClassifyArgs),

    /// Show the persisted identity, lineage and metrics
    Status,

    /// Derive and persist a child arbiter
    Clone(CloneArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_with_flags() {
        let cli = Cli::try_parse_from([
            "arbiter",
            "--json",
            "query",
            "why is the sky blue",
            "--no-reflection",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Query(args) => {
                assert_eq!(args.text, "why is the sky blue");
                assert!(args.no_reflection);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_clone_traits() {
        let cli = Cli::try_parse_from([
            "arbiter",
            "clone",
            "--name",
            "strict",
            "--trait",
            "finalize_threshold=0.9",
            "--trait",
            "max_iterations=1",
        ])
        .unwrap();
        let Commands::Clone(args) = cli.command else {
            panic!("expected clone");
        };
        assert_eq!(args.name.as_deref(), Some("strict"));
        assert_eq!(
            args.traits,
            vec![
                ("finalize_threshold".to_string(), 0.9),
                ("max_iterations".to_string(), 1.0)
            ]
        );
    }

    #[test]
    fn test_parse_clone_rejects_malformed_trait() {
        assert!(Cli::try_parse_from(["arbiter", "clone", "--trait", "oops"]).is_err());
        assert!(Cli::try_parse_from(["arbiter", "clone", "--trait", "k=abc"]).is_err());
    }
}
