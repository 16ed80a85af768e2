//! Implementation of the `arbiter classify` command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::table::TableFormatter;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::PerceptionResult;
use crate::services::perception;

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Query text to classify
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ClassifyOutput(pub PerceptionResult);

impl CommandOutput for ClassifyOutput {
    fn to_human(&self) -> String {
        TableFormatter::new().format_perception(&self.0)
    }
}

pub fn execute(args: &ClassifyArgs, json_mode: bool) -> Result<()> {
    output(&ClassifyOutput(perception::classify(&args.text)), json_mode);
    Ok(())
}
