//! Command-line interface for the `arbiter` binary.

pub mod commands;
pub mod output;
pub mod runtime;
pub mod types;

pub use types::{Cli, Commands};

/// Print a command error the way the chosen output mode expects and exit
/// non-zero.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
