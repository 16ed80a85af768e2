//! Table output formatting for CLI commands
//!
//! Provenance, perception and metrics tables using comfy-table.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use super::truncate;
use crate::domain::models::{ArbiterMetrics, PerceptionResult, ProvenanceEntry};

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per response that fed the answer
    pub fn format_provenance(&self, entries: &[ProvenanceEntry]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "Source", "Phase", "Generator", "Confidence", "Weight", "Snippet",
        ]));

        for entry in entries {
            let confidence = format!("{:.2}", entry.confidence);
            let confidence_cell = if self.use_colors {
                Cell::new(&confidence).fg(confidence_color(entry.confidence, entry.error))
            } else {
                Cell::new(&confidence)
            };
            let weight = entry
                .weight
                .map_or_else(|| "-".to_string(), |w| format!("{w:.2}"));

            table.add_row(vec![
                Cell::new(&entry.source),
                Cell::new(entry.phase.as_str()),
                Cell::new(&entry.generator),
                confidence_cell,
                Cell::new(weight),
                Cell::new(truncate(&entry.snippet, 60)),
            ]);
        }

        table.to_string()
    }

    pub fn format_perception(&self, perception: &PerceptionResult) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Field", "Value"]));
        table.add_row(vec![Cell::new("domain"), Cell::new(perception.domain.as_str())]);
        table.add_row(vec![Cell::new("novelty"), Cell::new(format!("{:.2}", perception.novelty))]);
        table.add_row(vec![Cell::new("risk"), Cell::new(format!("{:.2}", perception.risk))]);
        table.add_row(vec![
            Cell::new("complexity"),
            Cell::new(format!("{:.2}", perception.complexity)),
        ]);
        table.add_row(vec![
            Cell::new("token_length"),
            Cell::new(perception.token_length),
        ]);
        table.to_string()
    }

    pub fn format_metrics(&self, metrics: &ArbiterMetrics) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Metric", "Value"]));
        table.add_row(vec![Cell::new("tasks processed"), Cell::new(metrics.tasks_processed)]);
        table.add_row(vec![Cell::new("succeeded"), Cell::new(metrics.tasks_succeeded)]);
        table.add_row(vec![Cell::new("failed"), Cell::new(metrics.tasks_failed)]);
        table.add_row(vec![Cell::new("retries"), Cell::new(metrics.retries)]);
        table.add_row(vec![
            Cell::new("success rate"),
            Cell::new(format!("{:.1}%", metrics.success_rate * 100.0)),
        ]);
        table.add_row(vec![
            Cell::new("avg duration"),
            Cell::new(format!("{:.0} ms", metrics.avg_duration_ms)),
        ]);
        table.add_row(vec![
            Cell::new("last active"),
            Cell::new(
                metrics
                    .last_active
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339()),
            ),
        ]);
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn confidence_color(confidence: f64, error: bool) -> Color {
    if error {
        Color::Red
    } else if confidence >= 0.8 {
        Color::Green
    } else if confidence >= 0.5 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Check if color output is supported
fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GenerationPhase, GeneratorRole};
    use crate::services::perception::classify;

    fn entry(source: &str, confidence: f64, error: bool) -> ProvenanceEntry {
        ProvenanceEntry {
            source: source.to_string(),
            role: GeneratorRole::Convergent,
            generator: "con".to_string(),
            phase: GenerationPhase::Initial,
            confidence,
            weight: if error { None } else { Some(0.6) },
            snippet: "the answer is 42".to_string(),
            error,
        }
    }

    #[test]
    fn test_table_formatter_with_config() {
        let formatter = TableFormatter::with_config(false, Some(120));
        assert!(!formatter.use_colors);
        assert_eq!(formatter.max_width, Some(120));
    }

    #[test]
    fn test_format_provenance() {
        let formatter = TableFormatter::with_config(false, None);
        let output = formatter.format_provenance(&[
            entry("convergent-initial-0", 0.82, false),
            entry("divergent-initial-1", 0.1, true),
        ]);
        assert!(output.contains("convergent-initial-0"));
        assert!(output.contains("0.82"));
        assert!(output.contains("0.60"));
        assert!(output.contains('-'));
    }

    #[test]
    fn test_format_perception_and_metrics() {
        let formatter = TableFormatter::with_config(false, None);
        let perception = formatter.format_perception(&classify("what is the dosage for this symptom"));
        assert!(perception.contains("medical"));

        let metrics = formatter.format_metrics(&ArbiterMetrics::default());
        assert!(metrics.contains("tasks processed"));
        assert!(metrics.contains("never"));
    }

    #[test]
    fn test_confidence_color() {
        assert_eq!(confidence_color(0.9, false), Color::Green);
        assert_eq!(confidence_color(0.6, false), Color::Yellow);
        assert_eq!(confidence_color(0.9, true), Color::Red);
    }
}
