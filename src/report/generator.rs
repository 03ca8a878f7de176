//! Markdown and JSON report generation.
//!
//! This module renders a [`StatsReport`] for humans (Markdown) or
//! machines (JSON).

use crate::analysis::widest_income_ranges;
use crate::error::RowError;
use crate::models::{ReportMetadata, StatsReport, StatsTable};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &StatsReport) -> String {
    let mut output = String::new();

    output.push_str("# Occupation Statistics Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_statistics_section(&report.statistics));
    output.push_str(&generate_rejected_section(&report.rejected));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    section.push_str("- **Input:**");
    if metadata.inputs.len() == 1 {
        section.push_str(&format!(" `{}`\n", metadata.inputs[0].display()));
    } else {
        section.push('\n');
        for input in &metadata.inputs {
            section.push_str(&format!("  - `{}`\n", input.display()));
        }
    }

    if let (Some(database), Some(container)) = (&metadata.database, &metadata.container) {
        section.push_str(&format!(
            "- **Container:** `{}` in `{}`",
            container,
            database.display()
        ));
        if let Some(status) = metadata.container_status {
            section.push_str(&format!(" ({})", status));
        }
        section.push('\n');
        section.push_str(&format!("- **Rows Written:** {}\n", metadata.rows_written));
    } else {
        section.push_str("- **Container:** none (dry run)\n");
    }

    section.push_str(&format!("- **Rows Read:** {}\n", metadata.rows_read));
    section.push_str(&format!("- **Rows Accepted:** {}\n", metadata.rows_accepted));
    if metadata.rows_rejected > 0 {
        section.push_str(&format!("- **Rows Rejected:** {}\n", metadata.rows_rejected));
    }
    section.push_str(&format!("- **Duration:** {:.2}s\n", metadata.duration_seconds));
    section.push('\n');

    section
}

/// Generate the statistics table.
fn generate_statistics_section(table: &StatsTable) -> String {
    let mut section = String::new();

    section.push_str("## Statistics by Occupation\n\n");

    if table.is_empty() {
        section.push_str("No records were aggregated.\n\n");
        return section;
    }

    section.push_str(
        "| Occupation | Min Income | Max Income | Min Family Size | Max Family Size |\n",
    );
    section.push_str("|:---|---:|---:|---:|---:|\n");
    for (occupation, stats) in table.iter() {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            escape_cell(occupation),
            stats.min_income,
            stats.max_income,
            stats.min_family_size,
            stats.max_family_size
        ));
    }
    section.push('\n');

    let ranges = widest_income_ranges(table, 5);
    if ranges.iter().any(|(_, spread)| *spread > 0) {
        section.push_str("### Widest Income Ranges\n\n");
        section.push_str("| Occupation | Spread |\n");
        section.push_str("|:---|---:|\n");
        for (occupation, spread) in ranges.into_iter().filter(|(_, spread)| *spread > 0) {
            section.push_str(&format!("| {} | {} |\n", escape_cell(occupation), spread));
        }
        section.push('\n');
    }

    section
}

/// Generate the rejected rows section.
fn generate_rejected_section(rejected: &[RowError]) -> String {
    if rejected.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Rejected Rows\n\n");
    section.push_str("| File | Line | Reason |\n");
    section.push_str("|:---|---:|:---|\n");
    for row in rejected {
        section.push_str(&format!(
            "| `{}` | {} | {} |\n",
            row.path.display(),
            row.line,
            escape_cell(&row.kind.to_string())
        ));
    }
    section.push('\n');

    section
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by census-stats v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON report.
pub fn generate_json_report(report: &StatsReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
