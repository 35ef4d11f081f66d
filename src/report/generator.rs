//! Report rendering.
//!
//! Every renderer produces the complete payload in memory; sinks write it
//! out in one piece.

use crate::error::SinkError;
use crate::models::{FieldValue, ReportMetadata, RollupReport};

/// Render one line per record, e.g. `{'d': '2026-10-19', 'h': 9, 'concurrent': 3}`.
pub fn generate_console_lines(report: &RollupReport) -> String {
    let mut output = String::new();
    for record in &report.records {
        output.push_str(&record.to_string());
        output.push('\n');
    }
    output
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RollupReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", report.metadata.kind.title()));
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_records_section(report));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Rollup:** `{}`\n", metadata.kind));
    section.push_str(&format!("- **Window:** {}\n", metadata.window));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Records:** {} (limit {})\n",
        metadata.row_count, metadata.limit
    ));
    section.push_str(&format!(
        "- **Duration:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_records_section(report: &RollupReport) -> String {
    let mut section = String::new();

    section.push_str("## Records\n\n");

    if report.is_empty() {
        section.push_str("No rows matched the requested window.\n\n");
        return section;
    }

    let columns = report.metadata.kind.columns();
    section.push_str(&format!("| {} |\n", columns.join(" | ")));
    section.push_str(&format!(
        "|{}\n",
        columns
            .iter()
            .map(|_| ":---|")
            .collect::<String>()
    ));

    for record in &report.records {
        let cells: Vec<String> = record
            .fields()
            .iter()
            .map(|(_, value)| markdown_cell(value))
            .collect();
        section.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    section.push('\n');

    section
}

fn markdown_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "-".to_string(),
        other => other.to_string().replace('|', "\\|"),
    }
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by avd-rollup v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON report: metadata plus records as ordered objects.
pub fn generate_json_report(report: &RollupReport) -> Result<String, SinkError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Generate a CSV report with a header row, even when there are no records.
pub fn generate_csv_report(report: &RollupReport) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(report.metadata.kind.columns())?;

    for record in &report.records {
        writer.write_record(record.fields().iter().map(|(_, value)| value.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| SinkError::Csv(e.into_error().into()))
}
