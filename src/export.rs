//! Renders a finished batch to the spreadsheet, CSV/JSON and plain-text artifacts.

use crate::config::OutputConfig;
use crate::deriver::FactStatus;
use crate::pipeline::{BatchReport, StateOutcome};
use anyhow::{Context, Result};
use csv::Writer;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Spreadsheet and CSV column headers, in order
pub const COLUMNS: [&str; 8] = [
    "State",
    "State Code",
    "Nexus Standard",
    "Effective Date (Nexus)",
    "Tax Base Summary",
    "Source URL",
    "Sales Factor Method",
    "Effective Date (Sales Factor)",
];

const SOURCE_URL_COLUMN: u16 = 5;

/// One output row per state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub state: String,
    pub state_code: String,
    pub nexus_standard: String,
    pub nexus_effective_date: String,
    pub tax_base_summary: String,
    pub source_url: String,
    pub sales_factor_method: String,
    pub sales_factor_date: String,
}

impl SummaryRow {
    pub fn from_outcome(outcome: &StateOutcome) -> Self {
        let config = &outcome.config;
        Self {
            state: config.state_name.clone(),
            state_code: config.state_code.clone(),
            nexus_standard: config.nexus_standard.clone(),
            nexus_effective_date: config.nexus_effective_date.clone(),
            tax_base_summary: tax_base_summary(outcome),
            source_url: outcome
                .source_url
                .clone()
                .unwrap_or_else(|| config.primary_url.clone()),
            sales_factor_method: config.sales_factor_method.clone(),
            sales_factor_date: config.sales_factor_date.clone(),
        }
    }

    fn cells(&self) -> [&str; 8] {
        [
            &self.state,
            &self.state_code,
            &self.nexus_standard,
            &self.nexus_effective_date,
            &self.tax_base_summary,
            &self.source_url,
            &self.sales_factor_method,
            &self.sales_factor_date,
        ]
    }
}

/// One line per section, `<label>: <description>`, followed by the entity/industry context.
pub fn tax_base_summary(outcome: &StateOutcome) -> String {
    let mut lines: Vec<String> = outcome
        .result
        .facts
        .iter()
        .map(|fact| {
            let label = outcome
                .raw_sections
                .iter()
                .find(|r| r.key == fact.section)
                .map(|r| r.label.clone())
                .unwrap_or_else(|| fact.section.clone());
            format!("{}: {}", label, fact.description)
        })
        .collect();
    lines.push(outcome.config.context().summary_suffix());
    lines.join("\n")
}

/// Writes run artifacts into one output directory.
pub struct ReportSink {
    output_dir: PathBuf,
    config: OutputConfig,
}

impl ReportSink {
    pub fn new(config: &OutputConfig, output_dir_override: Option<&str>) -> Self {
        let dir = output_dir_override.unwrap_or(&config.output_dir);
        Self {
            output_dir: PathBuf::from(dir),
            config: config.clone(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the requested tabular formats plus the audit log and raw-section dump.
    /// `stamp` distinguishes runs in the tabular file names.
    pub fn write_all(&self, report: &BatchReport, formats: &[&str], stamp: &str) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)
            .context(format!("Failed to create output directory: {}", self.output_dir.display()))?;

        let rows: Vec<SummaryRow> = report.outcomes.iter().map(SummaryRow::from_outcome).collect();
        let base = format!("{}_{}", self.config.spreadsheet_prefix, stamp);
        let mut written = Vec::new();

        for format in formats {
            let path = self.output_dir.join(format!("{}.{}", base, format));
            match *format {
                "xlsx" => export_xlsx(&rows, &path)?,
                "csv" => export_csv(&rows, &path)?,
                "json" => export_json(report, &rows, &path)?,
                other => anyhow::bail!("Unsupported export format: {}", other),
            }
            written.push(path);
        }

        let audit_path = self.output_dir.join(&self.config.audit_log_name);
        export_audit_log(report, &audit_path)?;
        written.push(audit_path);

        let raw_path = self.output_dir.join(&self.config.raw_sections_name);
        export_raw_sections(report, &raw_path)?;
        written.push(raw_path);

        Ok(written)
    }
}

pub fn export_xlsx(rows: &[SummaryRow], output_path: &Path) -> Result<()> {
    debug!("Exporting {} states to XLSX: {}", rows.len(), output_path.display());

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let wrap_format = Format::new().set_text_wrap();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Tax Summary")?;

    for (col, title) in COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header_format)?;
    }
    worksheet.set_column_width(4, 70)?;
    worksheet.set_column_width(SOURCE_URL_COLUMN, 45)?;

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in row.cells().iter().enumerate() {
            let col = col as u16;
            if col == SOURCE_URL_COLUMN && value.starts_with("http") {
                worksheet.write_url(r, col, *value)?;
            } else {
                worksheet.write_string_with_format(r, col, *value, &wrap_format)?;
            }
        }
    }

    workbook
        .save(output_path)
        .context(format!("Failed to save spreadsheet: {}", output_path.display()))?;

    info!("Successfully exported {} states to XLSX: {}", rows.len(), output_path.display());
    Ok(())
}

pub fn export_csv(rows: &[SummaryRow], output_path: &Path) -> Result<()> {
    debug!("Exporting {} states to CSV: {}", rows.len(), output_path.display());

    let file = File::create(output_path)
        .context(format!("Failed to create CSV file: {}", output_path.display()))?;
    let mut wtr = Writer::from_writer(file);

    wtr.write_record(COLUMNS)?;
    for row in rows {
        wtr.write_record(row.cells())?;
    }

    wtr.flush()?;
    info!("Successfully exported {} states to CSV: {}", rows.len(), output_path.display());
    Ok(())
}

#[derive(Serialize)]
struct JsonExport<'a> {
    summary: ExportSummary,
    states: Vec<JsonState<'a>>,
}

#[derive(Serialize)]
struct ExportSummary {
    total_states: usize,
    states_failed: usize,
    sections_resolved: usize,
    sections_unresolved: usize,
}

#[derive(Serialize)]
struct JsonState<'a> {
    #[serde(flatten)]
    row: &'a SummaryRow,
    result: &'a crate::pipeline::StateResult,
}

pub fn export_json(report: &BatchReport, rows: &[SummaryRow], output_path: &Path) -> Result<()> {
    debug!("Exporting {} states to JSON: {}", rows.len(), output_path.display());

    let json_output = JsonExport {
        summary: ExportSummary {
            total_states: report.outcomes.len(),
            states_failed: report.states_failed(),
            sections_resolved: report.sections_resolved(),
            sections_unresolved: report.sections_unresolved(),
        },
        states: rows
            .iter()
            .zip(&report.outcomes)
            .map(|(row, outcome)| JsonState {
                row,
                result: &outcome.result,
            })
            .collect(),
    };

    let json_string = serde_json::to_string_pretty(&json_output)?;
    let mut file = File::create(output_path)
        .context(format!("Failed to create JSON file: {}", output_path.display()))?;
    file.write_all(json_string.as_bytes())?;

    info!("Successfully exported {} states to JSON: {}", rows.len(), output_path.display());
    Ok(())
}

/// `=== <code> ===` followed by that state's reasoning trail.
pub fn export_audit_log(report: &BatchReport, output_path: &Path) -> Result<()> {
    let mut file = File::create(output_path)
        .context(format!("Failed to create audit log: {}", output_path.display()))?;

    for outcome in &report.outcomes {
        write!(file, "=== {} ===\n{}\n\n", outcome.result.state_code, outcome.audit.render())?;
    }

    info!("Reasoning log saved to {}", output_path.display());
    Ok(())
}

/// Extracted section text per state, as it was handed to the deriver.
pub fn export_raw_sections(report: &BatchReport, output_path: &Path) -> Result<()> {
    let mut file = File::create(output_path)
        .context(format!("Failed to create raw sections file: {}", output_path.display()))?;

    for outcome in &report.outcomes {
        writeln!(file, "=== {} ({}) ===", outcome.config.state_name, outcome.config.state_code)?;
        if let Some(url) = &outcome.source_url {
            writeln!(file, "Source: {}", url)?;
        }
        if let Some(failure) = &outcome.fetch_failure {
            writeln!(file, "[fetch failed: {}]", failure)?;
        }
        for raw in &outcome.raw_sections {
            let strategy = raw.strategy.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
            writeln!(file, "--- {} (matched by {}) ---\n{}", raw.label, strategy, raw.text)?;
        }
        writeln!(file)?;
    }

    debug!("Raw sections saved to {}", output_path.display());
    Ok(())
}

pub fn print_run_summary(report: &BatchReport) {
    if report.outcomes.is_empty() {
        println!("No states processed.");
        return;
    }

    println!("\n=== Results ===");
    for outcome in &report.outcomes {
        println!("{} ({})", outcome.config.state_name, outcome.config.state_code);
        for fact in &outcome.result.facts {
            let marker = match fact.status {
                FactStatus::Resolved => "ok",
                FactStatus::Unresolved => "--",
            };
            println!("  [{}] {}: {} ({})", marker, fact.section, fact.description, fact.method);
        }
    }
}
