//! Result exports for a finished run.
//!
//! Four delimited tables plus a JSON run summary are written into one
//! output directory. Every table writer is generic over [`io::Write`] so it
//! can target a file, a buffer or stdout.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use openness_shared::{CriterionSummary, OpennessError, Result, RunReport};

pub const RESULTS_DETAILED: &str = "results_detailed.csv";
pub const SUMMARY_ORGANIZATIONS: &str = "summary_organizations.csv";
pub const SUMMARY_CRITERIA: &str = "summary_criteria.csv";
pub const SUMMARY_DIMENSIONS: &str = "summary_dimensions.csv";
pub const RUN_SUMMARY: &str = "run_summary.json";

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DetailedRow<'a> {
    organization: &'a str,
    base_url: &'a str,
    criterion_id: &'a str,
    criterion_name: &'a str,
    dimension: &'a str,
    fulfilled: &'static str,
    confidence: String,
    low_confidence: &'static str,
    justification: &'a str,
    source_url: &'a str,
    evidence_excerpt: &'a str,
    evidence_count: usize,
    origin: &'static str,
}

#[derive(Serialize)]
struct OrganizationRow<'a> {
    organization: &'a str,
    base_url: &'a str,
    total_criteria: usize,
    fulfilled: usize,
    fulfillment_rate: String,
    weighted_fulfillment_rate: String,
    mean_confidence: String,
    successful_pages: usize,
    failed_pages: usize,
    low_confidence: usize,
}

#[derive(Serialize)]
struct CriterionRow<'a> {
    criterion_id: &'a str,
    criterion_name: &'a str,
    dimension: &'a str,
    evaluated: usize,
    fulfilling: usize,
    fulfillment_rate: String,
    mean_confidence: String,
}

#[derive(Serialize)]
struct DimensionRow<'a> {
    organization: &'a str,
    dimension_id: &'a str,
    dimension: &'a str,
    total: usize,
    fulfilled: usize,
    fulfillment_rate: String,
    weighted_fulfillment_rate: String,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn rate(value: f64) -> String {
    format!("{value:.1}")
}

fn confidence(value: f64) -> String {
    format!("{value:.2}")
}

// ---------------------------------------------------------------------------
// Table writers
// ---------------------------------------------------------------------------

fn csv_writer<W: io::Write>(writer: W, delimiter: u8) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_writer(writer)
}

fn export_err(table: &str, e: impl std::fmt::Display) -> OpennessError {
    OpennessError::Export(format!("{table}: {e}"))
}

fn write_rows<W, R, I>(writer: W, delimiter: u8, table: &str, rows: I) -> Result<()>
where
    W: io::Write,
    R: Serialize,
    I: IntoIterator<Item = R>,
{
    let mut out = csv_writer(writer, delimiter);
    for row in rows {
        out.serialize(row).map_err(|e| export_err(table, e))?;
    }
    out.flush().map_err(|e| export_err(table, e))
}

/// One row per (organization, criterion).
pub fn write_detailed<W: io::Write>(writer: W, delimiter: u8, report: &RunReport) -> Result<()> {
    let criteria: HashMap<&str, &CriterionSummary> = report
        .criteria
        .iter()
        .map(|c| (c.criterion_id.as_str(), c))
        .collect();

    let rows = report.evaluations.iter().flat_map(|evaluation| {
        let criteria = &criteria;
        evaluation.results.iter().map(move |result| {
            let criterion = criteria.get(result.criterion_id.as_str());
            DetailedRow {
                organization: &evaluation.organization.name,
                base_url: &evaluation.organization.base_url,
                criterion_id: &result.criterion_id,
                criterion_name: criterion.map_or("", |c| c.name.as_str()),
                dimension: criterion.map_or("", |c| c.dimension_id.as_str()),
                fulfilled: yes_no(result.fulfilled),
                confidence: confidence(result.confidence),
                low_confidence: yes_no(result.low_confidence),
                justification: &result.justification,
                source_url: result.source_url.as_deref().unwrap_or(""),
                evidence_excerpt: result.evidence_excerpt.as_deref().unwrap_or(""),
                evidence_count: result.evidence_count,
                origin: result.origin.as_str(),
            }
        })
    });
    write_rows(writer, delimiter, RESULTS_DETAILED, rows)
}

pub fn write_organizations<W: io::Write>(
    writer: W,
    delimiter: u8,
    report: &RunReport,
) -> Result<()> {
    let rows = report.organizations.iter().map(|o| OrganizationRow {
        organization: &o.name,
        base_url: &o.base_url,
        total_criteria: o.total_criteria,
        fulfilled: o.fulfilled_count,
        fulfillment_rate: rate(o.fulfillment_rate),
        weighted_fulfillment_rate: rate(o.weighted_fulfillment_rate),
        mean_confidence: confidence(o.mean_confidence),
        successful_pages: o.successful_pages,
        failed_pages: o.failed_pages,
        low_confidence: o.low_confidence_count,
    });
    write_rows(writer, delimiter, SUMMARY_ORGANIZATIONS, rows)
}

pub fn write_criteria<W: io::Write>(writer: W, delimiter: u8, report: &RunReport) -> Result<()> {
    let rows = report.criteria.iter().map(|c| CriterionRow {
        criterion_id: &c.criterion_id,
        criterion_name: &c.name,
        dimension: &c.dimension_id,
        evaluated: c.evaluated,
        fulfilling: c.fulfilling,
        fulfillment_rate: rate(c.fulfillment_rate),
        mean_confidence: confidence(c.mean_confidence),
    });
    write_rows(writer, delimiter, SUMMARY_CRITERIA, rows)
}

pub fn write_dimensions<W: io::Write>(writer: W, delimiter: u8, report: &RunReport) -> Result<()> {
    let rows = report.dimensions.iter().map(|d| DimensionRow {
        organization: &d.organization,
        dimension_id: &d.dimension_id,
        dimension: &d.dimension_name,
        total: d.total,
        fulfilled: d.fulfilled,
        fulfillment_rate: rate(d.fulfillment_rate),
        weighted_fulfillment_rate: rate(d.weighted_fulfillment_rate),
    });
    write_rows(writer, delimiter, SUMMARY_DIMENSIONS, rows)
}

/// Pretty-printed run summary.
pub fn write_summary_json<W: io::Write>(writer: W, report: &RunReport) -> Result<()> {
    serde_json::to_writer_pretty(writer, &report.summary).map_err(|e| export_err(RUN_SUMMARY, e))
}

// ---------------------------------------------------------------------------
// Directory export
// ---------------------------------------------------------------------------

/// Write every export into `out_dir`, creating it if needed.
///
/// Returns the written paths in a fixed order.
#[instrument(skip_all, fields(out_dir = %out_dir.display(), run_id = %report.summary.run_id))]
pub fn write_report(out_dir: &Path, report: &RunReport, delimiter: u8) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir).map_err(|e| OpennessError::io(out_dir, e))?;

    type TableWriter = fn(File, u8, &RunReport) -> Result<()>;
    let tables: [(&str, TableWriter); 4] = [
        (RESULTS_DETAILED, write_detailed),
        (SUMMARY_ORGANIZATIONS, write_organizations),
        (SUMMARY_CRITERIA, write_criteria),
        (SUMMARY_DIMENSIONS, write_dimensions),
    ];

    let mut written = Vec::with_capacity(tables.len() + 1);
    for (name, write) in tables {
        let path = out_dir.join(name);
        let file = File::create(&path).map_err(|e| OpennessError::io(&path, e))?;
        write(file, delimiter, report)?;
        debug!(path = %path.display(), "wrote table");
        written.push(path);
    }

    let path = out_dir.join(RUN_SUMMARY);
    let file = File::create(&path).map_err(|e| OpennessError::io(&path, e))?;
    let mut out = io::BufWriter::new(file);
    write_summary_json(&mut out, report)?;
    io::Write::flush(&mut out).map_err(|e| OpennessError::io(&path, e))?;
    debug!(path = %path.display(), "wrote run summary");
    written.push(path);

    info!(files = written.len(), "exports written");
    Ok(written)
}
