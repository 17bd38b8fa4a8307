//! Organization roster loader (two logical CSV columns: name, URL).

use std::io::Read;
use std::path::Path;

use openness_shared::{OpennessError, OrgId, Organization, Result, ValidationIssue};
use tracing::{info, instrument, warn};
use url::Url;

/// Cell values that mark the first row as a header.
const HEADER_WORDS: &[&str] = &["organisation", "organization", "name", "url"];

/// Parsed roster plus skipped or flagged rows.
#[derive(Debug, Clone, Default)]
pub struct LoadedRoster {
    pub organizations: Vec<Organization>,
    pub issues: Vec<ValidationIssue>,
}

/// Read a roster file with the given single-byte delimiter.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_roster(path: &Path, delimiter: u8) -> Result<LoadedRoster> {
    let file = std::fs::File::open(path).map_err(|e| OpennessError::io(path, e))?;
    let roster = parse_roster(file, delimiter)?;
    info!(
        organizations = roster.organizations.len(),
        issues = roster.issues.len(),
        "roster loaded"
    );
    Ok(roster)
}

/// Parse roster rows from any reader.
pub fn parse_roster<R: Read>(reader: R, delimiter: u8) -> Result<LoadedRoster> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut roster = LoadedRoster::default();
    let mut first = true;

    for (index, record) in csv_reader.records().enumerate() {
        let line = index + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(line);
                roster
                    .issues
                    .push(ValidationIssue::new(format!("row {line}"), format!("unreadable: {e}")));
                first = false;
                continue;
            }
        };
        let line = record.position().map(|p| p.line() as usize).unwrap_or(line);

        let cell = |i: usize| {
            record
                .get(i)
                .map(|c| c.trim_start_matches('\u{feff}').trim())
                .unwrap_or("")
        };

        if std::mem::take(&mut first) && is_header(&record) {
            continue;
        }
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let (name, url) = (cell(0), cell(1));
        if name.is_empty() || url.is_empty() {
            let missing = if name.is_empty() { "name" } else { "URL" };
            roster.issues.push(ValidationIssue::new(
                format!("row {line}"),
                format!("missing {missing}, row skipped"),
            ));
            continue;
        }

        let url_issue = check_url(url);
        if let Some(problem) = &url_issue {
            roster.issues.push(ValidationIssue::new(
                format!("row {line}"),
                format!("{name}: {problem}"),
            ));
        }

        roster.organizations.push(Organization {
            id: OrgId(roster.organizations.len()),
            name: name.to_string(),
            base_url: url.to_string(),
            url_issue,
        });
    }

    for issue in &roster.issues {
        warn!(%issue, "roster row flagged");
    }

    Ok(roster)
}

fn is_header(record: &csv::StringRecord) -> bool {
    record.iter().any(|cell| {
        let cell = cell.trim_start_matches('\u{feff}').trim().to_lowercase();
        HEADER_WORDS.contains(&cell.as_str())
    })
}

/// Describe what is wrong with a roster URL, if anything.
fn check_url(raw: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Some(format!("URL '{raw}' does not start with http:// or https://"));
    }
    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => None,
        Ok(_) => Some(format!("URL '{raw}' has no host")),
        Err(e) => Some(format!("URL '{raw}' does not parse: {e}")),
    }
}
