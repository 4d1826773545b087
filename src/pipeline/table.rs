//! Result table extraction: find the pipe table in a free-form answer.
//!
//! The service is asked for a single GFM pipe table followed by prose, but
//! nothing enforces it. Extraction is a best-effort pass over lines:
//!
//! 1. A line qualifies if it contains `|`, is not a separator row
//!    (`| --- | :---: |`), and has at least one non-blank cell.
//! 2. The first qualifying line is the header; every later one is a row.
//! 3. Rows wider or narrower than the header are truncated or padded with
//!    empty cells so every record has exactly `headers.len()` cells.
//!
//! No qualifying line at all means no table, which is `None` rather than an
//! error. Formatting drift is logged and tolerated, never fatal.

use crate::error::AuditError;
use crate::model::{AuditResult, AuditTable};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static RE_SEPARATOR_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:?-+:?$").unwrap());

/// Extract the pipe table from `result`, if there is one.
pub fn extract_table(result: &AuditResult) -> Option<AuditTable> {
    let mut qualifying = result
        .as_str()
        .lines()
        .filter(|line| line.contains('|'))
        .map(split_cells)
        .filter(|cells| !is_separator_row(cells) && cells.iter().any(|c| !c.is_empty()));

    let headers = qualifying.next()?;
    let width = headers.len();
    let mut rows = Vec::new();
    let mut reshaped_rows = 0;

    for mut cells in qualifying {
        if cells.len() != width {
            debug!(
                "Row {} has {} cells, header has {}",
                rows.len() + 1,
                cells.len(),
                width
            );
            cells.resize(width, String::new());
            reshaped_rows += 1;
        }
        rows.push(cells);
    }

    if reshaped_rows > 0 {
        warn!(
            "{} of {} table row(s) did not match the header width and were reshaped",
            reshaped_rows,
            rows.len()
        );
    }

    Some(AuditTable {
        headers,
        rows,
        reshaped_rows,
    })
}

/// Encode a table as CSV: header record first, one record per row.
pub fn table_to_csv(table: &AuditTable) -> Result<Vec<u8>, AuditError> {
    let csv_err = |e: csv::Error| AuditError::RenderFailed {
        artifact: "CSV export",
        detail: e.to_string(),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.headers).map_err(csv_err)?;
    for row in &table.rows {
        writer.write_record(row).map_err(csv_err)?;
    }
    writer.into_inner().map_err(|e| AuditError::RenderFailed {
        artifact: "CSV export",
        detail: e.to_string(),
    })
}

/// Split a table line into trimmed cells.
///
/// One bounding `|` on each side is dropped. `\|` is a literal pipe inside
/// a cell.
fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = match inner.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => inner,
    };

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| RE_SEPARATOR_CELL.is_match(c))
}
