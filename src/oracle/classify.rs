// Pure classification of a restricted capture against the golden one.

use super::Capture;
use crate::error::AuthorizationDivergence;
use crate::protocol::ansi::{visible_text, ERROR_BANNER, ERROR_CLOSE, RESET};
use crate::protocol::messages::{unauthorized_marker, BAD_REQUEST};
use crate::protocol::table::{is_separator_line, split_cells};
use crate::protocol::transcript::Sentinel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceOutcome {
    /// Byte-identical output.
    Equivalent,
    /// Denied for the named principal.
    Forbidden(String),
    UnknownIndex,
    UnknownColumn(String),
    /// Same columns, a strict subsequence of the rows.
    RowFiltered,
    /// A strict subset of the columns; carries the hidden ones.
    ColumnFiltered(Vec<String>),
}

/// Who ran what, for divergence reports.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub principal: &'a str,
    pub query: &'a str,
}

impl RunContext<'_> {
    pub fn divergence(
        &self,
        position: usize,
        expected: Option<&str>,
        actual: Option<&str>,
        reason: &str,
    ) -> AuthorizationDivergence {
        AuthorizationDivergence {
            principal: self.principal.to_string(),
            query: self.query.to_string(),
            position,
            expected: expected.map(str::to_string),
            actual: actual.map(str::to_string),
            reason: reason.to_string(),
        }
    }
}

pub fn classify(
    golden: &Capture,
    restricted: &Capture,
    context: RunContext<'_>,
) -> Result<DivergenceOutcome, AuthorizationDivergence> {
    let expected = golden.lines();
    let actual = restricted.lines();

    if let Some(outcome) = designed_divergence(&actual, context)? {
        return Ok(outcome);
    }
    if expected == actual {
        return Ok(DivergenceOutcome::Equivalent);
    }

    let mismatch = first_mismatch(&expected, &actual);
    let diverged = |reason: &str| {
        context.divergence(
            mismatch,
            expected.get(mismatch).copied(),
            actual.get(mismatch).copied(),
            reason,
        )
    };

    let (Some(golden_table), Some(restricted_table)) = (Table::of(golden), Table::of(restricted)) else {
        return Err(diverged("transcript mismatch"));
    };

    if golden_table.header == restricted_table.header {
        return if restricted_table.rows.len() < golden_table.rows.len()
            && is_subsequence(&restricted_table.rows, &golden_table.rows)
        {
            Ok(DivergenceOutcome::RowFiltered)
        } else {
            Err(diverged("rows are not a filtered subset of the golden rows"))
        };
    }

    let Some(projection) = golden_table.projection(&restricted_table.header) else {
        return Err(diverged("header mismatch"));
    };
    if restricted_table.rows != projection {
        return Err(diverged("column-filtered rows differ from the golden projection"));
    }
    let hidden = golden_table
        .header
        .iter()
        .filter(|c| !restricted_table.header.contains(c))
        .cloned()
        .collect();
    Ok(DivergenceOutcome::ColumnFiltered(hidden))
}

/// Forbidden, unknown index and unknown column responses, by shape alone.
fn designed_divergence(
    actual: &[&str],
    context: RunContext<'_>,
) -> Result<Option<DivergenceOutcome>, AuthorizationDivergence> {
    let Some(first) = actual.first() else {
        return Ok(None);
    };

    if first.contains(&unauthorized_marker(context.principal)) {
        return match actual.get(1) {
            Some(next) if actual.len() == 2 && Sentinel::of(next).is_some() => {
                Ok(Some(DivergenceOutcome::Forbidden(context.principal.to_string())))
            }
            other => Err(context.divergence(
                1,
                Some(Sentinel::Blank.as_str()),
                other.copied(),
                "denial is not followed by the sentinel",
            )),
        };
    }

    if !first.starts_with(&format!("{}{}", ERROR_BANNER, BAD_REQUEST)) {
        return Ok(None);
    }
    let detail = actual.get(1).copied().unwrap_or_default();
    if detail.contains("Unknown index") {
        return Ok(Some(DivergenceOutcome::UnknownIndex));
    }
    if let Some(column) = unknown_column(detail) {
        return Ok(Some(DivergenceOutcome::UnknownColumn(column.to_string())));
    }
    Err(context.divergence(1, None, Some(detail), "unclassified bad request"))
}

/// Name in `Unknown column [name]` with the exact trailing formatting.
pub fn unknown_column(detail: &str) -> Option<&str> {
    let tail = format!("]{}]{}", ERROR_CLOSE, RESET);
    let start = detail.find("Unknown column [")? + "Unknown column [".len();
    detail.get(start..)?.strip_suffix(tail.as_str())
}

fn first_mismatch(expected: &[&str], actual: &[&str]) -> usize {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .unwrap_or_else(|| expected.len().min(actual.len()))
}

fn is_subsequence(needle: &[Vec<String>], haystack: &[Vec<String>]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|row| rest.any(|candidate| candidate == row))
}

/// Header and trimmed cells of every row across all pages.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn of(capture: &Capture) -> Option<Self> {
        let mut pages = capture.pages().iter();
        let first = pages.next()?;
        let body = first.body();
        if body.len() < 2 || !is_separator_line(&body[1]) {
            return None;
        }
        let header = split_cells(&visible_text(&body[0]));

        let mut rows = Vec::new();
        for (i, page) in capture.pages().iter().enumerate() {
            let mut lines = page.body();
            if i == 0 {
                lines = &lines[2..];
            }
            if page.is_continued() {
                lines = lines.split_last().map(|(_, rest)| rest)?;
            }
            rows.extend(lines.iter().map(|line| split_cells(line)));
        }
        Some(Self { header, rows })
    }

    /// Golden rows narrowed to `columns`, when those are an ordered subset.
    fn projection(&self, columns: &[String]) -> Option<Vec<Vec<String>>> {
        if columns.len() >= self.header.len() {
            return None;
        }
        let mut indices = Vec::with_capacity(columns.len());
        let mut from = 0;
        for column in columns {
            let offset = self.header[from..].iter().position(|c| c == column)?;
            indices.push(from + offset);
            from += offset + 1;
        }
        Some(
            self.rows
                .iter()
                .map(|row| indices.iter().map(|i| row.get(*i).cloned().unwrap_or_default()).collect())
                .collect(),
        )
    }
}
