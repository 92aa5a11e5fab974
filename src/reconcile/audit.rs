use serde::Serialize;

use crate::error::{Result, ToolError};
use crate::model::{BranchPath, Dataset, Year};
use crate::reconcile::adjustment_years;

/// Changes at or below this magnitude are not reported.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 1e-9;

/// One changed cell between an original and an adjusted dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub path: BranchPath,
    pub variable: String,
    pub scenario: Option<String>,
    pub region: Option<String>,
    pub year: Year,
    pub original: f64,
    pub adjusted: f64,
    pub abs_change: f64,
    /// Change relative to the original value; `None` when it was zero.
    pub pct_change: Option<f64>,
}

/// Cell-level differences for `years`, largest change first.
pub fn diff(original: &Dataset, adjusted: &Dataset, years: &[Year]) -> Result<Vec<ChangeRecord>> {
    diff_with_threshold(original, adjusted, years, DEFAULT_CHANGE_THRESHOLD)
}

/// Like [`diff`] with an explicit reporting threshold.
///
/// Rows are compared by position, so `adjusted` must be a working copy of
/// `original`. Cells blank on either side are not compared.
pub fn diff_with_threshold(
    original: &Dataset,
    adjusted: &Dataset,
    years: &[Year],
    threshold: f64,
) -> Result<Vec<ChangeRecord>> {
    if original.len() != adjusted.len() {
        return Err(ToolError::Configuration(format!(
            "cannot diff datasets of {} and {} rows",
            original.len(),
            adjusted.len()
        )));
    }

    let mut changes = Vec::new();
    for year in years {
        if !original.has_year(*year) || !adjusted.has_year(*year) {
            continue;
        }
        for (before, after) in original.rows.iter().zip(&adjusted.rows) {
            let (Some(old), Some(new)) = (before.value(*year), after.value(*year)) else {
                continue;
            };
            let change = new - old;
            if change.abs() <= threshold {
                continue;
            }
            changes.push(ChangeRecord {
                path: before.path.clone(),
                variable: before.variable.clone(),
                scenario: before.scenario.clone(),
                region: before.region.clone(),
                year: *year,
                original: old,
                adjusted: new,
                abs_change: change,
                pct_change: (old != 0.0).then(|| change / old),
            });
        }
    }

    changes.sort_by(|lhs, rhs| rhs.abs_change.abs().total_cmp(&lhs.abs_change.abs()));
    Ok(changes)
}

/// Base-year changes and, when adjustments extended forward, changes in the
/// later years.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeTables {
    pub base_year: Vec<ChangeRecord>,
    pub later_years: Option<Vec<ChangeRecord>>,
}

pub fn change_tables(
    original: &Dataset,
    adjusted: &Dataset,
    base_year: Year,
    include_future: bool,
    threshold: f64,
) -> Result<ChangeTables> {
    let base = diff_with_threshold(original, adjusted, &[base_year], threshold)?;
    let later_years = if include_future {
        let years: Vec<Year> = adjustment_years(&adjusted.years(), base_year, true, false)
            .into_iter()
            .filter(|year| *year != base_year)
            .collect();
        Some(diff_with_threshold(original, adjusted, &years, threshold)?)
    } else {
        None
    };
    Ok(ChangeTables {
        base_year: base,
        later_years,
    })
}
