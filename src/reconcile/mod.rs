//! Matches modelled totals against reference totals by proportionally scaling
//! the input variables they are computed from.
//!
//! A rule's total is the product of its input variables summed over matching
//! rows. The generic adjustment multiplies every input by the scale factor,
//! which only reproduces the reference total when a rule has a single input.
//! Sectors with richer structures supply their own total and adjustment
//! functions through [`Hooks`].

pub mod audit;
pub mod rules;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ToolError};
use crate::model::{BranchPath, Dataset, Year};

pub use rules::{
    BranchRule, ReconciliationKey, ReferenceTotals, RuleSet, Strategies, build_rules_from_mapping,
    lookup_strategy, unmapped_branches,
};

/// Values of one variable across its matching rows. Blank cells are NaN.
pub type Series = Vec<f64>;

/// Fetches the series to combine for a branch: `(dataset, year, path, variables)`.
pub type InputSeriesProvider<'a> =
    dyn Fn(&Dataset, Year, &BranchPath, &[String]) -> Result<Vec<Series>> + 'a;

/// Combines fetched series into the series that is summed.
pub type CombinationFn<'a> = dyn Fn(&[Series]) -> Series + 'a;

/// Replaces the whole per-rule total calculation.
pub type TotalFn<'a> = dyn Fn(&Dataset, Year, &BranchRule, &Strategies) -> Result<f64> + 'a;

/// Applies a scale factor to a rule's inputs over the given years.
pub type AdjustmentFn<'a> =
    dyn Fn(&mut Dataset, Year, &BranchRule, f64, &Strategies, &[Year]) -> Result<()> + 'a;

/// Caller overrides for the calculation and adjustment steps. Hooks may
/// borrow caller state for `'a`.
#[derive(Clone, Copy, Default)]
pub struct Hooks<'a> {
    pub input_provider: Option<&'a InputSeriesProvider<'a>>,
    pub combination: Option<&'a CombinationFn<'a>>,
    pub total: Option<&'a TotalFn<'a>>,
    pub adjustment: Option<&'a AdjustmentFn<'a>>,
}

#[derive(Clone, Default)]
pub struct ReconcileOptions<'a> {
    /// Also scale every year column after the base year.
    pub extend_future: bool,
    /// Also scale year columns before the base year. Ignored unless
    /// `extend_future` is set.
    pub extend_past: bool,
    /// Abort on the first rule whose total cannot be computed.
    pub strict: bool,
    pub strategies: Strategies,
    pub hooks: Hooks<'a>,
}

/// One line of the reconciliation summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub key: ReconciliationKey,
    pub modeled_total: f64,
    pub reference_total: f64,
    pub scale_factor: f64,
    pub adjusted_paths: Vec<BranchPath>,
    /// Rules that were skipped or could not be adjusted, with the reason.
    pub issues: Vec<String>,
}

impl SummaryRow {
    pub fn adjusted_label(&self) -> String {
        self.adjusted_paths
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Working copy with the scaled inputs.
    pub adjusted: Dataset,
    pub summary: Vec<SummaryRow>,
}

/// Default input fetch: one series per variable, from rows matching the branch
/// path and variable exactly.
pub fn default_input_series(
    dataset: &Dataset,
    year: Year,
    path: &BranchPath,
    variables: &[String],
) -> Result<Vec<Series>> {
    if !dataset.has_year(year) {
        return Err(ToolError::MissingData {
            path: path.to_string(),
            variable: variables.join(", "),
            year: year.to_string(),
        });
    }

    variables
        .iter()
        .map(|variable| {
            let series: Series = dataset
                .matching(path, variable)
                .map(|row| row.value(year).unwrap_or(f64::NAN))
                .collect();
            if series.is_empty() {
                return Err(ToolError::MissingData {
                    path: path.to_string(),
                    variable: variable.clone(),
                    year: year.to_string(),
                });
            }
            Ok(series)
        })
        .collect()
}

/// Element-wise product of the series, truncated to the shortest one.
pub fn multiply_series(series: &[Series]) -> Series {
    let Some((first, rest)) = series.split_first() else {
        return Vec::new();
    };
    let mut combined = first.clone();
    for additional in rest {
        combined.truncate(additional.len());
        for (value, factor) in combined.iter_mut().zip(additional) {
            *value *= factor;
        }
    }
    combined
}

/// Total contributed by one rule in `year`.
pub fn rule_total(
    dataset: &Dataset,
    year: Year,
    rule: &BranchRule,
    strategies: &Strategies,
    hooks: &Hooks<'_>,
) -> Result<f64> {
    if let Some(total) = hooks.total {
        return total(dataset, year, rule, strategies);
    }

    let variables = rule.input_variables(strategies)?;
    let path = rule.path();
    let series = match hooks.input_provider {
        Some(provider) => provider(dataset, year, &path, variables)?,
        None => default_input_series(dataset, year, &path, variables)?,
    };
    if series.is_empty() {
        return Ok(0.0);
    }

    let combined = match hooks.combination {
        Some(combine) => combine(&series),
        None => multiply_series(&series),
    };
    Ok(combined.iter().filter(|value| !value.is_nan()).sum())
}

/// `reference / modeled`, or `1.0` when nothing was modelled.
pub fn scale_factor(modeled: f64, reference: f64) -> f64 {
    if modeled == 0.0 {
        1.0
    } else {
        reference / modeled
    }
}

/// Year columns the scale factor is applied to.
///
/// Only the base year unless `extend_future` is set, in which case every
/// available year from the base year on is included, plus earlier years when
/// `extend_past` is also set.
pub fn adjustment_years(
    available: &[Year],
    base_year: Year,
    extend_future: bool,
    extend_past: bool,
) -> Vec<Year> {
    if !extend_future {
        return vec![base_year];
    }
    let mut years: Vec<Year> = available
        .iter()
        .copied()
        .filter(|year| extend_past || *year >= base_year)
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

/// Generic adjustment: multiplies every input variable of the rule by
/// `scale` in each of `years`. Rows or years that are absent are skipped.
pub fn apply_proportional_adjustment(
    dataset: &mut Dataset,
    base_year: Year,
    rule: &BranchRule,
    scale: f64,
    strategies: &Strategies,
    years: &[Year],
) -> Result<()> {
    let base = [base_year];
    let years = if years.is_empty() { &base[..] } else { years };
    let variables = rule.input_variables(strategies)?;
    let path = rule.path();

    for variable in variables {
        for row in dataset.matching_mut(&path, variable) {
            for year in years {
                if let Some(value) = row.values.get_mut(year) {
                    *value *= scale;
                }
            }
        }
    }
    Ok(())
}

fn validate(tolerance: f64, options: &ReconcileOptions<'_>) -> Result<()> {
    if options.hooks.total.is_some() && options.hooks.adjustment.is_none() {
        return Err(ToolError::Configuration(
            "a custom total function requires a matching custom adjustment function".into(),
        ));
    }
    if tolerance.is_nan() || tolerance < 0.0 {
        return Err(ToolError::Configuration(format!(
            "tolerance must be a non-negative number, got {tolerance}"
        )));
    }
    Ok(())
}

/// Scales the inputs of each key's rules so the modelled total matches the
/// reference total. `dataset` is never modified; the adjusted working copy is
/// returned with one summary row per key, in rule-set order.
#[instrument(
    level = "info",
    skip_all,
    fields(base_year = base_year, key_count = rules.len(), row_count = dataset.len())
)]
pub fn reconcile(
    dataset: &Dataset,
    base_year: Year,
    rules: &RuleSet,
    reference_totals: &ReferenceTotals,
    tolerance: f64,
    options: &ReconcileOptions<'_>,
) -> Result<Reconciliation> {
    validate(tolerance, options)?;

    let mut working = dataset.clone();
    let strategies = &options.strategies;
    let hooks = &options.hooks;
    let years = adjustment_years(
        &working.years(),
        base_year,
        options.extend_future,
        options.extend_past,
    );
    debug!(?years, "adjustment years selected");

    let mut summary = Vec::with_capacity(rules.len());
    for (key, key_rules) in rules.iter() {
        let mut modeled_total = 0.0;
        let mut issues = Vec::new();

        for rule in key_rules {
            match rule_total(&working, base_year, rule, strategies, hooks) {
                Ok(total) => modeled_total += total,
                Err(error) if options.strict => return Err(error),
                Err(error) => {
                    warn!(%key, path = %rule.path(), %error, "rule contributes nothing");
                    issues.push(format!("{}: {error}", rule.path()));
                }
            }
        }

        let reference_total = match reference_totals.get(key) {
            Some(total) => *total,
            None => {
                warn!(%key, "no reference total; treating it as zero");
                0.0
            }
        };
        let scale = scale_factor(modeled_total, reference_total);

        let mut adjusted_paths = Vec::new();
        if (modeled_total - reference_total).abs() > tolerance && scale != 1.0 {
            for rule in key_rules {
                let applied = match hooks.adjustment {
                    Some(adjust) => adjust(&mut working, base_year, rule, scale, strategies, &years),
                    None => apply_proportional_adjustment(
                        &mut working,
                        base_year,
                        rule,
                        scale,
                        strategies,
                        &years,
                    ),
                };
                match applied {
                    Ok(()) => adjusted_paths.push(rule.path()),
                    Err(error) => {
                        warn!(%key, path = %rule.path(), %error, "adjustment failed");
                        issues.push(format!("{}: {error}", rule.path()));
                    }
                }
            }
        }

        debug!(%key, modeled_total, reference_total, scale, "key reconciled");
        summary.push(SummaryRow {
            key: key.clone(),
            modeled_total,
            reference_total,
            scale_factor: scale,
            adjusted_paths,
            issues,
        });
    }

    let adjusted_keys = summary
        .iter()
        .filter(|row| !row.adjusted_paths.is_empty())
        .count();
    info!(keys = summary.len(), adjusted_keys, "reconciliation complete");

    Ok(Reconciliation {
        adjusted: working,
        summary,
    })
}
