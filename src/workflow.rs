use std::path::Path;

use tracing::{info, instrument};

use crate::branches::{BatchReport, DefaultKinds, FailureMode, KindOverrides, MemoryHierarchy};
use crate::config::ReconcileConfig;
use crate::error::{Result, ToolError};
use crate::io::{excel_read, excel_write};
use crate::model::BranchPath;
use crate::reconcile::audit::{self, DEFAULT_CHANGE_THRESHOLD};
use crate::reconcile::{self, Reconciliation};
use crate::report::build_reconciliation_workbook;

/// Settings for creating the branches listed in an export sheet.
#[derive(Debug, Clone, Default)]
pub struct BranchRunSettings {
    pub sheet: String,
    pub scenario: Option<String>,
    pub region: Option<String>,
    pub defaults: DefaultKinds,
    pub overrides: KindOverrides,
    pub mode: FailureMode,
}

/// Target branch paths listed in an export sheet, after scope filtering.
pub fn branch_paths_from_workbook(
    input: &Path,
    sheet: &str,
    scenario: Option<&str>,
    region: Option<&str>,
) -> Result<Vec<BranchPath>> {
    let mut dataset = excel_read::read_dataset(input, sheet)?;
    dataset.retain_scope(scenario, region);
    Ok(dataset.branch_paths())
}

/// Creates the branches listed in `input` inside the hierarchy snapshot at
/// `hierarchy_path`, writing the updated snapshot to `output`.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), hierarchy = %hierarchy_path.display(), output = %output.display())
)]
pub fn create_branches_from_workbook(
    input: &Path,
    hierarchy_path: &Path,
    output: &Path,
    settings: &BranchRunSettings,
) -> Result<BatchReport> {
    if !hierarchy_path.exists() {
        return Err(ToolError::MissingInput(hierarchy_path.to_path_buf()));
    }
    let paths = branch_paths_from_workbook(
        input,
        &settings.sheet,
        settings.scenario.as_deref(),
        settings.region.as_deref(),
    )?;
    info!(
        path_count = paths.len(),
        override_count = settings.overrides.len(),
        "read branch paths from workbook"
    );

    let mut hierarchy = MemoryHierarchy::load(hierarchy_path)?;
    let report = crate::branches::create_branches(
        &mut hierarchy,
        &paths,
        &settings.overrides,
        settings.defaults,
        settings.mode,
    )?;
    hierarchy.save(output)?;
    Ok(report)
}

/// Reconciles the export table in `input` against the configured totals and
/// writes the adjusted table, summary and change sheets to `output`.
///
/// Relative reference workbook paths are resolved against `config_dir`.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), output = %output.display(), base_year = config.base_year)
)]
pub fn reconcile_workbook(
    input: &Path,
    config: &ReconcileConfig,
    config_dir: &Path,
    output: &Path,
) -> Result<Reconciliation> {
    let mut dataset = excel_read::read_dataset(input, &config.sheet)?;
    dataset.retain_scope(config.scenario.as_deref(), config.region.as_deref());
    info!(rows = dataset.len(), "read export table");

    let unmapped = config.unmapped_branches();
    if !unmapped.is_empty() {
        info!(unmapped = unmapped.len(), "known branches without a reconciliation key");
    }

    let mut totals = config.inline_totals();
    if let Some(source) = &config.reference_workbook {
        let path = config_dir.join(&source.path);
        if !path.exists() {
            return Err(ToolError::MissingInput(path));
        }
        let from_sheet = excel_read::read_reference_totals(
            &path,
            &source.sheet,
            &source.key_columns,
            &source.value_column,
        )?;
        info!(totals = from_sheet.len(), "read reference totals from workbook");
        totals.extend(from_sheet);
    }

    let result = reconcile::reconcile(
        &dataset,
        config.base_year,
        &config.rule_set(),
        &totals,
        config.tolerance,
        &config.options(),
    )?;

    let changes = audit::change_tables(
        &dataset,
        &result.adjusted,
        config.base_year,
        config.extend_future,
        DEFAULT_CHANGE_THRESHOLD,
    )?;
    let workbook =
        build_reconciliation_workbook(&config.sheet, &result.adjusted, &result.summary, &changes);
    excel_write::write_workbook(output, &workbook)?;
    Ok(result)
}
