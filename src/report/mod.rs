use std::collections::HashSet;

use crate::io::excel_read::{BRANCH_PATH_COLUMN, REGION_COLUMN, SCENARIO_COLUMN, VARIABLE_COLUMN};
use crate::model::Dataset;
use crate::reconcile::SummaryRow;
use crate::reconcile::audit::{ChangeRecord, ChangeTables};

pub const SUMMARY_SHEET: &str = "Summary";
pub const BASE_YEAR_CHANGES_SHEET: &str = "Base year changes";
pub const LATER_YEAR_CHANGES_SHEET: &str = "Later year changes";

/// Excel sheet names are limited to 31 characters.
const MAX_SHEET_NAME: usize = 31;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Empty)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }
}

/// A table that will be materialised as an Excel sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Represents all tables required to materialise the Excel workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookData {
    pub tables: Vec<SheetTable>,
}

/// Export table layout: path, variable, scenario, region, attributes, years.
pub fn dataset_table(sheet_name: &str, dataset: &Dataset) -> SheetTable {
    let years = dataset.years();
    let mut columns: Vec<String> = vec![
        BRANCH_PATH_COLUMN.to_string(),
        VARIABLE_COLUMN.to_string(),
        SCENARIO_COLUMN.to_string(),
        REGION_COLUMN.to_string(),
    ];
    columns.extend(dataset.attribute_columns.iter().cloned());
    columns.extend(years.iter().map(ToString::to_string));

    let rows = dataset
        .rows
        .iter()
        .map(|row| {
            let mut cells: Vec<Cell> = vec![
                row.path.to_string().into(),
                row.variable.clone().into(),
                row.scenario.clone().into(),
                row.region.clone().into(),
            ];
            cells.extend(
                dataset
                    .attribute_columns
                    .iter()
                    .map(|column| Cell::from(row.attributes.get(column).cloned())),
            );
            cells.extend(years.iter().map(|year| Cell::from(row.value(*year))));
            cells
        })
        .collect();

    SheetTable {
        sheet_name: sheet_name.to_string(),
        columns,
        rows,
    }
}

pub fn summary_table(summary: &[SummaryRow]) -> SheetTable {
    let rows = summary
        .iter()
        .map(|row| {
            vec![
                row.key.to_string().into(),
                row.modeled_total.into(),
                row.reference_total.into(),
                row.scale_factor.into(),
                row.adjusted_label().into(),
                row.issues.join("; ").into(),
            ]
        })
        .collect();

    SheetTable {
        sheet_name: SUMMARY_SHEET.to_string(),
        columns: [
            "Key",
            "Modeled Total",
            "Reference Total",
            "Scale Factor",
            "Adjusted Branches",
            "Issues",
        ]
        .map(String::from)
        .to_vec(),
        rows,
    }
}

pub fn changes_table(sheet_name: &str, changes: &[ChangeRecord]) -> SheetTable {
    let rows = changes
        .iter()
        .map(|change| {
            vec![
                change.path.to_string().into(),
                change.variable.clone().into(),
                change.scenario.clone().into(),
                change.region.clone().into(),
                f64::from(change.year).into(),
                change.original.into(),
                change.adjusted.into(),
                change.abs_change.into(),
                change.pct_change.into(),
            ]
        })
        .collect();

    SheetTable {
        sheet_name: sheet_name.to_string(),
        columns: [
            BRANCH_PATH_COLUMN,
            VARIABLE_COLUMN,
            SCENARIO_COLUMN,
            REGION_COLUMN,
            "Year",
            "Original",
            "Adjusted",
            "Abs Change",
            "Pct Change",
        ]
        .map(String::from)
        .to_vec(),
        rows,
    }
}

/// Adjusted export table followed by the summary and change sheets.
pub fn build_reconciliation_workbook(
    data_sheet: &str,
    adjusted: &Dataset,
    summary: &[SummaryRow],
    changes: &ChangeTables,
) -> WorkbookData {
    let mut sheet_names = SheetNameRegistry::default();

    let mut tables = vec![
        dataset_table(data_sheet, adjusted),
        summary_table(summary),
        changes_table(BASE_YEAR_CHANGES_SHEET, &changes.base_year),
    ];
    if let Some(later) = &changes.later_years {
        tables.push(changes_table(LATER_YEAR_CHANGES_SHEET, later));
    }

    for table in &mut tables {
        table.sheet_name = sheet_names.assign(&table.sheet_name);
    }
    WorkbookData { tables }
}

#[derive(Debug, Default)]
struct SheetNameRegistry {
    used: HashSet<String>,
}

impl SheetNameRegistry {
    fn assign(&mut self, raw: &str) -> String {
        let base = sanitize_sheet_name(raw);
        if self.used.insert(base.to_lowercase()) {
            return base;
        }

        let mut counter = 1;
        loop {
            let suffix = format!("_{counter}");
            let max_len = MAX_SHEET_NAME - suffix.len();
            let prefix: String = base.chars().take(max_len).collect();
            let candidate = format!("{prefix}{suffix}");
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn sanitize_sheet_name(raw: &str) -> String {
    let invalid = [':', '\\', '/', '?', '*', '[', ']', '\'', '"'];
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if invalid.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        return "Sheet".to_string();
    }
    sanitized.chars().take(MAX_SHEET_NAME).collect()
}
