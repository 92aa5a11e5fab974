use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};
use tracing::{debug, instrument};

use crate::error::{Result, ToolError};
use crate::model::{BranchPath, Dataset, SeriesRow, Year, parse_year};
use crate::reconcile::{ReconciliationKey, ReferenceTotals};

pub const BRANCH_PATH_COLUMN: &str = "Branch Path";
pub const VARIABLE_COLUMN: &str = "Variable";
pub const SCENARIO_COLUMN: &str = "Scenario";
pub const REGION_COLUMN: &str = "Region";

/// Export sheets carry their header either on the first row or below two
/// title rows.
const HEADER_ROW_CANDIDATES: [usize; 2] = [0, 2];

/// Reads an export table: branch path, variable, optional scenario and region,
/// any other attribute columns, and one column per four-digit year.
#[instrument(level = "info", skip_all, fields(path = %path.display(), sheet = %sheet))]
pub fn read_dataset(path: &Path, sheet: &str) -> Result<Dataset> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = read_required_sheet(&mut workbook, sheet)?;
    let dataset = parse_dataset(&range)?;
    debug!(
        rows = dataset.len(),
        years = dataset.years().len(),
        "export table read"
    );
    Ok(dataset)
}

/// Reads reference totals keyed by the given columns from the first-row
/// header table of `sheet`.
#[instrument(level = "info", skip_all, fields(path = %path.display(), sheet = %sheet))]
pub fn read_reference_totals(
    path: &Path,
    sheet: &str,
    key_columns: &[String],
    value_column: &str,
) -> Result<ReferenceTotals> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = read_required_sheet(&mut workbook, sheet)?;
    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(first_row) => first_row
            .iter()
            .map(|cell| cell_to_string(Some(cell)).trim().to_string())
            .collect(),
        None => Vec::new(),
    };

    let key_indices = key_columns
        .iter()
        .map(|column| column_index(&headers, column, sheet))
        .collect::<Result<Vec<_>>>()?;
    let value_index = column_index(&headers, value_column, sheet)?;

    let mut totals = ReferenceTotals::new();
    for row in rows {
        let labels: Vec<String> = key_indices
            .iter()
            .map(|idx| cell_to_string(row.get(*idx)).trim().to_string())
            .collect();
        if labels.iter().all(String::is_empty) {
            continue;
        }
        let key = ReconciliationKey(labels);
        let value = cell_to_number(row.get(value_index)).ok_or_else(|| {
            ToolError::InvalidWorkbook(format!(
                "invalid total '{}' for key '{key}' in sheet '{sheet}'",
                cell_to_string(row.get(value_index))
            ))
        })?;
        totals.insert(key, value);
    }
    Ok(totals)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<calamine::Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| ToolError::InvalidWorkbook(format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(ToolError::from)?;
    Ok(range)
}

fn column_index(headers: &[String], column: &str, sheet: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header == column)
        .ok_or_else(|| {
            ToolError::InvalidWorkbook(format!("column '{column}' not found in sheet '{sheet}'"))
        })
}

struct ColumnLayout {
    path: usize,
    variable: Option<usize>,
    scenario: Option<usize>,
    region: Option<usize>,
    attributes: Vec<(usize, String)>,
    years: Vec<(usize, Year)>,
}

impl ColumnLayout {
    fn from_headers(headers: &[String]) -> Option<Self> {
        let path = headers.iter().position(|h| h == BRANCH_PATH_COLUMN)?;
        let mut layout = ColumnLayout {
            path,
            variable: None,
            scenario: None,
            region: None,
            attributes: Vec::new(),
            years: Vec::new(),
        };

        for (idx, header) in headers.iter().enumerate() {
            if idx == path || header.is_empty() {
                continue;
            }
            match header.as_str() {
                VARIABLE_COLUMN => layout.variable = Some(idx),
                SCENARIO_COLUMN => layout.scenario = Some(idx),
                REGION_COLUMN => layout.region = Some(idx),
                other => match parse_year(other) {
                    Some(year) => layout.years.push((idx, year)),
                    None => layout.attributes.push((idx, other.to_string())),
                },
            }
        }
        Some(layout)
    }
}

fn parse_dataset(range: &calamine::Range<DataType>) -> Result<Dataset> {
    let rows: Vec<&[DataType]> = range.rows().collect();

    let (header_idx, layout) = HEADER_ROW_CANDIDATES
        .iter()
        .find_map(|idx| {
            let headers: Vec<String> = rows
                .get(*idx)?
                .iter()
                .map(|cell| cell_to_string(Some(cell)).trim().to_string())
                .collect();
            ColumnLayout::from_headers(&headers).map(|layout| (*idx, layout))
        })
        .ok_or_else(|| {
            ToolError::InvalidWorkbook(format!("column '{BRANCH_PATH_COLUMN}' not found"))
        })?;

    let mut dataset = Dataset::new();
    dataset.attribute_columns = layout
        .attributes
        .iter()
        .map(|(_, name)| name.clone())
        .collect();
    for (_, year) in &layout.years {
        dataset.add_year(*year);
    }

    for row in rows.iter().skip(header_idx + 1) {
        let raw_path = cell_to_string(row.get(layout.path));
        if raw_path.trim().is_empty() {
            continue;
        }

        let variable = layout
            .variable
            .map(|idx| cell_to_string(row.get(idx)).trim().to_string())
            .unwrap_or_default();
        let mut series = SeriesRow::new(BranchPath::parse(&raw_path), variable);
        series.scenario = layout
            .scenario
            .and_then(|idx| normalize_optional(cell_to_string(row.get(idx))));
        series.region = layout
            .region
            .and_then(|idx| normalize_optional(cell_to_string(row.get(idx))));

        for (idx, name) in &layout.attributes {
            let value = cell_to_string(row.get(*idx));
            if !value.trim().is_empty() {
                series.attributes.insert(name.clone(), value);
            }
        }
        for (idx, year) in &layout.years {
            if let Some(value) = cell_to_number(row.get(*idx)) {
                series.values.insert(*year, value);
            }
        }
        dataset.push(series);
    }

    Ok(dataset)
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn cell_to_number(cell: Option<&DataType>) -> Option<f64> {
    match cell {
        Some(DataType::Float(value)) => Some(*value),
        Some(DataType::Int(value)) => Some(*value as f64),
        Some(DataType::String(value)) => value.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
