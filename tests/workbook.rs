use std::fs;

use calamine::{Reader, Xlsx, open_workbook};
use leap_tools::branches::{DefaultKinds, FailureMode, MemoryHierarchy};
use leap_tools::config::ReconcileConfig;
use leap_tools::io::{excel_read, excel_write};
use leap_tools::model::{BranchPath, Dataset, NodeKind, SeriesRow, Year};
use leap_tools::reconcile::ReconciliationKey;
use leap_tools::report::{WorkbookData, dataset_table};
use leap_tools::workflow::{self, BranchRunSettings};
use rust_xlsxwriter::Workbook;
use tempfile::tempdir;

fn row(path: &str, variable: &str, values: &[(Year, f64)]) -> SeriesRow {
    values
        .iter()
        .fold(SeriesRow::new(BranchPath::parse(path), variable), |row, (year, value)| {
            row.with_value(*year, *value)
        })
}

fn export_dataset() -> Dataset {
    let mut dataset = Dataset::new();
    let mut gasoline = row(
        "Demand\\Road\\Gasoline",
        "Activity Level",
        &[(2021, 9.0), (2022, 10.0), (2023, 12.0)],
    );
    gasoline.scenario = Some("Reference".to_string());
    gasoline.region = Some("Economy".to_string());
    gasoline
        .attributes
        .insert("Units".to_string(), "vehicle-km".to_string());
    dataset.push(gasoline);

    let mut electric = row(
        "Demand\\Rail\\Electric",
        "Final Energy",
        &[(2021, 48.0), (2022, 50.0)],
    );
    electric.scenario = Some("Reference".to_string());
    electric.region = Some("Economy".to_string());
    dataset.push(electric);
    dataset
}

fn write_export(path: &std::path::Path, dataset: &Dataset) {
    let workbook = WorkbookData {
        tables: vec![dataset_table("LEAP", dataset)],
    };
    excel_write::write_workbook(path, &workbook).expect("Excel written");
}

#[test]
fn export_table_survives_a_write_and_read() {
    let dataset = export_dataset();
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("export.xlsx");
    write_export(&xlsx_path, &dataset);

    let restored = excel_read::read_dataset(&xlsx_path, "LEAP").expect("Excel read");
    assert_eq!(restored, dataset);
    assert_eq!(restored.rows[1].value(2023), None);
}

#[test]
fn header_below_title_rows_is_detected() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("titled.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("LEAP").expect("sheet named");
    sheet
        .write_string(0, 0, "Transport inputs")
        .expect("title written");
    for (col, header) in ["Branch Path", "Variable", "2022", "2023.0"].iter().enumerate() {
        sheet
            .write_string(2, col as u16, *header)
            .expect("header written");
    }
    sheet
        .write_string(3, 0, "Demand\\Road\\Gasoline")
        .expect("path written");
    sheet
        .write_string(3, 1, "Activity Level")
        .expect("variable written");
    sheet.write_number(3, 2, 10.0).expect("value written");
    sheet.write_string(3, 3, "12.5").expect("value written");
    workbook.save(&xlsx_path).expect("workbook saved");

    let dataset = excel_read::read_dataset(&xlsx_path, "LEAP").expect("Excel read");
    assert_eq!(dataset.years(), vec![2022, 2023]);
    assert_eq!(dataset.len(), 1);
    let series = &dataset.rows[0];
    assert_eq!(series.path, BranchPath::parse("Demand\\Road\\Gasoline"));
    assert_eq!(series.value(2022), Some(10.0));
    assert_eq!(series.value(2023), Some(12.5));
}

#[test]
fn sheet_without_branch_paths_is_rejected() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("other.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("LEAP").expect("sheet named");
    sheet.write_string(0, 0, "Something").expect("cell written");
    workbook.save(&xlsx_path).expect("workbook saved");

    assert!(excel_read::read_dataset(&xlsx_path, "LEAP").is_err());
    assert!(excel_read::read_dataset(&xlsx_path, "Missing").is_err());
}

#[test]
fn reference_totals_are_read_by_key_columns() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("totals.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Totals").expect("sheet named");
    for (col, header) in ["Sector", "Fuel", "Value"].iter().enumerate() {
        sheet
            .write_string(0, col as u16, *header)
            .expect("header written");
    }
    sheet.write_string(1, 0, "15_03_rail").expect("cell written");
    sheet.write_string(1, 1, "17_electricity").expect("cell written");
    sheet.write_number(1, 2, 75.0).expect("cell written");
    sheet.write_string(2, 0, "15_02_road").expect("cell written");
    sheet.write_string(2, 1, "07_01_motor_gasoline").expect("cell written");
    sheet.write_number(2, 2, 120.0).expect("cell written");
    workbook.save(&xlsx_path).expect("workbook saved");

    let totals = excel_read::read_reference_totals(
        &xlsx_path,
        "Totals",
        &["Sector".to_string(), "Fuel".to_string()],
        "Value",
    )
    .expect("totals read");
    assert_eq!(totals.len(), 2);
    assert_eq!(
        totals.get(&ReconciliationKey::new(["15_03_rail", "17_electricity"])),
        Some(&75.0)
    );
}

#[test]
fn reconcile_workbook_writes_adjusted_summary_and_changes() {
    let temp_dir = tempdir().expect("temporary directory");
    let input = temp_dir.path().join("export.xlsx");
    let output = temp_dir.path().join("reconciled.xlsx");
    write_export(&input, &export_dataset());

    let config = ReconcileConfig::from_toml(
        r#"
base_year = 2022
scenario = "Reference"

[[rules]]
key = ["15_03_rail", "17_electricity"]
branches = [{ branch = ["Rail", "Electric"], input_variables = ["Final Energy"] }]

[[reference_totals]]
key = ["15_03_rail", "17_electricity"]
value = 75.0
"#,
    )
    .expect("config parsed");

    let result = workflow::reconcile_workbook(&input, &config, temp_dir.path(), &output)
        .expect("reconciliation written");
    assert_eq!(result.summary.len(), 1);
    assert_eq!(result.summary[0].scale_factor, 1.5);

    let workbook: Xlsx<_> = open_workbook(&output).expect("output opened");
    assert_eq!(
        workbook.sheet_names().to_vec(),
        vec![
            "LEAP".to_string(),
            "Summary".to_string(),
            "Base year changes".to_string(),
        ]
    );

    let adjusted = excel_read::read_dataset(&output, "LEAP").expect("adjusted read");
    let electric = adjusted
        .rows
        .iter()
        .find(|row| row.variable == "Final Energy")
        .expect("electric row");
    assert_eq!(electric.value(2022), Some(75.0));
    assert_eq!(electric.value(2021), Some(48.0));
}

#[test]
fn create_branches_from_workbook_updates_the_snapshot() {
    let temp_dir = tempdir().expect("temporary directory");
    let input = temp_dir.path().join("export.xlsx");
    let snapshot = temp_dir.path().join("hierarchy.json");
    let updated = temp_dir.path().join("hierarchy-updated.json");

    let mut dataset = export_dataset();
    dataset.push(row("Demand\\Road\\Diesel", "Activity Level", &[(2022, 4.0)]));
    write_export(&input, &dataset);
    MemoryHierarchy::with_roots(&["Demand", "Demand\\Rail\\Electric"])
        .save(&snapshot)
        .expect("snapshot saved");

    let settings = BranchRunSettings {
        sheet: "LEAP".to_string(),
        defaults: DefaultKinds::DEMAND,
        mode: FailureMode::Strict,
        ..BranchRunSettings::default()
    };
    let report = workflow::create_branches_from_workbook(&input, &snapshot, &updated, &settings)
        .expect("branches created");

    assert_eq!(
        report.created,
        vec![
            BranchPath::parse("Demand\\Road\\Gasoline"),
            BranchPath::parse("Demand\\Road\\Diesel"),
        ]
    );
    assert_eq!(
        report.skipped,
        vec![BranchPath::parse("Demand\\Rail\\Electric")]
    );
    assert!(report.failed.is_empty());

    let hierarchy = MemoryHierarchy::load(&updated).expect("snapshot loaded");
    assert_eq!(
        hierarchy.kind_of(&BranchPath::parse("Demand\\Road")),
        Some(NodeKind::Category)
    );
    assert_eq!(
        hierarchy.kind_of(&BranchPath::parse("Demand\\Road\\Diesel")),
        Some(NodeKind::Technology)
    );

    let untouched = fs::read_to_string(&snapshot).expect("original snapshot");
    assert!(!untouched.contains("Gasoline"));
}
