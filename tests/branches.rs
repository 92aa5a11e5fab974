use leap_tools::ToolError;
use leap_tools::branches::{
    DefaultKinds, FailureMode, Hierarchy, KindOverrides, KindResolver, MemoryHierarchy, PathIndex,
    PositionalResolver, ShortnameResolver, ShortnameTable, create_branches, ensure_path_exists,
    kind_from_shortname, materialize_batch, order_by_depth, resolve,
};
use leap_tools::model::{BranchPath, NodeKind};
use tempfile::tempdir;

fn paths(raw: &[&str]) -> Vec<BranchPath> {
    raw.iter().map(|path| BranchPath::parse(path)).collect()
}

#[test]
fn path_without_override_or_descendants_is_leaf() {
    let known = paths(&["A", "A\\B"]);
    let index = PathIndex::build(&known);
    let kind = resolve(
        &BranchPath::parse("A\\B"),
        &index,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
    );
    assert_eq!(kind, NodeKind::Technology);

    let unknown = resolve(
        &BranchPath::parse("X\\Y"),
        &index,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
    );
    assert_eq!(unknown, NodeKind::Technology);
}

#[test]
fn deeper_descendants_take_precedence_over_children() {
    let defaults = DefaultKinds::new(
        NodeKind::KeyAssumptionCategory,
        NodeKind::Category,
        NodeKind::KeyAssumption,
    );
    let known = paths(&["A", "A\\B", "A\\B\\C", "A\\D"]);
    let index = PathIndex::build(&known);
    let overrides = KindOverrides::new();

    assert_eq!(
        resolve(&BranchPath::parse("A"), &index, &overrides, defaults),
        NodeKind::KeyAssumptionCategory
    );
    assert_eq!(
        resolve(&BranchPath::parse("A\\B"), &index, &overrides, defaults),
        NodeKind::Category
    );
    assert_eq!(
        resolve(&BranchPath::parse("A\\B\\C"), &index, &overrides, defaults),
        NodeKind::KeyAssumption
    );
}

#[test]
fn overrides_match_full_and_root_relative_paths() {
    let mut overrides =
        KindOverrides::new().with_root(Some(BranchPath::parse("Key Assumptions\\Balances")));
    overrides.insert("Demand\\Road\\Gasoline", NodeKind::Fuel);
    overrides.insert("Transport\\Road", NodeKind::Category);

    let index = PathIndex::default();
    assert_eq!(
        resolve(
            &BranchPath::parse("Demand\\Road\\Gasoline"),
            &index,
            &overrides,
            DefaultKinds::DEMAND
        ),
        NodeKind::Fuel
    );
    assert_eq!(
        resolve(
            &BranchPath::parse("Key Assumptions\\Balances\\Transport\\Road"),
            &index,
            &overrides,
            DefaultKinds::KEY_ASSUMPTIONS
        ),
        NodeKind::Category
    );
}

#[test]
fn overrides_load_from_json() {
    let overrides = KindOverrides::from_json_str(
        r#"{"Demand\\Road": "category", "Demand\\Road\\Diesel": "fuel"}"#,
    )
    .expect("overrides parsed");
    assert!(KindOverrides::new().is_empty());
    assert!(!overrides.is_empty());
    assert_eq!(overrides.len(), 2);
    assert_eq!(
        overrides.get(&BranchPath::parse("Demand\\Road\\Diesel")),
        Some(NodeKind::Fuel)
    );
}

#[test]
fn existing_path_needs_no_creation_calls() {
    let mut hierarchy = MemoryHierarchy::with_roots(&["Demand\\Road\\Gasoline"]);
    let existing = hierarchy
        .find(&BranchPath::parse("Demand\\Road\\Gasoline"))
        .expect("lookup succeeds")
        .expect("path exists");

    let overrides = KindOverrides::new();
    let target = paths(&["Demand\\Road\\Gasoline"]);
    let resolver = PositionalResolver::new(&target, &overrides, DefaultKinds::DEMAND);
    let ensured = ensure_path_exists(&mut hierarchy, &target[0], &resolver)
        .expect("path ensured");

    assert_eq!(ensured.handle, existing);
    assert!(ensured.created.is_empty());
    assert_eq!(hierarchy.creation_calls(), 0);
}

#[test]
fn missing_segments_are_created_with_inferred_kinds() {
    let mut hierarchy = MemoryHierarchy::with_roots(&["Key Assumptions"]);
    let targets = paths(&[
        "Key Assumptions\\Balances",
        "Key Assumptions\\Balances\\Transport",
        "Key Assumptions\\Balances\\Transport\\Road",
        "Key Assumptions\\Balances\\Transport\\Rail",
    ]);

    let report = create_branches(
        &mut hierarchy,
        &targets,
        &KindOverrides::new(),
        DefaultKinds::KEY_ASSUMPTIONS,
        FailureMode::Strict,
    )
    .expect("batch succeeds");

    assert_eq!(report.created, targets);
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        hierarchy.kind_of(&BranchPath::parse("Key Assumptions\\Balances")),
        Some(NodeKind::KeyAssumptionCategory)
    );
    assert_eq!(
        hierarchy.kind_of(&BranchPath::parse("Key Assumptions\\Balances\\Transport")),
        Some(NodeKind::KeyAssumptionCategory)
    );
    assert_eq!(
        hierarchy.kind_of(&BranchPath::parse("Key Assumptions\\Balances\\Transport\\Rail")),
        Some(NodeKind::KeyAssumption)
    );
}

#[test]
fn second_batch_run_creates_nothing() {
    let mut hierarchy = MemoryHierarchy::with_roots(&["Demand"]);
    let targets = paths(&["Demand\\Road", "Demand\\Road\\Car", "Demand\\Rail"]);

    let first = create_branches(
        &mut hierarchy,
        &targets,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
        FailureMode::Strict,
    )
    .expect("first run");
    assert_eq!(first.created.len(), 3);
    let calls_after_first = hierarchy.creation_calls();

    let second = create_branches(
        &mut hierarchy,
        &targets,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
        FailureMode::Strict,
    )
    .expect("second run");
    assert!(second.created.is_empty());
    assert_eq!(second.skipped.len(), 3);
    assert_eq!(hierarchy.creation_calls(), calls_after_first);
}

#[test]
fn batch_processes_ancestors_before_descendants() {
    let reversed = paths(&["A\\B\\C", "A\\B", "A"]);
    assert_eq!(order_by_depth(&reversed), paths(&["A", "A\\B", "A\\B\\C"]));

    let mut hierarchy = MemoryHierarchy::with_roots(&["A"]);
    let report = create_branches(
        &mut hierarchy,
        &reversed,
        &KindOverrides::new(),
        DefaultKinds::KEY_ASSUMPTIONS,
        FailureMode::Strict,
    )
    .expect("batch succeeds");

    assert_eq!(report.skipped, paths(&["A"]));
    assert_eq!(report.created, paths(&["A\\B", "A\\B\\C"]));
}

#[test]
fn fuel_branches_fail_instead_of_being_skipped() {
    let targets = paths(&["Demand\\Road", "Demand\\Road\\Gasoline", "Demand\\Rail"]);
    let mut overrides = KindOverrides::new();
    overrides.insert("Demand\\Road\\Gasoline", NodeKind::Fuel);

    let mut lenient = MemoryHierarchy::with_roots(&["Demand"]);
    let report = create_branches(
        &mut lenient,
        &targets,
        &overrides,
        DefaultKinds::DEMAND,
        FailureMode::Lenient,
    )
    .expect("lenient batch returns a report");
    assert_eq!(report.created, paths(&["Demand\\Road", "Demand\\Rail"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, BranchPath::parse("Demand\\Road\\Gasoline"));
    assert!(report.failed[0].reason.contains("manual creation required"));

    let mut strict = MemoryHierarchy::with_roots(&["Demand"]);
    let error = create_branches(
        &mut strict,
        &targets,
        &overrides,
        DefaultKinds::DEMAND,
        FailureMode::Strict,
    )
    .expect_err("strict batch aborts");
    assert!(matches!(
        error,
        ToolError::ExternalOperation {
            kind: Some(NodeKind::Fuel),
            ..
        }
    ));
    assert!(strict.contains(&BranchPath::parse("Demand\\Road")));
}

#[test]
fn rejected_creations_are_collected_in_lenient_mode() {
    let mut hierarchy = MemoryHierarchy::with_roots(&["Demand"]);
    hierarchy.refuse(&BranchPath::parse("Demand\\Industry"));
    let targets = paths(&["Demand\\Industry", "Demand\\Buildings"]);

    let report = create_branches(
        &mut hierarchy,
        &targets,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
        FailureMode::Lenient,
    )
    .expect("lenient batch returns a report");
    assert_eq!(report.created, paths(&["Demand\\Buildings"]));
    assert_eq!(report.failed[0].path, BranchPath::parse("Demand\\Industry"));
}

#[test]
fn missing_root_is_an_orphan_creation() {
    let mut hierarchy = MemoryHierarchy::new();
    let targets = paths(&["Demand\\Road"]);

    let error = create_branches(
        &mut hierarchy,
        &targets,
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
        FailureMode::Strict,
    )
    .expect_err("no parent to create under");
    assert!(matches!(error, ToolError::OrphanCreation { ref path } if path == "Demand"));
    assert_eq!(hierarchy.creation_calls(), 0);
}

#[test]
fn shortname_rules_classify_stock_and_intensity_branches() {
    let path = BranchPath::parse("Demand\\Passenger road\\LPVs");
    assert_eq!(
        kind_from_shortname("Fuel (road)", &path).expect("road fuel"),
        NodeKind::Fuel
    );
    assert_eq!(
        kind_from_shortname("Others (level 2)", &path).expect("technology"),
        NodeKind::Technology
    );
    assert_eq!(
        kind_from_shortname("Fuel (non-road)", &path).expect("technology"),
        NodeKind::Technology
    );
    assert_eq!(
        kind_from_shortname("Medium (non-road)", &path).expect("category"),
        NodeKind::Category
    );
    assert!(matches!(
        kind_from_shortname("Vehicle type (road)", &path),
        Err(ToolError::ExternalOperation { .. })
    ));
}

#[test]
fn shortname_resolver_needs_a_table_entry_and_rejects_stock_branches() {
    let mut table = ShortnameTable::new();
    table.insert("Vehicle type (road)", &["Passenger road", "LPVs"]);
    table.insert("Fuel (non-road)", &["Passenger non road", "Air", "Jet fuel"]);
    let parent = BranchPath::parse("Demand\\Passenger non road\\Air");

    let resolver = ShortnameResolver::new(&table, &["Passenger non road", "Air", "Jet fuel"]);
    assert_eq!(
        resolver.kind_for(&parent, "Jet fuel").expect("kind resolved"),
        NodeKind::Technology
    );

    let stock =
        ShortnameResolver::new(&table, &["Passenger road", "LPVs"]).with_kind(NodeKind::Category);
    let mut hierarchy = MemoryHierarchy::with_roots(&["Demand\\Passenger road"]);
    let error = ensure_path_exists(
        &mut hierarchy,
        &BranchPath::parse("Demand\\Passenger road\\LPVs"),
        &stock,
    )
    .expect_err("stock branch cannot be auto-created");
    assert!(matches!(error, ToolError::ExternalOperation { .. }));

    let unknown = ShortnameResolver::new(&table, &["Freight road", "Trucks"]);
    let error = materialize_batch(
        &mut hierarchy,
        &paths(&["Demand\\Freight road"]),
        &unknown,
        FailureMode::Strict,
    )
    .expect_err("tuple missing from table");
    assert!(matches!(error, ToolError::Lookup { .. }));
}

#[test]
fn hierarchy_snapshot_survives_save_and_load() {
    let mut hierarchy = MemoryHierarchy::with_roots(&["Demand"]);
    create_branches(
        &mut hierarchy,
        &paths(&["Demand\\Road", "Demand\\Road\\Car"]),
        &KindOverrides::new(),
        DefaultKinds::DEMAND,
        FailureMode::Strict,
    )
    .expect("branches created");

    let temp_dir = tempdir().expect("temporary directory");
    let snapshot = temp_dir.path().join("hierarchy.json");
    hierarchy.save(&snapshot).expect("snapshot written");
    let mut restored = MemoryHierarchy::load(&snapshot).expect("snapshot read");

    assert_eq!(restored.nodes(), hierarchy.nodes());
    assert!(
        restored
            .find(&BranchPath::parse("Demand\\Road\\Car"))
            .expect("lookup succeeds")
            .is_some()
    );
    assert_eq!(
        restored.kind_of(&BranchPath::parse("Demand\\Road\\Car")),
        Some(NodeKind::Technology)
    );
}
