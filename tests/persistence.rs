use serde_json::json;
use txrules::persist::{RULE_FORMAT_VERSION, decode_items};
use txrules::{
    ActionDescriptor, ConditionDescriptor, EngineConfig, PersistenceMode, RuleDescriptor,
    RuleEngine, RuleError, RuleRow, RuleStore, Stage,
};

fn setup() -> RuleStore {
    RuleStore::open(&PersistenceMode::InMemory).expect("store")
}

fn descriptor() -> RuleDescriptor {
    RuleDescriptor::new("r1")
        .stage("pre")
        .condition(ConditionDescriptor::new("contains", "imported_payee", json!("kroger")))
        .action(ActionDescriptor::new("set", Some("payee"), json!("p1")))
        .action(ActionDescriptor::new("set", Some("account"), json!("a1")))
}

#[test]
fn rules_round_trip_through_the_store() {
    let store = setup();
    let row = store.save(&descriptor()).expect("save");
    let loaded = store.get("r1").expect("get").expect("row present");
    assert_eq!(loaded, row);

    let rule = loaded.to_rule().expect("rule");
    assert_eq!(rule.stage(), Stage::Pre);
    assert_eq!(rule.conditions()[0].field(), "imported_payee");
    assert_eq!(rule.actions()[0].field(), Some("payee"));
    assert!(store.get("missing").expect("get").is_none());
}

#[test]
fn stored_rows_use_internal_field_names() {
    let row = RuleRow::from_descriptor(&descriptor()).expect("row");
    let conditions = row.conditions.as_deref().expect("conditions");
    let actions = row.actions.as_deref().expect("actions");
    assert!(conditions.contains("\"imported_description\""), "{conditions}");
    assert!(actions.contains("\"description\""), "{actions}");
    assert!(actions.contains("\"acct\""), "{actions}");
    assert_eq!(row.version, RULE_FORMAT_VERSION);

    let back = row.to_descriptor().expect("descriptor");
    assert_eq!(back.conditions[0].field, "imported_payee");
    assert_eq!(back.actions[1].field.as_deref(), Some("account"));
}

#[test]
fn tombstones_hide_rules() {
    let store = setup();
    store.save(&descriptor()).expect("save");
    store
        .save(
            &RuleDescriptor::new("r2")
                .condition(ConditionDescriptor::new("is", "notes", json!("x")))
                .action(ActionDescriptor::new("set", Some("category"), json!("c"))),
        )
        .expect("save");
    let tombstoned = store.tombstone("r1").expect("tombstone").expect("row");
    assert!(tombstoned.tombstone);
    assert!(store.tombstone("r1").expect("tombstone").is_none());

    let live: Vec<String> = store
        .live_rows()
        .expect("live")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(live, vec!["r2"]);
    assert_eq!(store.all_rows().expect("all").len(), 2);

    // the tombstoned row removes the rule from a running engine
    let engine = RuleEngine::new(&EngineConfig::default());
    engine.load(&[RuleRow::from_descriptor(&descriptor()).expect("row")]).expect("load");
    let report = engine.apply_changes(&[tombstoned]).expect("apply");
    assert_eq!(report.removed, 1);
    assert!(engine.snapshot().expect("snapshot").is_empty());
}

#[test]
fn malformed_rows_are_skipped() {
    let store = setup();
    store.save(&descriptor()).expect("save");
    let mut broken = RuleRow::from_descriptor(&RuleDescriptor::new("broken")).expect("row");
    broken.actions = Some("[{\"op\": \"set\", \"field\": ".to_string());
    store.upsert(&broken).expect("upsert");
    let mut scalar = RuleRow::from_descriptor(&RuleDescriptor::new("scalar")).expect("row");
    scalar.conditions = Some("42".to_string());
    store.upsert(&scalar).expect("upsert");
    let mut empty = RuleRow::from_descriptor(&RuleDescriptor::new("empty")).expect("row");
    empty.conditions = None;
    store.upsert(&empty).expect("upsert");

    let rows = store.live_rows().expect("rows");
    assert_eq!(rows.len(), 4, "rows missing columns are still returned");
    let engine = RuleEngine::new(&EngineConfig::default());
    let report = engine.load(&rows).expect("load");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 3);
    for error in &report.skipped {
        assert!(matches!(error, RuleError::Load { .. }), "{error}");
    }
}

#[test]
fn items_decode_independently() {
    let items = decode_items::<ConditionDescriptor>(
        r#"[{"op": "is", "field": "notes", "value": "x"}, {"field": "notes"}]"#,
    )
    .expect("array");
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(items[1].is_err());

    assert!(decode_items::<ConditionDescriptor>("{}").is_err());
    assert!(decode_items::<ConditionDescriptor>("not json").is_err());
}

#[test]
fn legacy_stages_load_as_pre() {
    for stage in ["cleanup", "modify"] {
        let mut row = RuleRow::from_descriptor(&descriptor()).expect("row");
        row.stage = Some(stage.to_string());
        assert_eq!(row.to_rule().expect("rule").stage(), Stage::Pre, "{stage}");
    }
}

#[test]
fn newer_format_versions_are_rejected() {
    let mut row = RuleRow::from_descriptor(&descriptor()).expect("row");
    row.version = RULE_FORMAT_VERSION + 1;
    match row.to_rule() {
        Err(RuleError::Load { id, .. }) => assert_eq!(id, "r1"),
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn file_mode_persists_between_opens() {
    let path = std::env::temp_dir().join(format!("txrules_test_{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mode = PersistenceMode::File(path.to_string_lossy().to_string());
    {
        let store = RuleStore::open(&mode).expect("store");
        store.save(&descriptor()).expect("save");
    }
    let store = RuleStore::open(&mode).expect("reopen");
    assert_eq!(store.live_rows().expect("rows").len(), 1);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn persistence_mode_from_location() {
    assert_eq!(PersistenceMode::from_location(":memory:"), PersistenceMode::InMemory);
    assert_eq!(PersistenceMode::from_location(""), PersistenceMode::InMemory);
    assert_eq!(
        PersistenceMode::from_location("rules.db"),
        PersistenceMode::File("rules.db".to_string())
    );
}
