use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use serde_json::{Value, json};
use txrules::{
    ActionDescriptor, ActionOptions, ConditionDescriptor, EngineConfig, Record, Rule,
    RuleDescriptor, RuleEngine, RuleError, RuleRow, SplitMethod, iterate_ids,
};

fn setup() -> RuleEngine {
    let engine = RuleEngine::new(&EngineConfig::default());
    for descriptor in [
        RuleDescriptor::new("rename")
            .stage("pre")
            .condition(ConditionDescriptor::new("is", "imported_payee", json!("123 kroger")))
            .action(ActionDescriptor::new("set", Some("payee"), json!("kroger3"))),
        RuleDescriptor::new("broad")
            .condition(ConditionDescriptor::new("contains", "imported_payee", json!("kroger")))
            .action(ActionDescriptor::new("set", Some("payee"), json!("kroger4"))),
        RuleDescriptor::new("notes")
            .condition(ConditionDescriptor::new("is", "payee", json!("kroger4")))
            .action(ActionDescriptor::new("set", Some("notes"), json!("got it"))),
    ] {
        engine.insert_rule(&descriptor).expect("insert rule");
    }
    engine
}

fn record(value: Value) -> Record {
    Record::from_value(value).expect("record must be an object")
}

fn row(descriptor: &RuleDescriptor) -> RuleRow {
    RuleRow::from_descriptor(descriptor).expect("row")
}

#[test]
fn stages_run_in_order() {
    let engine = setup();
    let input = record(json!({ "imported_payee": "123 kroger", "date": "2020-08-11", "amount": 50 }));
    let result = engine.run_rules(&input).expect("run");
    assert_eq!(
        result,
        record(json!({
            "imported_payee": "123 kroger",
            "date": "2020-08-11",
            "amount": 50,
            "payee": "kroger4",
            "notes": "got it"
        }))
    );
}

#[test]
fn post_rules_see_everything() {
    let engine = setup();
    engine
        .insert_rule(
            &RuleDescriptor::new("post")
                .stage("post")
                .condition(ConditionDescriptor::new(
                    "oneOf",
                    "payee",
                    json!(["kroger", "kroger1", "kroger2", "kroger3", "kroger4"]),
                ))
                .action(ActionDescriptor::new("set", Some("notes"), json!("got it2"))),
        )
        .expect("insert rule");
    let input = record(json!({ "imported_payee": "123 kroger", "amount": 50 }));
    let result = engine.run_rules(&input).expect("run");
    assert_eq!(result.str("payee"), Some("kroger4"));
    assert_eq!(result.str("notes"), Some("got it2"));
}

#[test]
fn unmatched_record_is_unchanged() {
    let engine = setup();
    let input = record(json!({ "imported_payee": "lowes", "amount": 50 }));
    assert_eq!(engine.run_rules(&input).expect("run"), input);
}

#[test]
fn engine_splits_transactions() {
    let engine = RuleEngine::new(&EngineConfig::default());
    engine
        .insert_rule(
            &RuleDescriptor::new("split-groceries")
                .condition(ConditionDescriptor::new("is", "payee", json!("kroger")))
                .action(
                    ActionDescriptor::new("set-split-amount", None, json!(50))
                        .with_options(ActionOptions::split(1, SplitMethod::FixedPercent)),
                )
                .action(
                    ActionDescriptor::new("set-split-amount", None, Value::Null)
                        .with_options(ActionOptions::split(2, SplitMethod::Remainder)),
                ),
        )
        .expect("insert rule");
    let result = engine
        .run_rules(&record(json!({ "id": "t", "payee": "kroger", "amount": -1001 })))
        .expect("run");
    let amounts: Vec<i64> = result
        .subtransactions()
        .iter()
        .filter_map(Record::amount)
        .collect();
    assert_eq!(amounts, vec![-500, -501]);

    let disabled = RuleEngine::new(&EngineConfig {
        splits_enabled: false,
        ..EngineConfig::default()
    });
    let rule = engine.snapshot().expect("snapshot");
    let rule = rule.get("split-groceries").expect("rule present");
    disabled.insert_rule(&rule.serialize()).expect("insert rule");
    let result = disabled
        .run_rules(&record(json!({ "id": "t", "payee": "kroger", "amount": -1001 })))
        .expect("run");
    assert!(result.subtransactions().is_empty());
}

#[test]
fn changes_apply_as_one_batch() {
    let engine = setup();
    let mut tombstone = row(&RuleDescriptor::new("rename"));
    tombstone.tombstone = true;
    let replacement = row(
        &RuleDescriptor::new("notes")
            .condition(ConditionDescriptor::new("is", "payee", json!("kroger4")))
            .action(ActionDescriptor::new("set", Some("notes"), json!("changed"))),
    );
    let mut broken = row(&RuleDescriptor::new("broken"));
    broken.conditions = Some("{not json".to_string());

    let report = engine
        .apply_changes(&[tombstone, replacement, broken])
        .expect("apply");
    assert_eq!(report.removed, 1);
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 1);

    let snapshot = engine.snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.get("rename").is_none());
    let result = engine
        .run_rules(&record(json!({ "imported_payee": "123 kroger" })))
        .expect("run");
    assert_eq!(result.str("notes"), Some("changed"));
}

#[test]
fn load_skips_bad_rows() {
    let engine = setup();
    let good = row(
        &RuleDescriptor::new("only")
            .condition(ConditionDescriptor::new("is", "notes", json!("x")))
            .action(ActionDescriptor::new("set", Some("category"), json!("food"))),
    );
    let mut not_array = row(&RuleDescriptor::new("object"));
    not_array.actions = Some("{}".to_string());
    let mut bad_op = row(&RuleDescriptor::new("bad-op"));
    bad_op.conditions = Some(r#"[{"op": "contains", "field": "amount", "value": 5}]"#.to_string());
    let mut deleted = good.clone();
    deleted.id = "deleted".to_string();
    deleted.tombstone = true;

    let report = engine
        .load(&[good, not_array, bad_op, deleted])
        .expect("load");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 2);
    let snapshot = engine.snapshot().expect("snapshot");
    let ids: Vec<&str> = snapshot.rules().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["only"], "load replaces the previous rules");
}

#[test]
fn rows_without_an_id_are_skipped() {
    let engine = setup();
    let good = row(
        &RuleDescriptor::new("only")
            .condition(ConditionDescriptor::new("is", "notes", json!("x")))
            .action(ActionDescriptor::new("set", Some("category"), json!("food"))),
    );
    let mut nameless = good.clone();
    nameless.id = String::new();

    let report = engine
        .load(&[good.clone(), nameless.clone()])
        .expect("load");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(matches!(report.skipped[0], RuleError::Load { .. }));
    assert_eq!(engine.snapshot().expect("snapshot").len(), 1);

    let report = engine.apply_changes(&[nameless]).expect("apply");
    assert_eq!(report.loaded, 0);
    assert_eq!(report.skipped.len(), 1);
    assert!(engine.snapshot().expect("snapshot").get("only").is_some());
}

#[test]
fn delete_rule() {
    let engine = setup();
    assert!(engine.delete_rule("broad").expect("delete"));
    assert!(!engine.delete_rule("broad").expect("delete"));
    let result = engine
        .run_rules(&record(json!({ "imported_payee": "123 kroger" })))
        .expect("run");
    assert_eq!(result.str("payee"), Some("kroger3"));
    assert_eq!(result.get("notes"), None);
}

#[test]
fn mappings_remap_from_authored_values() {
    let engine = RuleEngine::new(&EngineConfig::default());
    engine
        .insert_rule(
            &RuleDescriptor::new("r")
                .condition(ConditionDescriptor::new("is", "payee", json!("p1")))
                .action(ActionDescriptor::new("set", Some("category"), json!("c1"))),
        )
        .expect("insert rule");
    let mappings = HashMap::from([
        ("p1".to_string(), "p2".to_string()),
        ("c1".to_string(), "c2".to_string()),
    ]);
    engine.set_mappings(mappings.clone()).expect("remap");
    engine.set_mappings(mappings).expect("remap again");

    let result = engine
        .run_rules(&record(json!({ "payee": "p2" })))
        .expect("run");
    assert_eq!(result.str("category"), Some("c2"));
    let unchanged = record(json!({ "payee": "p1" }));
    assert_eq!(engine.run_rules(&unchanged).expect("run"), unchanged);

    // rules inserted later are remapped too
    engine
        .insert_rule(
            &RuleDescriptor::new("late")
                .condition(ConditionDescriptor::new("is", "payee", json!("p1")))
                .action(ActionDescriptor::new("set", Some("notes"), json!("late"))),
        )
        .expect("insert rule");
    let result = engine
        .run_rules(&record(json!({ "payee": "p2" })))
        .expect("run");
    assert_eq!(result.str("notes"), Some("late"));

    engine.set_mappings(HashMap::new()).expect("clear");
    let result = engine.run_rules(&unchanged).expect("run");
    assert_eq!(result.str("category"), Some("c1"));
}

#[test]
fn rules_for_payee() {
    let engine = setup();
    let snapshot = engine.snapshot().expect("snapshot");
    let ids: Vec<String> = snapshot
        .rules_for_payee("kroger4")
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(ids, vec!["broad", "notes"]);
}

#[test]
fn iterate_ids_finds_all_the_ids() {
    let rule = |id: &str, conditions: Vec<ConditionDescriptor>, actions: Vec<ActionDescriptor>| {
        let mut descriptor = RuleDescriptor::new(id);
        descriptor.conditions = conditions;
        descriptor.actions = actions;
        Rule::new(&descriptor).expect("valid rule")
    };
    let rules = vec![
        rule(
            "first",
            vec![ConditionDescriptor::new("is", "payee", json!("id1"))],
            vec![ActionDescriptor::new("set", Some("notes"), json!("sar"))],
        ),
        rule(
            "second",
            vec![ConditionDescriptor::new("oneOf", "payee", json!(["id2", "id3"]))],
            vec![],
        ),
        rule(
            "third",
            vec![ConditionDescriptor::new("is", "notes", json!("James"))],
            vec![ActionDescriptor::new("set", Some("payee"), json!("id3"))],
        ),
        rule(
            "fourth",
            vec![
                ConditionDescriptor::new("is", "notes", json!("James")),
                ConditionDescriptor::new("gt", "amount", json!(5)),
            ],
            vec![],
        ),
        rule(
            "fifth",
            vec![
                ConditionDescriptor::new("is", "category", json!("id5")),
                ConditionDescriptor::new("gt", "amount", json!(5)),
                ConditionDescriptor::new("lt", "amount", json!(10)),
            ],
            vec![],
        ),
    ];
    let mut found = Vec::new();
    iterate_ids(&rules, "payee", |rule, _| {
        found.push(rule.id().to_string());
        false
    });
    assert_eq!(found, vec!["first", "second", "second", "third"]);
}

#[test]
fn readers_see_whole_snapshots() {
    let engine = Arc::new(RuleEngine::new(&EngineConfig::default()));
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for n in 0..50 {
                let rows: Vec<RuleRow> = (0..10)
                    .map(|i| {
                        row(&RuleDescriptor::new(&format!("r{i}"))
                            .condition(ConditionDescriptor::new("is", "notes", json!("x")))
                            .action(ActionDescriptor::new("set", Some("category"), json!(format!("c{n}")))))
                    })
                    .collect();
                engine.load(&rows).expect("load");
            }
        })
    };
    for _ in 0..200 {
        let snapshot = engine.snapshot().expect("snapshot");
        assert!(
            snapshot.is_empty() || snapshot.len() == 10,
            "partial rule set of {} rules",
            snapshot.len()
        );
    }
    writer.join().expect("writer thread");
    assert_eq!(engine.snapshot().expect("snapshot").len(), 10);
}

#[test]
fn inserts_racing_a_remap_end_up_remapped() {
    let engine = Arc::new(RuleEngine::new(&EngineConfig::default()));
    let inserters: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..25 {
                    engine
                        .insert_rule(
                            &RuleDescriptor::new(&format!("r{t}-{i}"))
                                .condition(ConditionDescriptor::new("is", "payee", json!("old")))
                                .action(ActionDescriptor::new("set", Some("notes"), json!("hit"))),
                        )
                        .expect("insert rule");
                }
            })
        })
        .collect();
    engine
        .set_mappings(HashMap::from([("old".to_string(), "new".to_string())]))
        .expect("remap");
    for inserter in inserters {
        inserter.join().expect("inserter thread");
    }

    let snapshot = engine.snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 100);
    let merged = record(json!({ "payee": "new" }));
    for rule in snapshot.rules() {
        assert!(rule.eval_conditions(&merged), "{} kept a stale payee", rule.id());
    }
}
