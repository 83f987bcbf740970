use serde_json::{Value, json};
use txrules::{
    Action, ActionDescriptor, ActionOp, ActionOptions, ConditionDescriptor, ExecOptions, Record, Rule,
    RuleDescriptor, SplitMethod, apply_actions, execute_actions,
};

fn record(value: Value) -> Record {
    Record::from_value(value).expect("record must be an object")
}

fn split(index: usize, method: SplitMethod, value: Value) -> ActionDescriptor {
    ActionDescriptor::new("set-split-amount", None, value)
        .with_options(ActionOptions::split(index, method))
}

fn actions(descriptors: &[ActionDescriptor]) -> Vec<Action> {
    descriptors
        .iter()
        .map(|d| Action::from_descriptor(d).expect("valid action"))
        .collect()
}

fn amounts(result: &Record) -> Vec<i64> {
    result
        .subtransactions()
        .iter()
        .map(|c| c.amount().expect("child amount"))
        .collect()
}

fn parent() -> Record {
    record(json!({
        "id": "t1",
        "account": "checking",
        "date": "2020-10-15",
        "payee": "kroger",
        "cleared": true,
        "amount": 10000
    }))
}

#[test]
fn percent_of_what_remains_after_fixed_amounts() {
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedPercent, json!(30)),
            split(2, SplitMethod::FixedAmount, json!(2000)),
            split(3, SplitMethod::Remainder, Value::Null),
        ]),
        &parent(),
        &ExecOptions::default(),
    );
    assert_eq!(amounts(&result), vec![2400, 2000, 5600]);
    assert_eq!(result.amount(), Some(10000));
    assert!(result.is_parent());
}

#[test]
fn remainders_share_the_residual() {
    let remainders = actions(&[
        split(1, SplitMethod::Remainder, Value::Null),
        split(2, SplitMethod::Remainder, Value::Null),
    ]);
    let mut negative = parent();
    negative.set("amount", json!(-2397));
    let result = execute_actions(&remainders, &negative, &ExecOptions::default());
    assert_eq!(amounts(&result), vec![-1198, -1199]);

    let mut odd = parent();
    odd.set("amount", json!(123));
    let result = execute_actions(&remainders, &odd, &ExecOptions::default());
    assert_eq!(amounts(&result), vec![62, 61]);
}

#[test]
fn sum_always_matches_parent() {
    for amount in [1, 7, 99, 100, 333, -1, -1001, 123457] {
        let mut p = parent();
        p.set("amount", json!(amount));
        let result = execute_actions(
            &actions(&[
                split(1, SplitMethod::FixedPercent, json!(33.3)),
                split(2, SplitMethod::FixedPercent, json!(12.5)),
                split(3, SplitMethod::Remainder, Value::Null),
                split(4, SplitMethod::Remainder, Value::Null),
                split(5, SplitMethod::Remainder, Value::Null),
            ]),
            &p,
            &ExecOptions::default(),
        );
        let total: i64 = amounts(&result).iter().sum();
        assert_eq!(total, amount, "children of {amount} must add up");
    }
}

#[test]
fn unreconciled_fixed_split_is_declined() {
    let original = parent();
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(3000)),
            split(2, SplitMethod::FixedAmount, json!(3000)),
        ]),
        &original,
        &ExecOptions::default(),
    );
    assert_eq!(result, original, "a split that cannot reconcile leaves the parent alone");
}

#[test]
fn leftover_goes_to_a_trailing_child() {
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(2500)),
            split(2, SplitMethod::FixedPercent, json!(50)),
        ]),
        &parent(),
        &ExecOptions::default(),
    );
    assert_eq!(amounts(&result), vec![2500, 3750, 3750]);
    let children = result.subtransactions();
    assert_eq!(children[2].id(), Some("t1/3"));
}

#[test]
fn zero_leftover_adds_no_trailing_child() {
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(5000)),
            split(2, SplitMethod::FixedPercent, json!(100)),
        ]),
        &parent(),
        &ExecOptions::default(),
    );
    assert_eq!(amounts(&result), vec![5000, 5000]);
}

#[test]
fn residual_goes_to_the_highest_remainder_index() {
    let mut p = parent();
    p.set("amount", json!(101));
    let result = execute_actions(
        &actions(&[
            split(3, SplitMethod::Remainder, Value::Null),
            split(2, SplitMethod::Remainder, Value::Null),
        ]),
        &p,
        &ExecOptions::default(),
    );
    assert_eq!(amounts(&result), vec![0, 51, 50]);
}

#[test]
fn oversized_splits_never_panic() {
    let err = Action::new(
        ActionOp::SetSplitAmount,
        None,
        Value::Null,
        Some(ActionOptions::split(usize::MAX, SplitMethod::Remainder)),
    )
    .expect_err("split index out of range");
    assert_eq!(err.kind(), "internal");

    // fixed amounts whose sum overflows decline the split
    let original = parent();
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(i64::MAX)),
            split(2, SplitMethod::FixedAmount, json!(i64::MAX)),
            split(3, SplitMethod::Remainder, Value::Null),
        ]),
        &original,
        &ExecOptions::default(),
    );
    assert_eq!(result, original);

    let mut negative = parent();
    negative.set("amount", json!(i64::MIN));
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(1)),
            split(2, SplitMethod::Remainder, Value::Null),
        ]),
        &negative,
        &ExecOptions::default(),
    );
    assert_eq!(result, negative);
}

#[test]
fn children_inherit_from_parent() {
    let result = execute_actions(
        &actions(&[
            split(1, SplitMethod::FixedAmount, json!(4000)),
            ActionDescriptor::new("set", Some("category"), json!("food"))
                .with_options(ActionOptions::at(1)),
            split(2, SplitMethod::Remainder, Value::Null),
            ActionDescriptor::new("set", Some("notes"), json!("rest"))
                .with_options(ActionOptions::at(2)),
        ]),
        &parent(),
        &ExecOptions::default(),
    );
    let children = result.subtransactions();
    assert_eq!(children.len(), 2);
    for (n, child) in children.iter().enumerate() {
        assert!(child.is_child());
        assert_eq!(child.id(), Some(format!("t1/{}", n + 1).as_str()));
        assert_eq!(child.str("parent_id"), Some("t1"));
        assert_eq!(child.str("account"), Some("checking"));
        assert_eq!(child.str("date"), Some("2020-10-15"));
        assert_eq!(child.str("payee"), Some("kroger"));
        assert_eq!(child.get("cleared"), Some(&json!(true)));
    }
    assert_eq!(children[0].str("category"), Some("food"));
    assert_eq!(children[1].str("notes"), Some("rest"));
    assert_eq!(amounts(&result), vec![4000, 6000]);
}

#[test]
fn split_index_zero_applies_to_parent() {
    let result = execute_actions(
        &actions(&[
            ActionDescriptor::new("set", Some("notes"), json!("parent note"))
                .with_options(ActionOptions::at(0)),
            split(1, SplitMethod::Remainder, Value::Null),
        ]),
        &parent(),
        &ExecOptions::default(),
    );
    assert_eq!(result.str("notes"), Some("parent note"));
    assert_eq!(amounts(&result), vec![10000]);
}

#[test]
fn disabled_splits_and_children_are_not_split() {
    let split_actions = actions(&[
        split(1, SplitMethod::FixedPercent, json!(50)),
        split(2, SplitMethod::Remainder, Value::Null),
    ]);
    let result = execute_actions(
        &split_actions,
        &parent(),
        &ExecOptions {
            splits_enabled: false,
        },
    );
    assert!(result.subtransactions().is_empty());
    assert!(!result.is_parent());

    let mut child = parent();
    child.set("is_child", json!(true));
    let result = execute_actions(&split_actions, &child, &ExecOptions::default());
    assert!(result.subtransactions().is_empty());
}

#[test]
fn notes_actions() {
    let result = execute_actions(
        &actions(&[
            ActionDescriptor::new("prepend-notes", Some("notes"), json!("[bill] ")),
            ActionDescriptor::new("append-notes", Some("notes"), json!(" #food")),
        ]),
        &record(json!({ "notes": "groceries" })),
        &ExecOptions::default(),
    );
    assert_eq!(result.str("notes"), Some("[bill] groceries #food"));

    let result = execute_actions(
        &actions(&[ActionDescriptor::new("append-notes", Some("notes"), json!("new"))]),
        &record(json!({})),
        &ExecOptions::default(),
    );
    assert_eq!(result.str("notes"), Some("new"));
}

#[test]
fn link_schedule_sets_schedule() {
    let result = execute_actions(
        &actions(&[ActionDescriptor::new("link-schedule", None, json!("sched-1"))]),
        &parent(),
        &ExecOptions::default(),
    );
    assert_eq!(result.str("schedule"), Some("sched-1"));
    let err = Action::from_descriptor(&ActionDescriptor::new("link-schedule", None, json!("")))
        .expect_err("empty schedule id");
    assert_eq!(err.kind(), "no-null");
}

#[test]
fn action_validation() {
    let err = Action::from_descriptor(&ActionDescriptor::new("set", Some("nope"), json!("x")))
        .expect_err("unknown field");
    assert_eq!(err.kind(), "invalid-field");
    let err = Action::from_descriptor(&ActionDescriptor::new("set", Some("account"), json!("")))
        .expect_err("empty account");
    assert_eq!(err.kind(), "no-null");
    let err = Action::from_descriptor(&ActionDescriptor::new("set", Some("amount"), json!("12")))
        .expect_err("string amount");
    assert_eq!(err.kind(), "not-number");
    let err = Action::from_descriptor(&ActionDescriptor::new("set", Some("date"), json!("2020/01/01")))
        .expect_err("bad date");
    assert_eq!(err.kind(), "date-format");
    let err = Action::from_descriptor(&ActionDescriptor::new("delete", Some("notes"), json!("x")))
        .expect_err("unknown action");
    assert_eq!(err.kind(), "internal");
    let err = Action::from_descriptor(&ActionDescriptor::new("set-split-amount", None, json!(5)))
        .expect_err("split without a method");
    assert_eq!(err.kind(), "internal");
    assert!(
        Action::from_descriptor(&ActionDescriptor::new("set", Some("category"), Value::Null))
            .is_ok(),
        "clearing an id field is allowed"
    );
}

#[test]
fn rule_exec_returns_changed_keys() {
    let rule = Rule::new(
        &RuleDescriptor::new("r1")
            .condition(ConditionDescriptor::new("is", "payee", json!("kroger")))
            .action(ActionDescriptor::new("set", Some("category"), json!("food")))
            .action(ActionDescriptor::new("set", Some("payee"), json!("kroger"))),
    )
    .expect("valid rule");
    let patch = rule.exec(&parent()).expect("rule matches");
    assert_eq!(patch.len(), 1, "unchanged keys are left out: {patch:?}");
    assert_eq!(patch.get("category"), Some(&json!("food")));
    assert!(rule.exec(&record(json!({ "payee": "lowes" }))).is_none());
}

#[test]
fn bulk_apply() {
    let records = vec![
        record(json!({ "id": "a", "notes": "x" })),
        record(json!({ "id": "b", "notes": "y" })),
    ];
    let patches = apply_actions(
        &records,
        &[ActionDescriptor::new("set", Some("category"), json!("food"))],
        &ExecOptions::default(),
    )
    .expect("valid actions");
    assert_eq!(patches.len(), 2);
    assert!(patches.iter().all(|p| p.get("category") == Some(&json!("food"))));

    let invalid = apply_actions(
        &records,
        &[ActionDescriptor::new("set", Some("nope"), json!("x"))],
        &ExecOptions::default(),
    );
    assert!(invalid.is_none());
}
