//! Execution of a rule's actions, including splitting a transaction into
//! child transactions whose amounts add up exactly to the parent amount.
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{Action, MAX_SPLIT_INDEX, SplitMethod};
use crate::datatype::{js_round, json_amount};
use crate::error::SplitError;
use crate::record::{Record, SUBTRANSACTIONS};

// copied from the parent into every child
const INHERITED_FIELDS: [&str; 5] = ["account", "date", "cleared", "reconciled", "payee"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub splits_enabled: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            splits_enabled: true,
        }
    }
}

/// Applies parent-scope actions to a copy of `transaction`, then, when child
/// actions are present, splits it.
pub fn execute_actions(actions: &[Action], transaction: &Record, options: &ExecOptions) -> Record {
    let (child_actions, parent_actions): (Vec<&Action>, Vec<&Action>) =
        actions.iter().partition(|a| a.split_index().is_some());
    let mut parent = transaction.clone();
    for action in &parent_actions {
        action.exec(&mut parent);
    }
    if child_actions.is_empty() || !options.splits_enabled || parent.is_child() {
        return parent;
    }
    match allocate(&parent, &child_actions) {
        Ok(children) => roll_up(parent, children),
        Err(e) => {
            warn!(
                transaction = parent.id().unwrap_or_default(),
                error = %e,
                "declining to split transaction"
            );
            parent
        }
    }
}

fn make_child(parent: &Record, index: usize) -> Record {
    let parent_id = parent.id().unwrap_or_default();
    let mut child = Record::new();
    child.set("id", Value::String(format!("{parent_id}/{index}")));
    child.set("amount", Value::from(0));
    for field in INHERITED_FIELDS {
        if let Some(value) = parent.get(field) {
            child.set(field, value.clone());
        }
    }
    child.set("is_child", Value::Bool(true));
    child.set(
        "parent_id",
        parent.get("id").cloned().unwrap_or(Value::Null),
    );
    child
}

/// Builds the children for a split. Child `n` in the result carries split
/// index `n + 1`. When no remainder split is declared, a trailing child takes
/// any leftover amount; a leftover of zero adds no child.
pub fn allocate(parent: &Record, child_actions: &[&Action]) -> Result<Vec<Record>, SplitError> {
    let split_count = child_actions
        .iter()
        .filter_map(|a| a.split_index())
        .max()
        .unwrap_or(0);
    if split_count > MAX_SPLIT_INDEX {
        return Err(SplitError::TooManySplits(split_count));
    }
    let mut children: Vec<Record> = (1..=split_count).map(|i| make_child(parent, i)).collect();

    let mut fixed: BTreeMap<usize, i64> = BTreeMap::new();
    let mut percents: Vec<(usize, f64)> = Vec::new();
    let mut remainders: Vec<usize> = Vec::new();
    for action in child_actions {
        let Some(index) = action.split_index() else {
            continue;
        };
        let child = &mut children[index - 1];
        match action.split_method() {
            None => action.exec(child),
            Some(SplitMethod::FixedAmount) => {
                let amount = json_amount(action.value()).unwrap_or(0);
                child.set("amount", Value::from(amount));
                fixed.insert(index, amount);
            }
            Some(SplitMethod::FixedPercent) => {
                percents.push((index, action.value().as_f64().unwrap_or(0.0)));
            }
            Some(SplitMethod::Remainder) => {
                if !remainders.contains(&index) {
                    remainders.push(index);
                }
            }
        }
    }
    // the rounding residual lands on the highest remainder index
    remainders.sort_unstable();

    let total_fixed = fixed
        .values()
        .try_fold(0i64, |acc, a| acc.checked_add(*a))
        .ok_or(SplitError::Overflow)?;
    let parent_amount = parent.amount();
    if fixed.len() == split_count {
        if let Some(expected) = parent_amount.filter(|a| *a != total_fixed) {
            return Err(SplitError::Unreconciled {
                expected,
                allocated: total_fixed,
            });
        }
    }

    let remaining = parent_amount
        .unwrap_or(total_fixed)
        .checked_sub(total_fixed)
        .ok_or(SplitError::Overflow)?;
    let mut left = remaining;
    for (index, percent) in percents {
        let amount = js_round(remaining as f64 * percent / 100.0);
        children[index - 1].set("amount", Value::from(amount));
        left = left.checked_sub(amount).ok_or(SplitError::Overflow)?;
    }

    if remainders.is_empty() {
        if left != 0 {
            let mut trailing = make_child(parent, split_count + 1);
            trailing.set("amount", Value::from(left));
            children.push(trailing);
        }
    } else {
        let n = remainders.len() as i64;
        let share = js_round(left as f64 / n as f64);
        let last = share
            .checked_mul(n - 1)
            .and_then(|spread| left.checked_sub(spread))
            .ok_or(SplitError::Overflow)?;
        for (k, index) in remainders.iter().enumerate() {
            let amount = if k as i64 == n - 1 { last } else { share };
            children[index - 1].set("amount", Value::from(amount));
        }
    }
    children_total(&children).ok_or(SplitError::Overflow)?;
    debug!(children = children.len(), remaining, "split allocated");
    Ok(children)
}

fn children_total(children: &[Record]) -> Option<i64> {
    let total: i128 = children.iter().filter_map(Record::amount).map(i128::from).sum();
    i64::try_from(total).ok()
}

fn roll_up(mut parent: Record, children: Vec<Record>) -> Record {
    let total = children_total(&children).unwrap_or_default();
    parent.set("is_parent", Value::Bool(true));
    parent.set("amount", Value::from(total));
    parent.set(
        SUBTRANSACTIONS,
        Value::Array(children.into_iter().map(Record::into_value).collect()),
    );
    parent
}
