use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionDescriptor, ActionOp};
use crate::condition::{Condition, ConditionDescriptor};
use crate::error::ConstructionError;
use crate::record::{Patch, Record};
use crate::schema::FieldType;
use crate::split::{ExecOptions, execute_actions};

// ------------- Stage -------------
/// Coarse ordering of rules. The derived order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Pre,
    Normal,
    Post,
}

impl Stage {
    /// Parses a persisted stage; the legacy `cleanup` and `modify` stages run as `pre`.
    pub fn parse(stage: Option<&str>) -> Result<Self, ConstructionError> {
        match stage {
            None | Some("") => Ok(Stage::Normal),
            Some("pre") | Some("cleanup") | Some("modify") => Ok(Stage::Pre),
            Some("post") => Ok(Stage::Post),
            Some(other) => Err(ConstructionError::InvalidStage(other.to_string())),
        }
    }
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Stage::Pre => Some("pre"),
            Stage::Normal => None,
            Stage::Post => Some("post"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionsOp {
    And,
    Or,
}

impl ConditionsOp {
    pub fn parse(op: &str) -> Result<Self, ConstructionError> {
        match op {
            "and" => Ok(ConditionsOp::And),
            "or" => Ok(ConditionsOp::Or),
            other => Err(ConstructionError::InvalidConditionsOp(other.to_string())),
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionsOp::And => "and",
            ConditionsOp::Or => "or",
        }
    }
}

fn default_conditions_op() -> String {
    "and".to_string()
}

/// The serialized shape of a rule, using public field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default = "default_conditions_op")]
    pub conditions_op: String,
    #[serde(default)]
    pub conditions: Vec<ConditionDescriptor>,
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,
}

impl RuleDescriptor {
    pub fn new(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            stage: None,
            conditions_op: default_conditions_op(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }
    pub fn stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_string());
        self
    }
    pub fn any(mut self) -> Self {
        self.conditions_op = "or".to_string();
        self
    }
    pub fn condition(mut self, condition: ConditionDescriptor) -> Self {
        self.conditions.push(condition);
        self
    }
    pub fn action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }
}

// ------------- Rule -------------
#[derive(Debug, Clone)]
pub struct Rule {
    id: String,
    stage: Stage,
    conditions_op: ConditionsOp,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
}

impl Rule {
    pub fn new(descriptor: &RuleDescriptor) -> Result<Self, ConstructionError> {
        let conditions = descriptor
            .conditions
            .iter()
            .map(Condition::from_descriptor)
            .collect::<Result<Vec<_>, _>>()?;
        let actions = descriptor
            .actions
            .iter()
            .map(Action::from_descriptor)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: descriptor.id.clone().unwrap_or_default(),
            stage: Stage::parse(descriptor.stage.as_deref())?,
            conditions_op: ConditionsOp::parse(&descriptor.conditions_op)?,
            conditions,
            actions,
        })
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn stage(&self) -> Stage {
        self.stage
    }
    pub fn conditions_op(&self) -> ConditionsOp {
        self.conditions_op
    }
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
    pub fn conditions_for_field<'r>(
        &'r self,
        field: &'r str,
    ) -> impl Iterator<Item = &'r Condition> + 'r {
        self.conditions.iter().filter(move |c| c.field() == field)
    }

    /// A rule without conditions never matches.
    pub fn eval_conditions(&self, record: &Record) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        match self.conditions_op {
            ConditionsOp::And => self.conditions.iter().all(|c| c.eval(record)),
            ConditionsOp::Or => self.conditions.iter().any(|c| c.eval(record)),
        }
    }
    pub fn exec(&self, record: &Record) -> Option<Patch> {
        self.exec_with(record, &ExecOptions::default())
    }
    /// The keys changed by this rule's actions, `None` when it does not match.
    pub fn exec_with(&self, record: &Record, options: &ExecOptions) -> Option<Patch> {
        if !self.eval_conditions(record) {
            return None;
        }
        Some(execute_actions(&self.actions, record, options).diff(record))
    }
    pub fn apply(&self, record: &Record) -> Record {
        self.apply_with(record, &ExecOptions::default())
    }
    pub fn apply_with(&self, record: &Record, options: &ExecOptions) -> Record {
        let mut applied = record.clone();
        if let Some(patch) = self.exec_with(record, options) {
            applied.merge(&patch);
        }
        applied
    }

    /// Ranking score: the sum of operator weights, doubled when every
    /// condition is an exact-like match.
    pub fn score(&self) -> u32 {
        let total: u32 = self.conditions.iter().map(|c| c.op().weight()).sum();
        if !self.conditions.is_empty() && self.conditions.iter().all(|c| c.op().is_exact_like()) {
            total * 2
        } else {
            total
        }
    }

    pub fn remap(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        for condition in &mut self.conditions {
            condition.remap(lookup);
        }
        for action in &mut self.actions {
            action.remap(lookup);
        }
    }

    pub fn serialize(&self) -> RuleDescriptor {
        RuleDescriptor {
            id: Some(self.id.clone()),
            stage: self.stage.as_str().map(str::to_string),
            conditions_op: self.conditions_op.as_str().to_string(),
            conditions: self.conditions.iter().map(Condition::serialize).collect(),
            actions: self.actions.iter().map(Action::serialize).collect(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let joiner = format!(" {} ", self.conditions_op.as_str());
        let conditions: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
        let actions: Vec<String> = self.actions.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "rule {} if {} then {}",
            self.id,
            conditions.join(&joiner),
            actions.join(", ")
        )
    }
}

/// Visits every id a rule set references through `field`, in conditions and
/// in `set` actions. Returning `true` from `visit` skips the rest of that rule.
pub fn iterate_ids<'r, I, F>(rules: I, field: &str, mut visit: F)
where
    I: IntoIterator<Item = &'r Rule>,
    F: FnMut(&'r Rule, &str) -> bool,
{
    'rules: for rule in rules {
        for condition in rule.conditions_for_field(field) {
            if condition.field_type() != FieldType::Id {
                continue;
            }
            for id in condition.ids() {
                if visit(rule, id) {
                    continue 'rules;
                }
            }
        }
        for action in rule.actions() {
            if action.op() == ActionOp::Set && action.field() == Some(field) {
                if let Some(id) = action.value().as_str() {
                    if visit(rule, id) {
                        continue 'rules;
                    }
                }
            }
        }
    }
}
