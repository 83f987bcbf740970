//! txrules – the rule engine behind automated transaction bookkeeping.
//!
//! Given an incoming transaction, the engine finds the user-defined rules that
//! apply to it, runs them in a deterministic order and returns the transaction
//! with their changes applied, including splitting it into child transactions.
//! The same rules can be turned around into a filter that finds every stored
//! transaction a rule would match.
//!
//! A rule is:
//! * A list of [`condition::Condition`]s, each a typed predicate on one field
//!   (`imported_payee contains "kroger"`, `amount isapprox 1535`, ...), combined
//!   with `and` or `or`.
//! * A list of [`action::Action`]s, each a field assignment, a notes edit, a
//!   schedule link, or a split amount for one child of a split.
//! * A [`rule::Stage`]: all `pre` rules run first, then normal rules, then `post`.
//!
//! ## Modules
//! * [`schema`] – The field table: value type per field and the operators legal for it.
//! * [`datatype`] – Parsed date and number values.
//! * [`schedule`] – Recurring dates for `date is <schedule>` conditions.
//! * [`condition`] / [`action`] – Construction, validation and evaluation.
//! * [`split`] – Action execution and split allocation.
//! * [`rule`] – Rules, ranking scores, id remapping and serialization.
//! * [`index`] – Inverted indexes narrowing the rules worth evaluating.
//! * [`ruleset`] – The registry of live rules and the snapshot-publishing [`ruleset::RuleEngine`].
//! * [`query`] – Conditions to filter trees for bulk search.
//! * [`persist`] – SQLite storage of rules.
//! * [`config`] – Engine configuration.
//!
//! ## Ranking
//! Within a stage, rules run from the least to the most specific: the score
//! of a rule is the sum of its operator weights, doubled when every condition
//! is an exact match, so an exact rule gets the last word. Ties are broken by
//! rule id, which keeps the order identical on every machine.
//!
//! ## Quick Start
//! ```
//! use serde_json::json;
//! use txrules::{ActionDescriptor, ConditionDescriptor, EngineConfig, Record, RuleDescriptor, RuleEngine};
//! let engine = RuleEngine::new(&EngineConfig::default());
//! engine
//!     .insert_rule(
//!         &RuleDescriptor::new("rename-kroger")
//!             .stage("pre")
//!             .condition(ConditionDescriptor::new("contains", "imported_payee", json!("kroger")))
//!             .action(ActionDescriptor::new("set", Some("payee"), json!("kroger"))),
//!     )
//!     .unwrap();
//! let record = Record::from_value(json!({ "imported_payee": "KROGER #123", "amount": -500 })).unwrap();
//! let result = engine.run_rules(&record).unwrap();
//! assert_eq!(result.str("payee"), Some("kroger"));
//! ```
//!
//! ## Status
//! The engine evaluates synchronously; concurrency is handled by publishing
//! whole rule set snapshots, never by locking inside evaluation.

pub mod action;
pub mod condition;
pub mod config;
pub mod datatype;
pub mod error;
pub mod index;
pub mod persist;
pub mod query;
pub mod record;
pub mod rule;
pub mod ruleset;
pub mod schedule;
pub mod schema;
pub mod split;

pub use action::{Action, ActionDescriptor, ActionOp, ActionOptions, SplitMethod, apply_actions};
pub use condition::{Condition, ConditionDescriptor, ConditionOptions, ConditionValue};
pub use config::{EngineConfig, IndexConfig};
pub use error::{ConstructionError, Result, RuleError, SplitError, TranslationError};
pub use index::{Bucketing, RuleIndex};
pub use persist::{PersistenceMode, RuleRow, RuleStore};
pub use query::{Filter, FilterOp, QueryTranslator, Transform, Translation};
pub use record::{Patch, Record};
pub use rule::{ConditionsOp, Rule, RuleDescriptor, Stage, iterate_ids};
pub use ruleset::{LoadReport, RuleEngine, RuleSet, rank_rules};
pub use schema::{FieldType, Operator};
pub use split::{ExecOptions, execute_actions};
