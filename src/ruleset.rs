//! The live rule registry and the engine that publishes it.
//!
//! A [`RuleSet`] owns every rule together with its indexes; the only way to
//! change one is through methods that keep both consistent. The
//! [`RuleEngine`] holds the current set behind an `Arc` and replaces it whole
//! on every mutation, so a reader always sees one complete snapshot.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::condition::ConditionDescriptor;
use crate::config::EngineConfig;
use crate::error::{Result, RuleError};
use crate::index::{Bucketing, RuleIndex};
use crate::persist::RuleRow;
use crate::query::{QueryTranslator, Translation};
use crate::record::Record;
use crate::rule::{Rule, RuleDescriptor, iterate_ids};
use crate::split::ExecOptions;

/// Orders rules by stage, then ascending score, then id.
pub fn rank_rules<I>(rules: I) -> Vec<Arc<Rule>>
where
    I: IntoIterator<Item = Arc<Rule>>,
{
    let mut ranked: Vec<Arc<Rule>> = rules.into_iter().collect();
    ranked.sort_by_cached_key(|r| (r.stage(), r.score(), r.id().to_string()));
    ranked
}

// ------------- RuleSet -------------
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: BTreeMap<String, Arc<Rule>>,
    indexes: Vec<RuleIndex>,
    options: ExecOptions,
}

impl RuleSet {
    pub fn new(indexes: Vec<RuleIndex>, options: ExecOptions) -> Self {
        Self {
            rules: BTreeMap::new(),
            indexes,
            options,
        }
    }
    /// Imported payees bucketed by first character, payees by exact id.
    pub fn default_indexes() -> Vec<RuleIndex> {
        vec![
            RuleIndex::new("imported_payee", Bucketing::FirstChar),
            RuleIndex::new("payee", Bucketing::Exact),
        ]
    }
    /// An empty set with the same index layout and options.
    pub fn empty_like(&self) -> Self {
        let indexes = self
            .indexes
            .iter()
            .map(|i| RuleIndex::new(i.field(), i.bucketing()))
            .collect();
        Self::new(indexes, self.options)
    }
    /// A new set holding `rules`, indexed from scratch.
    pub fn rebuild<I>(&self, rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<Rule>>,
    {
        let mut set = self.empty_like();
        for rule in rules {
            set.insert_arc(rule)?;
        }
        debug!(rules = set.len(), "rule set rebuilt");
        Ok(set)
    }

    pub fn insert(&mut self, rule: Rule) -> Result<()> {
        self.insert_arc(Arc::new(rule))
    }
    fn insert_arc(&mut self, rule: Arc<Rule>) -> Result<()> {
        if rule.id().is_empty() {
            return Err(RuleError::Invariant("rule without an id".to_string()));
        }
        self.remove(rule.id());
        for index in &mut self.indexes {
            index.add(&rule);
        }
        self.rules.insert(rule.id().to_string(), rule);
        Ok(())
    }
    pub fn remove(&mut self, id: &str) -> Option<Arc<Rule>> {
        let old = self.rules.remove(id)?;
        for index in &mut self.indexes {
            index.remove(&old);
        }
        Some(old)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.get(id)
    }
    pub fn len(&self) -> usize {
        self.rules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }
    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Every rule any index considers possibly applicable to `record`.
    pub fn candidates(&self, record: &Record) -> Vec<Arc<Rule>> {
        if self.indexes.is_empty() {
            return self.rules.values().cloned().collect();
        }
        let ids: BTreeSet<&str> = self
            .indexes
            .iter()
            .flat_map(|index| index.candidates(record))
            .collect();
        ids.into_iter()
            .filter_map(|id| self.rules.get(id).cloned())
            .collect()
    }
    pub fn ranked_candidates(&self, record: &Record) -> Vec<Arc<Rule>> {
        rank_rules(self.candidates(record))
    }
    /// Applies every applicable rule in ranked order, each one seeing the
    /// output of the previous.
    pub fn run(&self, record: &Record) -> Record {
        self.ranked_candidates(record)
            .iter()
            .fold(record.clone(), |current, rule| {
                rule.apply_with(&current, &self.options)
            })
    }
    pub fn rules_for_payee(&self, payee_id: &str) -> Vec<Arc<Rule>> {
        let mut ids = BTreeSet::new();
        iterate_ids(self.rules.values().map(|r| r.as_ref()), "payee", |rule, id| {
            if id == payee_id {
                ids.insert(rule.id().to_string());
                return true;
            }
            false
        });
        ids.iter()
            .filter_map(|id| self.rules.get(id).cloned())
            .collect()
    }
}

// ------------- RuleEngine -------------
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub removed: usize,
    pub skipped: Vec<RuleError>,
}

pub struct RuleEngine {
    current: RwLock<Arc<RuleSet>>,
    // serializes writers; readers only ever take `current`
    writer: Mutex<()>,
    mappings: RwLock<HashMap<String, String>>,
    translator: QueryTranslator,
}

impl RuleEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let indexes = config
            .indexes
            .iter()
            .map(|i| RuleIndex::new(&i.field, i.bucketing))
            .collect();
        let options = ExecOptions {
            splits_enabled: config.splits_enabled,
        };
        Self {
            current: RwLock::new(Arc::new(RuleSet::new(indexes, options))),
            writer: Mutex::new(()),
            mappings: RwLock::new(HashMap::new()),
            translator: QueryTranslator::new(config.recur_date_bounds),
        }
    }
    pub fn snapshot(&self) -> Result<Arc<RuleSet>> {
        self.current
            .read()
            .map(|set| Arc::clone(&set))
            .map_err(|e| RuleError::Lock(e.to_string()))
    }
    fn publish(&self, set: RuleSet) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| RuleError::Lock(e.to_string()))?;
        *current = Arc::new(set);
        Ok(())
    }
    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|e| RuleError::Lock(e.to_string()))
    }
    fn remapped(&self, mut rule: Rule) -> Result<Rule> {
        let mappings = self
            .mappings
            .read()
            .map_err(|e| RuleError::Lock(e.to_string()))?;
        if !mappings.is_empty() {
            rule.remap(&|id: &str| mappings.get(id).cloned());
        }
        Ok(rule)
    }

    pub fn run_rules(&self, record: &Record) -> Result<Record> {
        Ok(self.snapshot()?.run(record))
    }

    /// Replaces every rule with the live rows given. Rows that fail to load
    /// are skipped and reported.
    pub fn load(&self, rows: &[RuleRow]) -> Result<LoadReport> {
        let _guard = self.lock_writer()?;
        let mut report = LoadReport::default();
        let mut rules = Vec::new();
        for row in rows.iter().filter(|r| !r.tombstone) {
            match row.to_rule().and_then(|rule| self.remapped(rule)) {
                Ok(rule) => rules.push(Arc::new(rule)),
                Err(e) => {
                    warn!(rule_id = %row.id, error = %e, "skipping rule");
                    report.skipped.push(e);
                }
            }
        }
        report.loaded = rules.len();
        let set = self.snapshot()?.rebuild(rules)?;
        self.publish(set)?;
        info!(loaded = report.loaded, skipped = report.skipped.len(), "rules loaded");
        Ok(report)
    }

    /// Applies a batch of changed rows from the store: tombstones delete,
    /// everything else upserts. The batch becomes visible at once.
    pub fn apply_changes(&self, rows: &[RuleRow]) -> Result<LoadReport> {
        let _guard = self.lock_writer()?;
        let current = self.snapshot()?;
        let mut set = RuleSet::clone(&current);
        let mut report = LoadReport::default();
        for row in rows {
            if row.tombstone {
                if set.remove(&row.id).is_some() {
                    report.removed += 1;
                }
                continue;
            }
            match row
                .to_rule()
                .and_then(|rule| self.remapped(rule))
                .and_then(|rule| set.insert(rule))
            {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    warn!(rule_id = %row.id, error = %e, "skipping changed rule");
                    report.skipped.push(e);
                }
            }
        }
        self.publish(set)?;
        debug!(
            upserted = report.loaded,
            removed = report.removed,
            "rule changes applied"
        );
        Ok(report)
    }

    pub fn insert_rule(&self, descriptor: &RuleDescriptor) -> Result<()> {
        let _guard = self.lock_writer()?;
        let rule = self.remapped(Rule::new(descriptor)?)?;
        let current = self.snapshot()?;
        let mut set = RuleSet::clone(&current);
        set.insert(rule)?;
        self.publish(set)
    }
    pub fn delete_rule(&self, id: &str) -> Result<bool> {
        let _guard = self.lock_writer()?;
        let current = self.snapshot()?;
        let mut set = RuleSet::clone(&current);
        let removed = set.remove(id).is_some();
        if removed {
            self.publish(set)?;
        }
        Ok(removed)
    }

    /// Installs a new id mapping and remaps every rule from its authored
    /// values in a single rebuild.
    pub fn set_mappings(&self, mappings: HashMap<String, String>) -> Result<()> {
        let _guard = self.lock_writer()?;
        let lookup = |id: &str| mappings.get(id).cloned();
        let current = self.snapshot()?;
        let rules: Vec<Arc<Rule>> = current
            .rules()
            .map(|rule| {
                let mut rule = Rule::clone(rule);
                rule.remap(&lookup);
                Arc::new(rule)
            })
            .collect();
        let set = current.rebuild(rules)?;
        *self
            .mappings
            .write()
            .map_err(|e| RuleError::Lock(e.to_string()))? = mappings.clone();
        self.publish(set)?;
        info!(mappings = mappings.len(), "rules remapped");
        Ok(())
    }

    pub fn translate(&self, conditions: &[ConditionDescriptor]) -> Translation {
        self.translator.translate_descriptors(conditions)
    }
    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }
}
