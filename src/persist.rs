// used for persistence
use rusqlite::{Connection, Error, Row, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::action::ActionDescriptor;
use crate::condition::ConditionDescriptor;
use crate::error::{Result, RuleError};
use crate::rule::{Rule, RuleDescriptor};
use crate::schema::{to_internal_field, to_public_field};

/// Version of the persisted condition/action encoding written by this crate.
pub const RULE_FORMAT_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

impl PersistenceMode {
    pub fn from_location(location: &str) -> Self {
        if location.is_empty() || location == ":memory:" {
            PersistenceMode::InMemory
        } else {
            PersistenceMode::File(location.to_string())
        }
    }
}

// ------------- RuleRow -------------
/// A rule as stored: conditions and actions are JSON arrays using the
/// internal field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: String,
    pub stage: Option<String>,
    pub conditions_op: String,
    pub conditions: Option<String>,
    pub actions: Option<String>,
    #[serde(default)]
    pub tombstone: bool,
    #[serde(default = "default_version")]
    pub version: i64,
}

fn default_version() -> i64 {
    RULE_FORMAT_VERSION
}

/// Decodes a JSON array item by item, so one malformed entry does not hide
/// the others.
pub fn decode_items<T: DeserializeOwned>(
    json: &str,
) -> std::result::Result<Vec<std::result::Result<T, String>>, String> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("Cannot parse rule json: {e}"))?;
    let Value::Array(items) = value else {
        return Err("Rule json must be an array".to_string());
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value::<T>(item).map_err(|e| e.to_string()))
        .collect())
}

impl RuleRow {
    pub fn from_descriptor(descriptor: &RuleDescriptor) -> Result<Self> {
        let id = descriptor
            .id
            .clone()
            .ok_or_else(|| RuleError::Invariant("rule without an id".to_string()))?;
        let conditions: Vec<ConditionDescriptor> = descriptor
            .conditions
            .iter()
            .cloned()
            .map(|mut c| {
                c.field = to_internal_field(&c.field);
                c
            })
            .collect();
        let actions: Vec<ActionDescriptor> = descriptor
            .actions
            .iter()
            .cloned()
            .map(|mut a| {
                a.field = a.field.as_deref().map(to_internal_field);
                a
            })
            .collect();
        Ok(Self {
            id,
            stage: descriptor.stage.clone(),
            conditions_op: descriptor.conditions_op.clone(),
            conditions: Some(serde_json::to_string(&conditions)?),
            actions: Some(serde_json::to_string(&actions)?),
            tombstone: false,
            version: RULE_FORMAT_VERSION,
        })
    }
    pub fn from_rule(rule: &Rule) -> Result<Self> {
        Self::from_descriptor(&rule.serialize())
    }

    fn load_error(&self, message: impl Into<String>) -> RuleError {
        RuleError::Load {
            id: self.id.clone(),
            message: message.into(),
        }
    }
    fn decode<T: DeserializeOwned>(&self, what: &str, json: Option<&str>) -> Result<Vec<T>> {
        let json = json.ok_or_else(|| self.load_error(format!("missing {what}")))?;
        let items = decode_items::<T>(json).map_err(|e| self.load_error(e))?;
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| item.map_err(|e| self.load_error(format!("{what}[{i}]: {e}"))))
            .collect()
    }

    /// The rule in public field names.
    pub fn to_descriptor(&self) -> Result<RuleDescriptor> {
        if self.version > RULE_FORMAT_VERSION {
            return Err(self.load_error(format!(
                "unsupported rule format version {}",
                self.version
            )));
        }
        let conditions = self
            .decode::<ConditionDescriptor>("conditions", self.conditions.as_deref())?
            .into_iter()
            .map(|mut c| {
                c.field = to_public_field(&c.field);
                c
            })
            .collect();
        let actions = self
            .decode::<ActionDescriptor>("actions", self.actions.as_deref())?
            .into_iter()
            .map(|mut a| {
                a.field = a.field.as_deref().map(to_public_field);
                a
            })
            .collect();
        Ok(RuleDescriptor {
            id: Some(self.id.clone()),
            stage: self.stage.clone(),
            conditions_op: self.conditions_op.clone(),
            conditions,
            actions,
        })
    }
    pub fn to_rule(&self) -> Result<Rule> {
        if self.id.is_empty() {
            return Err(self.load_error("rule without an id"));
        }
        let descriptor = self.to_descriptor()?;
        Rule::new(&descriptor).map_err(|e| self.load_error(e.to_string()))
    }
}

// ------------- RuleStore -------------
pub struct RuleStore {
    connection: Connection,
}

const SELECT_ROWS: &str = "
    select id, stage, conditions_op, conditions, actions, tombstone, version
    from rules
";

fn read_row(row: &Row) -> rusqlite::Result<RuleRow> {
    Ok(RuleRow {
        id: row.get(0)?,
        stage: row.get(1)?,
        conditions_op: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "and".to_string()),
        conditions: row.get(3)?,
        actions: row.get(4)?,
        tombstone: row.get(5)?,
        version: row.get(6)?,
    })
}

impl RuleStore {
    pub fn open(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists rules (
                id text not null primary key,
                stage text,
                conditions_op text not null default 'and',
                conditions text,
                actions text,
                tombstone integer not null default 0,
                version integer not null default 1
            );
            ",
        )?;
        Ok(Self { connection })
    }

    pub fn upsert(&self, row: &RuleRow) -> Result<()> {
        let mut statement = self.connection.prepare_cached(
            "
            insert into rules (id, stage, conditions_op, conditions, actions, tombstone, version)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            on conflict(id) do update set
                stage = excluded.stage,
                conditions_op = excluded.conditions_op,
                conditions = excluded.conditions,
                actions = excluded.actions,
                tombstone = excluded.tombstone,
                version = excluded.version
            ",
        )?;
        statement.execute(params![
            &row.id,
            &row.stage,
            &row.conditions_op,
            &row.conditions,
            &row.actions,
            &row.tombstone,
            &row.version
        ])?;
        debug!(rule_id = %row.id, "rule persisted");
        Ok(())
    }
    /// Persists a rule and returns the row as stored.
    pub fn save(&self, descriptor: &RuleDescriptor) -> Result<RuleRow> {
        let row = RuleRow::from_descriptor(descriptor)?;
        self.upsert(&row)?;
        Ok(row)
    }
    /// Soft-deletes a rule, returning its tombstoned row.
    pub fn tombstone(&self, id: &str) -> Result<Option<RuleRow>> {
        let changed = self
            .connection
            .prepare_cached("update rules set tombstone = 1 where id = ?1 and tombstone = 0")?
            .execute(params![id])?;
        if changed == 0 {
            return Ok(None);
        }
        self.get(id)
    }
    pub fn get(&self, id: &str) -> Result<Option<RuleRow>> {
        let mut statement = self
            .connection
            .prepare_cached(&format!("{SELECT_ROWS} where id = ?1"))?;
        match statement.query_row(params![id], read_row) {
            Ok(row) => Ok(Some(row)),
            Err(Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
    /// Rows that should be loaded into a rule set. Rows missing conditions
    /// or actions are returned so loading reports them.
    pub fn live_rows(&self) -> Result<Vec<RuleRow>> {
        self.rows(&format!(
            "{SELECT_ROWS} where tombstone = 0 order by id"
        ))
    }
    /// Every row, tombstones included.
    pub fn all_rows(&self) -> Result<Vec<RuleRow>> {
        self.rows(&format!("{SELECT_ROWS} order by id"))
    }
    fn rows(&self, sql: &str) -> Result<Vec<RuleRow>> {
        let mut statement = self.connection.prepare_cached(sql)?;
        let rows = statement
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
