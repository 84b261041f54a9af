//! Policy Store
//!
//! Permission tuples `(subject, object, action)` persisted through a
//! [`PolicyAdapter`] and answered from an in-memory snapshot.
//!
//! Two in-memory views exist:
//! - the working mirror, updated by every successful durable write and read
//!   by the query operations;
//! - the published snapshot, replaced only by [`PolicyStore::load`] and read
//!   by [`PolicyStore::enforce`]. Publication happens under the same lock the
//!   checks take, so a check sees either the old or the new rule set.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::engine::database::{Database, DatabaseError};

/// A single permission tuple. Actions are stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(subject: impl Into<String>, object: impl Into<String>, action: &str) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.to_uppercase(),
        }
    }

    pub fn with_subject(&self, subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.action, self.object)
    }
}

/// Ordered, deduplicated rule collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeSet<PolicyRule>,
}

impl RuleSet {
    pub fn contains(&self, subject: &str, object: &str, action: &str) -> bool {
        self.rules.contains(&PolicyRule::new(subject, object, action))
    }

    pub fn by_subject(&self, subject: &str) -> Vec<PolicyRule> {
        self.rules.iter().filter(|r| r.subject == subject).cloned().collect()
    }

    pub fn by_object_action(&self, object: &str, action: &str) -> Vec<PolicyRule> {
        let action = action.to_uppercase();
        self.rules
            .iter()
            .filter(|r| r.object == object && r.action == action)
            .cloned()
            .collect()
    }

    pub fn insert_all(&mut self, rules: &[PolicyRule]) {
        self.rules.extend(rules.iter().cloned());
    }

    pub fn remove_all(&mut self, rules: &[PolicyRule]) {
        for rule in rules {
            self.rules.remove(rule);
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter()
    }
}

impl FromIterator<PolicyRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = PolicyRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// Step of a policy mutation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStep {
    Add,
    Remove,
    Reload,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::Add => "add",
            SyncStep::Remove => "remove",
            SyncStep::Reload => "reload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Policy {step} step failed: {source}")]
    Step {
        step: SyncStep,
        #[source]
        source: DatabaseError,
    },
}

impl PolicyError {
    /// Tags an untagged storage error with the step it happened in.
    pub fn at(self, step: SyncStep) -> Self {
        match self {
            PolicyError::Storage(source) => PolicyError::Step { step, source },
            tagged => tagged,
        }
    }

    pub fn step(&self) -> Option<SyncStep> {
        match self {
            PolicyError::Step { step, .. } => Some(*step),
            PolicyError::Storage(_) => None,
        }
    }
}

/// Durable storage for policy rules.
pub trait PolicyAdapter: Send + Sync {
    fn load_rules(&self) -> Result<Vec<PolicyRule>, PolicyError>;

    /// Inserts rules; already present rules are ignored.
    fn add_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError>;

    fn remove_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError>;

    /// Adds `new`, then removes the rules of `old` that are not in `new`.
    fn replace_rules(&self, old: &[PolicyRule], new: &[PolicyRule]) -> Result<(), PolicyError> {
        self.add_rules(new).map_err(|e| e.at(SyncStep::Add))?;
        let stale = stale_rules(old, new);
        self.remove_rules(&stale).map_err(|e| e.at(SyncStep::Remove))
    }
}

fn stale_rules(old: &[PolicyRule], new: &[PolicyRule]) -> Vec<PolicyRule> {
    let keep: BTreeSet<&PolicyRule> = new.iter().collect();
    old.iter().filter(|r| !keep.contains(r)).cloned().collect()
}

/// Adapter over the `policy_rules` table.
#[derive(Clone)]
pub struct SqlitePolicyAdapter {
    db: Database,
}

impl SqlitePolicyAdapter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const INSERT_RULE: &str = "INSERT OR IGNORE INTO policy_rules (subject, object, action) VALUES (?1, ?2, ?3)";
const DELETE_RULE: &str = "DELETE FROM policy_rules WHERE subject = ?1 AND object = ?2 AND action = ?3";

fn execute_each(conn: &rusqlite::Connection, sql: &str, rules: &[PolicyRule]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare_cached(sql)?;
    for rule in rules {
        stmt.execute(params![rule.subject, rule.object, rule.action])?;
    }
    Ok(())
}

impl PolicyAdapter for SqlitePolicyAdapter {
    fn load_rules(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn
            .prepare("SELECT subject, object, action FROM policy_rules ORDER BY id")
            .map_err(DatabaseError::from)?;
        let rules = stmt
            .query_map([], |row| {
                Ok(PolicyRule {
                    subject: row.get(0)?,
                    object: row.get(1)?,
                    action: row.get(2)?,
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(DatabaseError::from)?;
        Ok(rules)
    }

    fn add_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let write = || -> Result<(), DatabaseError> {
            let mut conn = self.db.get_connection()?;
            let tx = conn.transaction()?;
            execute_each(&tx, INSERT_RULE, rules)?;
            tx.commit()?;
            Ok(())
        };
        write().map_err(|source| PolicyError::Step { step: SyncStep::Add, source })
    }

    fn remove_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let write = || -> Result<(), DatabaseError> {
            let mut conn = self.db.get_connection()?;
            let tx = conn.transaction()?;
            execute_each(&tx, DELETE_RULE, rules)?;
            tx.commit()?;
            Ok(())
        };
        write().map_err(|source| PolicyError::Step { step: SyncStep::Remove, source })
    }

    /// Runs both steps in one transaction, so a failure leaves storage unchanged.
    fn replace_rules(&self, old: &[PolicyRule], new: &[PolicyRule]) -> Result<(), PolicyError> {
        let stale = stale_rules(old, new);
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        execute_each(&tx, INSERT_RULE, new).map_err(|source| PolicyError::Step { step: SyncStep::Add, source })?;
        execute_each(&tx, DELETE_RULE, &stale)
            .map_err(|source| PolicyError::Step { step: SyncStep::Remove, source })?;
        tx.commit()
            .map_err(|e| PolicyError::Step { step: SyncStep::Remove, source: e.into() })?;
        Ok(())
    }
}

struct Published {
    rules: Arc<RuleSet>,
    version: u64,
}

/// In-memory policy view backed by a durable adapter.
pub struct PolicyStore {
    adapter: Arc<dyn PolicyAdapter>,
    working: RwLock<RuleSet>,
    /// The check lock.
    published: Mutex<Published>,
}

impl PolicyStore {
    /// Creates the store and publishes the durable rule set.
    pub fn new(adapter: Arc<dyn PolicyAdapter>) -> Result<Self, PolicyError> {
        let store = Self {
            adapter,
            working: RwLock::new(RuleSet::default()),
            published: Mutex::new(Published {
                rules: Arc::new(RuleSet::default()),
                version: 0,
            }),
        };
        store.load()?;
        Ok(store)
    }

    pub fn sqlite(db: Database) -> Result<Self, PolicyError> {
        Self::new(Arc::new(SqlitePolicyAdapter::new(db)))
    }

    /// Rebuilds both views from durable storage and publishes a new version.
    pub fn load(&self) -> Result<u64, PolicyError> {
        let rules: RuleSet = self.adapter.load_rules()?.into_iter().collect();
        let count = rules.len();
        let snapshot = Arc::new(rules.clone());

        *self.working.write().unwrap_or_else(|e| e.into_inner()) = rules;

        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.rules = snapshot;
        published.version += 1;
        debug!(version = published.version, rules = count, "Policy snapshot published");
        Ok(published.version)
    }

    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        let published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.rules.contains(subject, object, action)
    }

    /// True when any of `subjects` is granted, evaluated against one snapshot.
    pub fn enforce_any<S: AsRef<str>>(&self, subjects: &[S], object: &str, action: &str) -> bool {
        let published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        subjects
            .iter()
            .any(|s| published.rules.contains(s.as_ref(), object, action))
    }

    pub fn add_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        if rules.is_empty() {
            return Ok(());
        }
        self.adapter.add_rules(rules).map_err(|e| e.at(SyncStep::Add))?;
        self.working.write().unwrap_or_else(|e| e.into_inner()).insert_all(rules);
        Ok(())
    }

    pub fn remove_rules(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        if rules.is_empty() {
            return Ok(());
        }
        self.adapter.remove_rules(rules).map_err(|e| e.at(SyncStep::Remove))?;
        self.working.write().unwrap_or_else(|e| e.into_inner()).remove_all(rules);
        Ok(())
    }

    pub fn replace_rules(&self, old: &[PolicyRule], new: &[PolicyRule]) -> Result<(), PolicyError> {
        self.adapter.replace_rules(old, new)?;
        let stale = stale_rules(old, new);
        let mut working = self.working.write().unwrap_or_else(|e| e.into_inner());
        working.insert_all(new);
        working.remove_all(&stale);
        Ok(())
    }

    pub fn query_by_subject(&self, subject: &str) -> Vec<PolicyRule> {
        self.working.read().unwrap_or_else(|e| e.into_inner()).by_subject(subject)
    }

    pub fn query_by_object_action(&self, object: &str, action: &str) -> Vec<PolicyRule> {
        self.working
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_object_action(object, action)
    }

    /// The rule set checks are currently answered from.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).rules.clone()
    }

    pub fn version(&self) -> u64 {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).version
    }

    pub fn len(&self) -> usize {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Database, PolicyStore) {
        let db = Database::in_memory().unwrap();
        let store = PolicyStore::sqlite(db.clone()).unwrap();
        (db, store)
    }

    #[test]
    fn test_rule_action_is_uppercased() {
        let rule = PolicyRule::new("user", "/user/list", "get");
        assert_eq!(rule.action, "GET");
        assert_eq!(rule.to_string(), "user GET /user/list");
    }

    #[test]
    fn test_mutations_are_not_visible_until_load() {
        let (_db, store) = store();
        store.add_rules(&[PolicyRule::new("user", "/user/list", "GET")]).unwrap();

        assert!(!store.enforce("user", "/user/list", "GET"));
        assert_eq!(store.query_by_subject("user").len(), 1);

        let version = store.load().unwrap();
        assert_eq!(version, 2);
        assert!(store.enforce("user", "/user/list", "GET"));
        assert!(store.enforce("user", "/user/list", "get"));
        assert!(!store.enforce("user", "/user/list/", "GET"));
    }

    #[test]
    fn test_rules_survive_restart() {
        let (db, store) = store();
        store
            .add_rules(&[
                PolicyRule::new("user", "/user/list", "GET"),
                PolicyRule::new("user", "/user/list", "GET"),
            ])
            .unwrap();
        assert_eq!(db.count_rows("policy_rules").unwrap(), 1);

        let reopened = PolicyStore::sqlite(db).unwrap();
        assert!(reopened.enforce("user", "/user/list", "GET"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_replace_adds_then_removes_stale() {
        let (_db, store) = store();
        let old = vec![
            PolicyRule::new("user", "/a", "GET"),
            PolicyRule::new("user", "/b", "GET"),
        ];
        store.add_rules(&old).unwrap();
        let new = vec![
            PolicyRule::new("user", "/b", "GET"),
            PolicyRule::new("user", "/c", "POST"),
        ];
        store.replace_rules(&old, &new).unwrap();
        store.load().unwrap();

        assert!(!store.enforce("user", "/a", "GET"));
        assert!(store.enforce("user", "/b", "GET"));
        assert!(store.enforce("user", "/c", "POST"));
        assert_eq!(store.query_by_object_action("/c", "post").len(), 1);
    }

    #[test]
    fn test_enforce_any() {
        let (_db, store) = store();
        store.add_rules(&[PolicyRule::new("guest", "/base/health", "GET")]).unwrap();
        store.load().unwrap();
        assert!(store.enforce_any(&["user", "guest"], "/base/health", "GET"));
        assert!(!store.enforce_any(&["user"], "/base/health", "GET"));
        assert!(!store.enforce_any::<&str>(&[], "/base/health", "GET"));
    }

    #[test]
    fn test_error_step_tagging() {
        let err = PolicyError::Storage(DatabaseError::NotFound("x".into())).at(SyncStep::Remove);
        assert_eq!(err.step(), Some(SyncStep::Remove));
        assert_eq!(err.at(SyncStep::Add).step(), Some(SyncStep::Remove));
        assert_eq!(SyncStep::Reload.to_string(), "reload");
    }
}
