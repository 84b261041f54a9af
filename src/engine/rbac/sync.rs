//! Policy synchronizer
//!
//! Keeps the policy store in line with role and API mutations. Every
//! sequence ends with a reload, and sequences never interleave.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error};

use super::policy::{PolicyError, PolicyRule, PolicyStore, SyncStep};

#[derive(Error, Debug)]
pub enum SyncError {
    /// The entity change is stored; the rule change is not fully applied.
    #[error("{entity} was saved but permission sync failed on {step}: {source}")]
    Partial {
        entity: String,
        step: SyncStep,
        #[source]
        source: PolicyError,
    },
}

impl SyncError {
    fn partial(entity: &str, default_step: SyncStep, source: PolicyError) -> Self {
        let step = source.step().unwrap_or(default_step);
        error!(entity, %step, error = %source, "Permission sync failed");
        SyncError::Partial {
            entity: entity.to_string(),
            step,
            source,
        }
    }

    pub fn step(&self) -> SyncStep {
        match self {
            SyncError::Partial { step, .. } => *step,
        }
    }
}

pub struct PolicySynchronizer {
    store: Arc<PolicyStore>,
    lock: Mutex<()>,
}

/// Rule operations available while the sequence lock is held.
pub struct SyncSession<'a> {
    store: &'a PolicyStore,
}

impl PolicySynchronizer {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Runs `f` under the sequence lock. Entity reads and writes made inside
    /// `f` cannot interleave with any other sequence. `f` must not call back
    /// into this synchronizer.
    pub fn locked<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&SyncSession<'_>) -> Result<T, E>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        f(&SyncSession { store: &self.store })
    }

    /// Moves every rule of `old` onto `new`.
    pub fn rename_subject(&self, entity: &str, old: &str, new: &str) -> Result<(), SyncError> {
        self.locked(|session| session.rename_subject(entity, old, new))
    }

    /// Moves every rule on `(old_object, old_action)` onto the new pair.
    pub fn update_object(&self, entity: &str, old: (&str, &str), new: (&str, &str)) -> Result<(), SyncError> {
        self.locked(|session| session.update_object(entity, old, new))
    }

    pub fn remove_subjects(&self, entity: &str, subjects: &[String]) -> Result<(), SyncError> {
        self.locked(|session| session.remove_subjects(entity, subjects))
    }

    pub fn remove_objects(&self, entity: &str, objects: &[(String, String)]) -> Result<(), SyncError> {
        self.locked(|session| session.remove_objects(entity, objects))
    }

    /// Makes `subject`'s rules exactly `requested`: adds first, then removes.
    pub fn set_subject_rules(&self, entity: &str, subject: &str, requested: &[PolicyRule]) -> Result<(), SyncError> {
        self.locked(|session| session.set_subject_rules(entity, subject, requested))
    }

    pub fn grant(&self, entity: &str, rules: &[PolicyRule]) -> Result<(), SyncError> {
        self.locked(|session| session.grant(entity, rules))
    }
}

impl SyncSession<'_> {
    fn run<F>(&self, entity: &str, default_step: SyncStep, mutate: F) -> Result<(), SyncError>
    where
        F: FnOnce(&PolicyStore) -> Result<(), PolicyError>,
    {
        let mutated = mutate(self.store);
        // Reload even after a failed step so checks see what was stored.
        let loaded = self.store.load();
        match (mutated, loaded) {
            (Err(e), _) => Err(SyncError::partial(entity, default_step, e)),
            (Ok(()), Err(e)) => Err(SyncError::partial(entity, SyncStep::Reload, e.at(SyncStep::Reload))),
            (Ok(()), Ok(_)) => Ok(()),
        }
    }

    pub fn rename_subject(&self, entity: &str, old: &str, new: &str) -> Result<(), SyncError> {
        if old == new {
            return Ok(());
        }
        self.run(entity, SyncStep::Add, |store| {
            let current = store.query_by_subject(old);
            let renamed: Vec<PolicyRule> = current.iter().map(|r| r.with_subject(new)).collect();
            debug!(old, new, rules = current.len(), "Renaming policy subject");
            store.replace_rules(&current, &renamed)
        })
    }

    pub fn update_object(
        &self,
        entity: &str,
        (old_object, old_action): (&str, &str),
        (new_object, new_action): (&str, &str),
    ) -> Result<(), SyncError> {
        if old_object == new_object && old_action.eq_ignore_ascii_case(new_action) {
            return Ok(());
        }
        self.run(entity, SyncStep::Add, |store| {
            let current = store.query_by_object_action(old_object, old_action);
            let moved: Vec<PolicyRule> = current
                .iter()
                .map(|r| PolicyRule::new(r.subject.clone(), new_object, new_action))
                .collect();
            store.replace_rules(&current, &moved)
        })
    }

    pub fn remove_subjects(&self, entity: &str, subjects: &[String]) -> Result<(), SyncError> {
        self.run(entity, SyncStep::Remove, |store| {
            let rules: Vec<PolicyRule> = subjects.iter().flat_map(|s| store.query_by_subject(s)).collect();
            store.remove_rules(&rules)
        })
    }

    pub fn remove_objects(&self, entity: &str, objects: &[(String, String)]) -> Result<(), SyncError> {
        self.run(entity, SyncStep::Remove, |store| {
            let rules: Vec<PolicyRule> = objects
                .iter()
                .flat_map(|(object, action)| store.query_by_object_action(object, action))
                .collect();
            store.remove_rules(&rules)
        })
    }

    pub fn set_subject_rules(&self, entity: &str, subject: &str, requested: &[PolicyRule]) -> Result<(), SyncError> {
        self.run(entity, SyncStep::Add, |store| {
            let current = store.query_by_subject(subject);
            store.replace_rules(&current, requested)
        })
    }

    pub fn grant(&self, entity: &str, rules: &[PolicyRule]) -> Result<(), SyncError> {
        self.run(entity, SyncStep::Add, |store| store.add_rules(rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::database::Database;

    fn synchronizer() -> PolicySynchronizer {
        let store = PolicyStore::sqlite(Database::in_memory().unwrap()).unwrap();
        PolicySynchronizer::new(Arc::new(store))
    }

    #[test]
    fn test_rename_subject() {
        let sync = synchronizer();
        sync.grant("seed", &[
            PolicyRule::new("user", "/user/list", "GET"),
            PolicyRule::new("guest", "/user/list", "GET"),
        ])
        .unwrap();

        sync.rename_subject("role member", "user", "member").unwrap();
        let store = sync.store();
        assert!(store.enforce("member", "/user/list", "GET"));
        assert!(!store.enforce("user", "/user/list", "GET"));
        assert!(store.enforce("guest", "/user/list", "GET"));
    }

    #[test]
    fn test_update_object() {
        let sync = synchronizer();
        sync.grant("seed", &[
            PolicyRule::new("admin", "/api/list", "GET"),
            PolicyRule::new("user", "/api/list", "GET"),
        ])
        .unwrap();

        sync.update_object("api /api/all", ("/api/list", "GET"), ("/api/all", "post")).unwrap();
        let store = sync.store();
        assert!(store.enforce("admin", "/api/all", "POST"));
        assert!(store.enforce("user", "/api/all", "POST"));
        assert!(store.query_by_object_action("/api/list", "GET").is_empty());
    }

    #[test]
    fn test_set_subject_rules_is_exact() {
        let sync = synchronizer();
        sync.grant("seed", &[
            PolicyRule::new("user", "/a", "GET"),
            PolicyRule::new("user", "/b", "GET"),
        ])
        .unwrap();

        sync.set_subject_rules("role user", "user", &[PolicyRule::new("user", "/c", "GET")]).unwrap();
        assert_eq!(sync.store().query_by_subject("user"), vec![PolicyRule::new("user", "/c", "GET")]);
        assert!(!sync.store().enforce("user", "/a", "GET"));
    }

    #[test]
    fn test_remove_subjects_and_objects() {
        let sync = synchronizer();
        sync.grant("seed", &[
            PolicyRule::new("user", "/a", "GET"),
            PolicyRule::new("guest", "/b", "GET"),
            PolicyRule::new("admin", "/b", "GET"),
        ])
        .unwrap();

        sync.remove_subjects("roles", &["user".to_string()]).unwrap();
        sync.remove_objects("apis", &[("/b".to_string(), "GET".to_string())]).unwrap();
        assert!(sync.store().is_empty());
    }

    #[test]
    fn test_locked_excludes_other_sequences() {
        let sync = Arc::new(synchronizer());
        let (tx, rx) = std::sync::mpsc::channel();

        let writer = sync.locked(|session| {
            let other = {
                let sync = sync.clone();
                std::thread::spawn(move || {
                    sync.grant("other", &[PolicyRule::new("guest", "/b", "GET")]).unwrap();
                    tx.send(()).unwrap();
                })
            };
            // The other grant waits for this sequence to finish.
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(rx.try_recv().is_err());
            session.grant("first", &[PolicyRule::new("user", "/a", "GET")])?;
            Ok::<_, SyncError>(other)
        });
        writer.unwrap().join().unwrap();
        assert_eq!(sync.store().len(), 2);
    }
}
