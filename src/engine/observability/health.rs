//! Health report
//!
//! Database reachability, policy snapshot state, cache size and audit
//! pipeline counters.

use serde::Serialize;

use crate::engine::audit::StatsSnapshot;
use crate::engine::database::Database;
use crate::engine::rbac::PolicyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

impl HealthCheck {
    fn new(name: &str, status: HealthStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn collect(db: &Database, store: &PolicyStore, cached_users: usize, audit: Option<StatsSnapshot>) -> Self {
        let mut checks = Vec::new();

        checks.push(match db.count_rows("roles") {
            Ok(count) => HealthCheck::new("database", HealthStatus::Healthy, format!("{} roles", count)),
            Err(e) => HealthCheck::new("database", HealthStatus::Critical, e.to_string()),
        });

        let rules = store.len();
        checks.push(HealthCheck::new(
            "policy",
            if rules == 0 { HealthStatus::Warning } else { HealthStatus::Healthy },
            format!("version {}, {} rules", store.version(), rules),
        ));

        checks.push(HealthCheck::new(
            "cache",
            HealthStatus::Healthy,
            format!("{} cached users", cached_users),
        ));

        if let Some(stats) = audit {
            checks.push(HealthCheck::new(
                "audit",
                if stats.failed_batches > 0 { HealthStatus::Warning } else { HealthStatus::Healthy },
                format!(
                    "{} batches flushed, {} events written, {} batches failed",
                    stats.flushed_batches, stats.written_events, stats.failed_batches
                ),
            ));
        }

        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, |acc, s| match (acc, s) {
                (HealthStatus::Critical, _) | (_, HealthStatus::Critical) => HealthStatus::Critical,
                (HealthStatus::Warning, _) | (_, HealthStatus::Warning) => HealthStatus::Warning,
                _ => HealthStatus::Healthy,
            });

        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rbac::PolicyRule;

    #[test]
    fn test_empty_policy_is_a_warning() {
        let db = Database::in_memory().unwrap();
        let store = PolicyStore::sqlite(db.clone()).unwrap();
        let report = HealthReport::collect(&db, &store, 0, None);
        assert_eq!(report.status, HealthStatus::Warning);

        store.add_rules(&[PolicyRule::new("admin", "/role/list", "GET")]).unwrap();
        store.load().unwrap();
        let report = HealthReport::collect(&db, &store, 2, None);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.len(), 3);
    }

    #[test]
    fn test_failed_audit_batches_warn() {
        let db = Database::in_memory().unwrap();
        let store = PolicyStore::sqlite(db.clone()).unwrap();
        store.add_rules(&[PolicyRule::new("admin", "/role/list", "GET")]).unwrap();
        store.load().unwrap();
        let stats = StatsSnapshot {
            flushed_batches: 2,
            written_events: 5,
            failed_batches: 1,
        };
        let report = HealthReport::collect(&db, &store, 0, Some(stats));
        assert_eq!(report.status, HealthStatus::Warning);
    }
}
