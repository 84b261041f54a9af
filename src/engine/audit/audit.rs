//! Operation Audit Log
//!
//! Access-log events and the storage they are written to

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value as SqlValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::IntoParams;

use crate::engine::database::{Database, DatabaseError};
use crate::engine::repository::{page_window, placeholders};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Audit pipeline is shut down")]
    Closed,
}

impl From<rusqlite::Error> for AuditError {
    fn from(err: rusqlite::Error) -> Self {
        AuditError::Storage(DatabaseError::SqliteError(err))
    }
}

/// One handled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub username: String,
    pub ip: String,
    pub method: String,
    /// Route template, not the resolved path.
    pub path: String,
    pub description: String,
    pub status: u16,
    pub start_time: DateTime<Utc>,
    /// Milliseconds spent handling the request.
    pub time_cost: i64,
}

/// A stored event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LogQuery {
    pub username: Option<String>,
    pub ip: Option<String>,
    pub path: Option<String>,
    pub status: Option<u16>,
    pub page_num: Option<u32>,
    pub page_size: Option<u32>,
}

/// Destination of flushed audit batches.
pub trait AuditSink: Send + Sync + 'static {
    fn write_batch(&self, events: &[AuditEvent]) -> Result<(), AuditError>;
}

#[derive(Clone)]
pub struct SqliteAuditSink {
    db: Database,
}

impl SqliteAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Filtered, newest-first page of stored events plus the total match count.
    pub fn list(&self, query: &LogQuery) -> Result<(Vec<OperationLog>, i64), AuditError> {
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(username) = query.username.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(format!("%{}%", username)));
            clauses.push(format!("username LIKE ?{}", args.len()));
        }
        if let Some(ip) = query.ip.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(format!("%{}%", ip)));
            clauses.push(format!("ip LIKE ?{}", args.len()));
        }
        if let Some(path) = query.path.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(format!("%{}%", path)));
            clauses.push(format!("path LIKE ?{}", args.len()));
        }
        if let Some(status) = query.status {
            args.push(SqlValue::Integer(status as i64));
            clauses.push(format!("status = ?{}", args.len()));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.db.get_connection()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM operation_logs{}", filter),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let (limit, offset) = page_window(query.page_num, query.page_size);
        let mut stmt = conn.prepare(&format!(
            "SELECT id, username, ip, method, path, description, status, start_time, time_cost
             FROM operation_logs{} ORDER BY id DESC LIMIT {} OFFSET {}",
            filter, limit, offset
        ))?;
        let logs = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let start_time: String = row.get(7)?;
                Ok(OperationLog {
                    id: row.get(0)?,
                    event: AuditEvent {
                        username: row.get(1)?,
                        ip: row.get(2)?,
                        method: row.get(3)?,
                        path: row.get(4)?,
                        description: row.get(5)?,
                        status: row.get(6)?,
                        start_time: DateTime::parse_from_rfc3339(&start_time)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_default(),
                        time_cost: row.get(8)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((logs, total))
    }

    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, AuditError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.db.get_connection()?;
        let removed = conn.execute(
            &format!("DELETE FROM operation_logs WHERE id IN ({})", placeholders(ids.len())),
            params_from_iter(ids.iter()),
        )?;
        Ok(removed)
    }
}

impl AuditSink for SqliteAuditSink {
    fn write_batch(&self, events: &[AuditEvent]) -> Result<(), AuditError> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO operation_logs (username, ip, method, path, description, status, start_time, time_cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.username,
                    event.ip,
                    event.method,
                    event.path,
                    event.description,
                    event.status,
                    event.start_time.to_rfc3339(),
                    event.time_cost,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(username: &str, status: u16) -> AuditEvent {
        AuditEvent {
            username: username.into(),
            ip: "127.0.0.1".into(),
            method: "GET".into(),
            path: "/user/info".into(),
            description: "Current user".into(),
            status,
            start_time: Utc::now(),
            time_cost: 3,
        }
    }

    #[test]
    fn test_write_batch_and_list() {
        let sink = SqliteAuditSink::new(Database::in_memory().unwrap());
        sink.write_batch(&[event("alice", 200), event("bob", 401), event("alice", 200)]).unwrap();

        let (all, total) = sink.list(&LogQuery::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(all[0].event.username, "alice");
        assert_eq!(all[1].event.username, "bob");

        let (denied, total) = sink
            .list(&LogQuery { status: Some(401), ..Default::default() })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(denied[0].event.username, "bob");

        let (page, total) = sink
            .list(&LogQuery { username: Some("ali".into()), page_size: Some(1), page_num: Some(2), ..Default::default() })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_oversized_page_request_is_clamped() {
        let sink = SqliteAuditSink::new(Database::in_memory().unwrap());
        let events: Vec<AuditEvent> = (0..120).map(|_| event("alice", 200)).collect();
        sink.write_batch(&events).unwrap();

        let (page, total) = sink
            .list(&LogQuery { page_num: Some(1), page_size: Some(u32::MAX), ..Default::default() })
            .unwrap();
        assert_eq!(total, 120);
        assert_eq!(page.len(), 100);

        let (page, total) = sink
            .list(&LogQuery { page_num: Some(u32::MAX), page_size: Some(u32::MAX), ..Default::default() })
            .unwrap();
        assert_eq!(total, 120);
        assert!(page.is_empty());
    }

    #[test]
    fn test_delete_by_ids() {
        let sink = SqliteAuditSink::new(Database::in_memory().unwrap());
        sink.write_batch(&[event("alice", 200), event("bob", 200)]).unwrap();
        let (logs, _) = sink.list(&LogQuery::default()).unwrap();
        assert_eq!(sink.delete_by_ids(&[logs[0].id]).unwrap(), 1);
        assert_eq!(sink.list(&LogQuery::default()).unwrap().1, 1);
    }
}
