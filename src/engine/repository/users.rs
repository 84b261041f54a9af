//! User storage, including the user/role links

use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};

use super::{page_window, placeholders};
use super::roles::{role_from_row, ROLE_COLUMNS};
use crate::engine::database::{Database, DatabaseError};
use crate::engine::models::{NewUser, Role, Status, User, UserQuery, UserUpdate};

const USER_COLUMNS: &str = "id, username, password, nickname, status, creator";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        nickname: row.get(3)?,
        status: Status::from_code(row.get(4)?),
        creator: row.get(5)?,
        roles: vec![],
    })
}

fn roles_of(conn: &Connection, user_id: i64) -> Result<Vec<Role>, DatabaseError> {
    let columns = ROLE_COLUMNS
        .split(", ")
        .map(|c| format!("r.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ?1 ORDER BY r.sort, r.id",
        columns
    ))?;
    let roles = stmt
        .query_map([user_id], role_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roles)
}

fn with_roles(conn: &Connection, mut user: User) -> Result<User, DatabaseError> {
    user.roles = roles_of(conn, user.id)?;
    Ok(user)
}

fn link_roles(conn: &Connection, user_id: i64, role_ids: &[i64]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)")?;
    for role_id in role_ids {
        stmt.execute(params![user_id, role_id])
            .map_err(|e| DatabaseError::from_write(e, &format!("role {}", role_id)))?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Filtered page of users plus the total match count.
    pub fn search(&self, query: &UserQuery) -> Result<(Vec<User>, i64), DatabaseError> {
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(username) = query.username.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(format!("%{}%", username)));
            clauses.push(format!("username LIKE ?{}", args.len()));
        }
        if let Some(nickname) = query.nickname.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(format!("%{}%", nickname)));
            clauses.push(format!("nickname LIKE ?{}", args.len()));
        }
        if let Some(status) = query.status {
            args.push(SqlValue::Integer(status.code()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let window = match (query.page_num, query.page_size) {
            (Some(num), Some(size)) if num > 0 && size > 0 => {
                let (limit, offset) = page_window(Some(num), Some(size));
                format!(" LIMIT {} OFFSET {}", limit, offset)
            }
            _ => String::new(),
        };

        let conn = self.db.get_connection()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users{}", filter),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        let users = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users{} ORDER BY id{}",
                USER_COLUMNS, filter, window
            ))?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let users = users.into_iter().map(|u| with_roles(&conn, u)).collect::<Result<Vec<_>, _>>()?;
        Ok((users, total))
    }

    pub fn get(&self, id: i64) -> Result<User, DatabaseError> {
        let conn = self.db.get_connection()?;
        let user = conn
            .query_row(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS), [id], user_from_row)
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {}", id)))?;
        with_roles(&conn, user)
    }

    pub fn get_by_username(&self, username: &str) -> Result<User, DatabaseError> {
        let conn = self.db.get_connection()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("user '{}'", username)))?;
        with_roles(&conn, user)
    }

    pub fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.db.get_connection()?;
        let users = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE id IN ({}) ORDER BY id",
                USER_COLUMNS,
                placeholders(ids.len())
            ))?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        users.into_iter().map(|u| with_roles(&conn, u)).collect()
    }

    pub fn create(&self, user: &NewUser, creator: &str) -> Result<User, DatabaseError> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, password, nickname, status, creator) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.username, user.password_hash, user.nickname, user.status.code(), creator],
        )
        .map_err(|e| DatabaseError::from_write(e, &format!("username '{}'", user.username)))?;
        let id = tx.last_insert_rowid();
        link_roles(&tx, id, &user.role_ids)?;
        let created = with_roles(
            &tx,
            User {
                id,
                username: user.username.clone(),
                password_hash: user.password_hash.clone(),
                nickname: user.nickname.clone(),
                status: user.status,
                creator: creator.to_string(),
                roles: vec![],
            },
        )?;
        tx.commit()?;
        Ok(created)
    }

    /// Rewrites the user row and its role links in one transaction.
    pub fn update(&self, id: i64, update: &UserUpdate) -> Result<User, DatabaseError> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        let affected = tx
            .execute(
                "UPDATE users SET username = ?1, nickname = ?2, status = ?3 WHERE id = ?4",
                params![update.username, update.nickname, update.status.code(), id],
            )
            .map_err(|e| DatabaseError::from_write(e, &format!("username '{}'", update.username)))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", id)));
        }
        if let Some(hash) = &update.password_hash {
            tx.execute("UPDATE users SET password = ?1 WHERE id = ?2", params![hash, id])?;
        }
        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", [id])?;
        link_roles(&tx, id, &update.role_ids)?;
        let user = tx.query_row(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS), [id], user_from_row)?;
        let updated = with_roles(&tx, user)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn set_password(&self, username: &str, password_hash: &str) -> Result<(), DatabaseError> {
        let conn = self.db.get_connection()?;
        let affected = conn.execute(
            "UPDATE users SET password = ?1 WHERE username = ?2",
            params![password_hash, username],
        )?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("user '{}'", username)));
        }
        Ok(())
    }

    /// Deletes the users and returns the removed records.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, DatabaseError> {
        let users = self.get_by_ids(ids)?;
        if users.is_empty() {
            return Ok(users);
        }
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM users WHERE id IN ({})", placeholders(ids.len())),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_roles(db: &Database) {
        let conn = db.get_connection().unwrap();
        conn.execute_batch(
            "INSERT INTO roles (id, name, keyword, sort) VALUES (1, 'Admin', 'admin', 1);
             INSERT INTO roles (id, name, keyword, sort) VALUES (2, 'User', 'user', 3);",
        )
        .unwrap();
    }

    fn new_user(username: &str, role_ids: Vec<i64>) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            nickname: None,
            status: Status::Active,
            role_ids,
        }
    }

    #[test]
    fn test_create_loads_roles() {
        let db = Database::in_memory().unwrap();
        seed_roles(&db);
        let repo = UserRepository::new(db);
        let user = repo.create(&new_user("alice", vec![2, 1]), "system").unwrap();
        let keywords: Vec<_> = user.roles.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["admin", "user"]);
        assert_eq!(repo.get_by_username("alice").unwrap().id, user.id);
    }

    #[test]
    fn test_update_replaces_roles_and_keeps_password() {
        let db = Database::in_memory().unwrap();
        seed_roles(&db);
        let repo = UserRepository::new(db);
        let user = repo.create(&new_user("alice", vec![1]), "system").unwrap();
        let updated = repo
            .update(
                user.id,
                &UserUpdate {
                    username: "alicia".into(),
                    nickname: Some("Al".into()),
                    status: Status::Disabled,
                    role_ids: vec![2],
                    password_hash: None,
                },
            )
            .unwrap();
        assert_eq!(updated.username, "alicia");
        assert_eq!(updated.role_ids(), vec![2]);
        assert_eq!(updated.password_hash, "hash");
        assert!(!updated.is_active());
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let db = Database::in_memory().unwrap();
        seed_roles(&db);
        let repo = UserRepository::new(db);
        repo.create(&new_user("alice", vec![2]), "system").unwrap();
        assert!(matches!(
            repo.create(&new_user("alice", vec![2]), "system"),
            Err(DatabaseError::Conflict(_))
        ));
    }

    #[test]
    fn test_delete_and_set_password() {
        let db = Database::in_memory().unwrap();
        seed_roles(&db);
        let repo = UserRepository::new(db);
        let user = repo.create(&new_user("alice", vec![2]), "system").unwrap();
        repo.set_password("alice", "new").unwrap();
        assert_eq!(repo.get(user.id).unwrap().password_hash, "new");

        let removed = repo.delete_by_ids(&[user.id]).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(matches!(repo.get_by_username("alice"), Err(DatabaseError::NotFound(_))));
        assert!(matches!(repo.set_password("alice", "x"), Err(DatabaseError::NotFound(_))));
    }

    #[test]
    fn test_search_filters_and_pages() {
        let db = Database::in_memory().unwrap();
        seed_roles(&db);
        let repo = UserRepository::new(db);
        for name in ["alice", "alina", "bob"] {
            repo.create(&new_user(name, vec![2]), "system").unwrap();
        }
        let mut disabled = new_user("alfred", vec![2]);
        disabled.status = Status::Disabled;
        repo.create(&disabled, "system").unwrap();

        let (users, total) = repo
            .search(&UserQuery { username: Some("al".into()), ..Default::default() })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(users.len(), 3);
        assert!(users.iter().all(|u| u.roles.len() == 1));

        let (users, total) = repo
            .search(&UserQuery {
                username: Some("al".into()),
                status: Some(Status::Active),
                page_num: Some(2),
                page_size: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alina");

        // A lone page field is ignored.
        let (users, total) = repo.search(&UserQuery { page_size: Some(1), ..Default::default() }).unwrap();
        assert_eq!((users.len(), total), (4, 4));
    }
}
