//! Role storage

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::menus::{menu_from_row, MENU_COLUMNS};
use super::placeholders;
use crate::engine::database::{Database, DatabaseError};
use crate::engine::models::{Menu, NewRole, Role, Status};

pub(crate) const ROLE_COLUMNS: &str = "id, name, keyword, description, status, sort, creator";

pub(crate) fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        keyword: row.get(2)?,
        description: row.get(3)?,
        status: Status::from_code(row.get(4)?),
        sort: row.get(5)?,
        creator: row.get(6)?,
    })
}

#[derive(Clone)]
pub struct RoleRepository {
    db: Database,
}

impl RoleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<Role>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM roles ORDER BY sort, id", ROLE_COLUMNS))?;
        let roles = stmt
            .query_map([], role_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    pub fn get(&self, id: i64) -> Result<Role, DatabaseError> {
        let conn = self.db.get_connection()?;
        conn.query_row(
            &format!("SELECT {} FROM roles WHERE id = ?1", ROLE_COLUMNS),
            [id],
            role_from_row,
        )
        .optional()?
        .ok_or_else(|| DatabaseError::NotFound(format!("role {}", id)))
    }

    pub fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Role>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.db.get_connection()?;
        select_by_ids(&conn, ids)
    }

    /// Keywords of every role holding exactly `rank`.
    pub fn keywords_with_rank(&self, rank: u32) -> Result<Vec<String>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare("SELECT keyword FROM roles WHERE sort = ?1 ORDER BY id")?;
        let keywords = stmt
            .query_map([rank], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keywords)
    }

    pub fn create(&self, role: &NewRole, creator: &str) -> Result<Role, DatabaseError> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO roles (name, keyword, description, status, sort, creator) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![role.name, role.keyword, role.description, role.status.code(), role.sort, creator],
        )
        .map_err(|e| DatabaseError::from_write(e, &format!("role keyword or name '{}'", role.keyword)))?;
        let id = conn.last_insert_rowid();
        Ok(Role {
            id,
            name: role.name.clone(),
            keyword: role.keyword.clone(),
            description: role.description.clone(),
            status: role.status,
            sort: role.sort,
            creator: creator.to_string(),
        })
    }

    pub fn update(&self, id: i64, role: &NewRole) -> Result<Role, DatabaseError> {
        let conn = self.db.get_connection()?;
        let affected = conn
            .execute(
                "UPDATE roles SET name = ?1, keyword = ?2, description = ?3, status = ?4, sort = ?5 WHERE id = ?6",
                params![role.name, role.keyword, role.description, role.status.code(), role.sort, id],
            )
            .map_err(|e| DatabaseError::from_write(e, &format!("role keyword or name '{}'", role.keyword)))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("role {}", id)));
        }
        conn.query_row(
            &format!("SELECT {} FROM roles WHERE id = ?1", ROLE_COLUMNS),
            [id],
            role_from_row,
        )
        .map_err(DatabaseError::from)
    }

    /// Deletes the roles and their user/menu links, returning what was removed.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<Vec<Role>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.db.get_connection()?;
        let roles = select_by_ids(&conn, ids)?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM roles WHERE id IN ({})", placeholders(ids.len())),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;
        Ok(roles)
    }

    pub fn menus(&self, role_id: i64) -> Result<Vec<Menu>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let columns = MENU_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM menus m JOIN role_menus rm ON rm.menu_id = m.id WHERE rm.role_id = ?1 ORDER BY m.sort, m.id",
            columns
        ))?;
        let menus = stmt
            .query_map([role_id], menu_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(menus)
    }

    pub fn replace_menus(&self, role_id: i64, menu_ids: &[i64]) -> Result<(), DatabaseError> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM role_menus WHERE role_id = ?1", [role_id])?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO role_menus (role_id, menu_id) VALUES (?1, ?2)")?;
            for menu_id in menu_ids {
                stmt.execute(params![role_id, menu_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn select_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Role>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM roles WHERE id IN ({}) ORDER BY sort, id",
        ROLE_COLUMNS,
        placeholders(ids.len())
    ))?;
    let roles = stmt
        .query_map(params_from_iter(ids.iter()), role_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roles)
}
