//! Menu storage

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::placeholders;
use crate::engine::database::{Database, DatabaseError};
use crate::engine::models::{Menu, NewMenu, Status};

pub(crate) const MENU_COLUMNS: &str = "id, name, title, path, parent_id, sort, status, creator";

pub(crate) fn menu_from_row(row: &Row<'_>) -> rusqlite::Result<Menu> {
    Ok(Menu {
        id: row.get(0)?,
        name: row.get(1)?,
        title: row.get(2)?,
        path: row.get(3)?,
        parent_id: row.get(4)?,
        sort: row.get(5)?,
        status: Status::from_code(row.get(6)?),
        creator: row.get(7)?,
    })
}

#[derive(Clone)]
pub struct MenuRepository {
    db: Database,
}

impl MenuRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<Menu>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM menus ORDER BY sort, id", MENU_COLUMNS))?;
        let menus = stmt
            .query_map([], menu_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(menus)
    }

    pub fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Menu>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM menus WHERE id IN ({}) ORDER BY sort, id",
            MENU_COLUMNS,
            placeholders(ids.len())
        ))?;
        let menus = stmt
            .query_map(params_from_iter(ids.iter()), menu_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(menus)
    }

    pub fn create(&self, menu: &NewMenu, creator: &str) -> Result<Menu, DatabaseError> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO menus (name, title, path, parent_id, sort, status, creator) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![menu.name, menu.title, menu.path, menu.parent_id, menu.sort, menu.status.code(), creator],
        )?;
        Ok(Menu {
            id: conn.last_insert_rowid(),
            name: menu.name.clone(),
            title: menu.title.clone(),
            path: menu.path.clone(),
            parent_id: menu.parent_id,
            sort: menu.sort,
            status: menu.status,
            creator: creator.to_string(),
        })
    }

    pub fn get(&self, id: i64) -> Result<Menu, DatabaseError> {
        let conn = self.db.get_connection()?;
        conn.query_row(&format!("SELECT {} FROM menus WHERE id = ?1", MENU_COLUMNS), [id], menu_from_row)
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("menu {}", id)))
    }

    pub fn update(&self, id: i64, menu: &NewMenu) -> Result<Menu, DatabaseError> {
        let conn = self.db.get_connection()?;
        let affected = conn.execute(
            "UPDATE menus SET name = ?1, title = ?2, path = ?3, parent_id = ?4, sort = ?5, status = ?6 WHERE id = ?7",
            params![menu.name, menu.title, menu.path, menu.parent_id, menu.sort, menu.status.code(), id],
        )?;
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("menu {}", id)));
        }
        conn.query_row(&format!("SELECT {} FROM menus WHERE id = ?1", MENU_COLUMNS), [id], menu_from_row)
            .map_err(DatabaseError::from)
    }

    /// Ids of menus whose parent is one of `ids`.
    pub fn child_ids(&self, ids: &[i64]) -> Result<Vec<i64>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM menus WHERE parent_id IN ({}) ORDER BY id",
            placeholders(ids.len())
        ))?;
        let children = stmt
            .query_map(params_from_iter(ids.iter()), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(children)
    }

    /// Deletes the menus and returns the removed records. Role links go
    /// with them through the foreign key cascade.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<Vec<Menu>, DatabaseError> {
        let menus = self.get_by_ids(ids)?;
        if menus.is_empty() {
            return Ok(menus);
        }
        let conn = self.db.get_connection()?;
        conn.execute(
            &format!("DELETE FROM menus WHERE id IN ({})", placeholders(ids.len())),
            params_from_iter(ids.iter()),
        )?;
        Ok(menus)
    }

    /// Menus reachable through the user's active roles, deduplicated.
    pub fn user_menus(&self, user_id: i64) -> Result<Vec<Menu>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let columns = MENU_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT {} FROM menus m
             JOIN role_menus rm ON rm.menu_id = m.id
             JOIN roles r ON r.id = rm.role_id
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ?1 AND r.status = ?2
             ORDER BY m.sort, m.id",
            columns
        ))?;
        let menus = stmt
            .query_map(params![user_id, Status::Active.code()], menu_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(menus)
    }
}
