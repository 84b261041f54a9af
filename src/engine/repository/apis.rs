//! API catalogue storage

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::placeholders;
use crate::engine::database::{Database, DatabaseError};
use crate::engine::models::{Api, NewApi};

const API_COLUMNS: &str = "id, method, path, category, description, creator";

fn api_from_row(row: &Row<'_>) -> rusqlite::Result<Api> {
    Ok(Api {
        id: row.get(0)?,
        method: row.get(1)?,
        path: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        creator: row.get(5)?,
    })
}

#[derive(Clone)]
pub struct ApiRepository {
    db: Database,
}

impl ApiRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<Api>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM apis ORDER BY category, path, method", API_COLUMNS))?;
        let apis = stmt
            .query_map([], api_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(apis)
    }

    pub fn get(&self, id: i64) -> Result<Api, DatabaseError> {
        let conn = self.db.get_connection()?;
        conn.query_row(&format!("SELECT {} FROM apis WHERE id = ?1", API_COLUMNS), [id], api_from_row)
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("api {}", id)))
    }

    pub fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Api>, DatabaseError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM apis WHERE id IN ({}) ORDER BY id",
            API_COLUMNS,
            placeholders(ids.len())
        ))?;
        let apis = stmt
            .query_map(params_from_iter(ids.iter()), api_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(apis)
    }

    /// Description of the catalogue entry for a route template, if any.
    pub fn description_for(&self, path: &str, method: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.db.get_connection()?;
        let description = conn
            .query_row(
                "SELECT description FROM apis WHERE path = ?1 AND method = ?2",
                params![path, method.to_uppercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(description)
    }

    pub fn create(&self, api: &NewApi, creator: &str) -> Result<Api, DatabaseError> {
        let conn = self.db.get_connection()?;
        let method = api.method.to_uppercase();
        conn.execute(
            "INSERT INTO apis (method, path, category, description, creator) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![method, api.path, api.category, api.description, creator],
        )
        .map_err(|e| DatabaseError::from_write(e, &format!("api {} {}", method, api.path)))?;
        Ok(Api {
            id: conn.last_insert_rowid(),
            method,
            path: api.path.clone(),
            category: api.category.clone(),
            description: api.description.clone(),
            creator: creator.to_string(),
        })
    }

    /// Updates the record, returning the previous and the new version.
    pub fn update(&self, id: i64, api: &NewApi) -> Result<(Api, Api), DatabaseError> {
        let old = self.get(id)?;
        let conn = self.db.get_connection()?;
        let method = api.method.to_uppercase();
        conn.execute(
            "UPDATE apis SET method = ?1, path = ?2, category = ?3, description = ?4 WHERE id = ?5",
            params![method, api.path, api.category, api.description, id],
        )
        .map_err(|e| DatabaseError::from_write(e, &format!("api {} {}", method, api.path)))?;
        let new = Api {
            id,
            method,
            path: api.path.clone(),
            category: api.category.clone(),
            description: api.description.clone(),
            creator: old.creator.clone(),
        };
        Ok((old, new))
    }

    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<Vec<Api>, DatabaseError> {
        let apis = self.get_by_ids(ids)?;
        if apis.is_empty() {
            return Ok(apis);
        }
        let conn = self.db.get_connection()?;
        conn.execute(
            &format!("DELETE FROM apis WHERE id IN ({})", placeholders(ids.len())),
            params_from_iter(ids.iter()),
        )?;
        Ok(apis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_api(method: &str, path: &str) -> NewApi {
        NewApi {
            method: method.to_string(),
            path: path.to_string(),
            category: "user".to_string(),
            description: format!("{} {}", method, path),
        }
    }

    #[test]
    fn test_create_uppercases_method() {
        let repo = ApiRepository::new(Database::in_memory().unwrap());
        let api = repo.create(&new_api("get", "/user/list"), "system").unwrap();
        assert_eq!(api.method, "GET");
        assert_eq!(
            repo.description_for("/user/list", "get").unwrap().as_deref(),
            Some("get /user/list")
        );
        assert_eq!(repo.description_for("/nope", "GET").unwrap(), None);
    }

    #[test]
    fn test_duplicate_path_method_conflicts() {
        let repo = ApiRepository::new(Database::in_memory().unwrap());
        repo.create(&new_api("GET", "/user/list"), "system").unwrap();
        assert!(matches!(
            repo.create(&new_api("get", "/user/list"), "system"),
            Err(DatabaseError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_returns_old_and_new() {
        let repo = ApiRepository::new(Database::in_memory().unwrap());
        let api = repo.create(&new_api("GET", "/user/list"), "system").unwrap();
        let (old, new) = repo.update(api.id, &new_api("POST", "/user/all")).unwrap();
        assert_eq!(old.path, "/user/list");
        assert_eq!(new.method, "POST");
        assert_eq!(repo.get(api.id).unwrap().path, "/user/all");
    }

    #[test]
    fn test_delete_by_ids() {
        let repo = ApiRepository::new(Database::in_memory().unwrap());
        let api = repo.create(&new_api("GET", "/user/list"), "system").unwrap();
        assert_eq!(repo.delete_by_ids(&[api.id, 99]).unwrap().len(), 1);
        assert!(repo.list().unwrap().is_empty());
    }
}
