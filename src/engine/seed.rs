//! Default data for a fresh database: roles, menus, users, the API
//! catalogue and the rules tying them together.

use tracing::info;

use crate::engine::admin::{AdminError, PasswordHasher};
use crate::engine::database::Database;
use crate::engine::models::{NewApi, NewMenu, NewRole, NewUser, Status};
use crate::engine::rbac::{PolicyRule, PolicySynchronizer};
use crate::engine::repository::{ApiRepository, MenuRepository, RoleRepository, UserRepository};

pub const DEFAULT_PASSWORD: &str = "123456";

const SYSTEM: &str = "system";

/// Every protected route: (method, template, category, description).
pub const API_CATALOGUE: &[(&str, &str, &str, &str)] = &[
    ("GET", "/user/info", "user", "Get current user info"),
    ("GET", "/user/list", "user", "List users"),
    ("PUT", "/user/changePwd", "user", "Change own password"),
    ("POST", "/user/create", "user", "Create user"),
    ("PATCH", "/user/update/:userId", "user", "Update user"),
    ("DELETE", "/user/delete/batch", "user", "Delete users"),
    ("GET", "/role/list", "role", "List roles"),
    ("POST", "/role/create", "role", "Create role"),
    ("PATCH", "/role/update/:roleId", "role", "Update role"),
    ("GET", "/role/menus/get/:roleId", "role", "Get role menus"),
    ("PATCH", "/role/menus/update/:roleId", "role", "Update role menus"),
    ("GET", "/role/apis/get/:roleId", "role", "Get role apis"),
    ("PATCH", "/role/apis/update/:roleId", "role", "Update role apis"),
    ("DELETE", "/role/delete/batch", "role", "Delete roles"),
    ("GET", "/menu/list", "menu", "List menus"),
    ("POST", "/menu/create", "menu", "Create menu"),
    ("PATCH", "/menu/update/:menuId", "menu", "Update menu"),
    ("DELETE", "/menu/delete/batch", "menu", "Delete menus"),
    ("GET", "/menu/access/list/:userId", "menu", "Get user accessible menus"),
    ("GET", "/api/list", "api", "List apis"),
    ("GET", "/api/tree", "api", "Get api tree by category"),
    ("POST", "/api/create", "api", "Create api"),
    ("PATCH", "/api/update/:apiId", "api", "Update api"),
    ("DELETE", "/api/delete/batch", "api", "Delete apis"),
    ("GET", "/log/operation/list", "log", "List operation logs"),
    ("DELETE", "/log/operation/delete/batch", "log", "Delete operation logs"),
];

const USER_APIS: &[(&str, &str)] = &[
    ("GET", "/user/info"),
    ("PUT", "/user/changePwd"),
    ("GET", "/menu/access/list/:userId"),
];

const GUEST_APIS: &[(&str, &str)] = &[("GET", "/user/info"), ("GET", "/menu/access/list/:userId")];

/// (keyword, name, sort, description)
const ROLES: &[(&str, &str, u32, &str)] = &[
    ("admin", "Administrator", 1, "Unrestricted access"),
    ("user", "User", 3, "Regular user"),
    ("guest", "Guest", 5, "Read-only visitor"),
];

/// (name, title, path, parent name, sort)
const MENUS: &[(&str, &str, &str, Option<&str>, u32)] = &[
    ("dashboard", "Dashboard", "/dashboard", None, 1),
    ("system", "System", "/system", None, 10),
    ("users", "Users", "/system/user", Some("system"), 11),
    ("roles", "Roles", "/system/role", Some("system"), 12),
    ("menus", "Menus", "/system/menu", Some("system"), 13),
    ("apis", "APIs", "/system/api", Some("system"), 14),
    ("logs", "Operation Logs", "/log/operation", None, 20),
];

fn role_menus(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "admin" => &["dashboard", "system", "users", "roles", "menus", "apis", "logs"],
        "user" => &["dashboard", "system", "users"],
        _ => &["dashboard"],
    }
}

fn role_rules(keyword: &str) -> Vec<PolicyRule> {
    let apis: Vec<(&str, &str)> = match keyword {
        "admin" => API_CATALOGUE.iter().map(|(method, path, _, _)| (*method, *path)).collect(),
        "user" => USER_APIS.to_vec(),
        _ => GUEST_APIS.to_vec(),
    };
    apis.into_iter()
        .map(|(method, path)| PolicyRule::new(keyword, path, method))
        .collect()
}

/// Seeds an empty database. Returns `false` when roles already exist.
pub fn seed_defaults(db: &Database, sync: &PolicySynchronizer, hasher: &dyn PasswordHasher) -> Result<bool, AdminError> {
    let roles = RoleRepository::new(db.clone());
    if !roles.list()?.is_empty() {
        return Ok(false);
    }
    let menus = MenuRepository::new(db.clone());
    let users = UserRepository::new(db.clone());
    let apis = ApiRepository::new(db.clone());

    let mut menu_ids: Vec<(&str, i64)> = Vec::new();
    for (name, title, path, parent, sort) in MENUS {
        let parent_id = parent
            .and_then(|p| menu_ids.iter().find(|(n, _)| *n == p).map(|(_, id)| *id))
            .unwrap_or(0);
        let menu = menus.create(
            &NewMenu {
                name: name.to_string(),
                title: title.to_string(),
                path: path.to_string(),
                parent_id,
                sort: *sort,
                status: Status::Active,
            },
            SYSTEM,
        )?;
        menu_ids.push((*name, menu.id));
    }

    for (method, path, category, description) in API_CATALOGUE {
        apis.create(
            &NewApi {
                method: method.to_string(),
                path: path.to_string(),
                category: category.to_string(),
                description: description.to_string(),
            },
            SYSTEM,
        )?;
    }

    let mut rules = Vec::new();
    for (keyword, name, sort, description) in ROLES {
        let role = roles.create(
            &NewRole {
                name: name.to_string(),
                keyword: keyword.to_string(),
                description: Some(description.to_string()),
                status: Status::Active,
                sort: *sort,
            },
            SYSTEM,
        )?;
        let ids: Vec<i64> = menu_ids
            .iter()
            .filter(|(name, _)| role_menus(keyword).contains(name))
            .map(|(_, id)| *id)
            .collect();
        roles.replace_menus(role.id, &ids)?;

        users.create(
            &NewUser {
                username: keyword.to_string(),
                password_hash: hasher.hash(DEFAULT_PASSWORD)?,
                nickname: Some(name.to_string()),
                status: Status::Active,
                role_ids: vec![role.id],
            },
            SYSTEM,
        )?;
        rules.extend(role_rules(keyword));
    }

    sync.grant("default policy", &rules)?;
    info!(
        roles = ROLES.len(),
        apis = API_CATALOGUE.len(),
        rules = rules.len(),
        "Seeded default data"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::admin::Argon2Hasher;
    use crate::engine::rbac::PolicyStore;
    use std::sync::Arc;

    #[test]
    fn test_seed_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let sync = PolicySynchronizer::new(Arc::new(PolicyStore::sqlite(db.clone()).unwrap()));
        let hasher = Argon2Hasher::with_cost(1024, 1, 1).unwrap();
        assert!(seed_defaults(&db, &sync, &hasher).unwrap());
        assert!(!seed_defaults(&db, &sync, &hasher).unwrap());

        assert_eq!(db.count_rows("roles").unwrap(), 3);
        assert_eq!(db.count_rows("users").unwrap(), 3);
        assert_eq!(db.count_rows("apis").unwrap(), API_CATALOGUE.len() as i64);

        let store = sync.store();
        assert_eq!(store.query_by_subject("admin").len(), API_CATALOGUE.len());
        assert!(store.enforce("user", "/user/info", "GET"));
        assert!(!store.enforce("guest", "/user/changePwd", "PUT"));
    }

    #[test]
    fn test_menus_are_nested() {
        let db = Database::in_memory().unwrap();
        let sync = PolicySynchronizer::new(Arc::new(PolicyStore::sqlite(db.clone()).unwrap()));
        seed_defaults(&db, &sync, &Argon2Hasher::with_cost(1024, 1, 1).unwrap()).unwrap();
        let menus = MenuRepository::new(db).list().unwrap();
        let system = menus.iter().find(|m| m.name == "system").unwrap();
        let users = menus.iter().find(|m| m.name == "users").unwrap();
        assert_eq!(users.parent_id, system.id);
    }
}
