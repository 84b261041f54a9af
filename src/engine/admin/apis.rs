//! API catalogue management

use serde::Serialize;
use tracing::info;

use super::{require, unique_ids, Actor, AdminError, AdminService};
use crate::engine::models::{Api, NewApi};
use crate::engine::rbac::{PolicyRule, SUPER_ROLE_RANK};

/// One category of the API catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiGroup {
    pub category: String,
    pub children: Vec<Api>,
}

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

fn validate_api(api: &NewApi) -> Result<(), AdminError> {
    require(api.path.starts_with('/'), "api path must start with '/'")?;
    require(
        METHODS.contains(&api.method.to_uppercase().as_str()),
        "api method must be one of GET, POST, PUT, PATCH, DELETE",
    )
}

impl AdminService {
    pub fn list_apis(&self) -> Result<Vec<Api>, AdminError> {
        Ok(self.apis.list()?)
    }

    /// Catalogue description of a route template, empty when unknown.
    pub fn describe_api(&self, path: &str, method: &str) -> Result<String, AdminError> {
        Ok(self.apis.description_for(path, method)?.unwrap_or_default())
    }

    /// Creates the entry and grants it to every rank-1 role.
    pub fn create_api(&self, actor: &Actor, api: &NewApi) -> Result<Api, AdminError> {
        validate_api(api)?;
        let created = self.sync.locked(|session| {
            let created = self.apis.create(api, actor.username())?;
            let rules: Vec<PolicyRule> = self
                .roles
                .keywords_with_rank(SUPER_ROLE_RANK)?
                .into_iter()
                .map(|keyword| PolicyRule::new(keyword, created.path.clone(), &created.method))
                .collect();
            session.grant(&format!("api {} {}", created.method, created.path), &rules)?;
            Ok::<_, AdminError>(created)
        })?;
        info!(method = %created.method, path = %created.path, by = actor.username(), "Api created");
        Ok(created)
    }

    /// Updates the entry; a path or method change moves its rules.
    pub fn update_api(&self, actor: &Actor, id: i64, api: &NewApi) -> Result<Api, AdminError> {
        validate_api(api)?;
        let new = self.sync.locked(|session| {
            let (old, new) = self.apis.update(id, api)?;
            session.update_object(
                &format!("api {} {}", new.method, new.path),
                (old.path.as_str(), old.method.as_str()),
                (new.path.as_str(), new.method.as_str()),
            )?;
            Ok::<_, AdminError>(new)
        })?;
        info!(method = %new.method, path = %new.path, by = actor.username(), "Api updated");
        Ok(new)
    }

    pub fn delete_apis(&self, actor: &Actor, ids: &[i64]) -> Result<Vec<Api>, AdminError> {
        let ids = unique_ids(ids);
        require(!ids.is_empty(), "no api ids given")?;
        let removed = self.sync.locked(|session| {
            let removed = self.apis.delete_by_ids(&ids)?;
            let objects: Vec<(String, String)> = removed
                .iter()
                .map(|api| (api.path.clone(), api.method.clone()))
                .collect();
            session.remove_objects(&format!("{} apis", removed.len()), &objects)?;
            Ok::<_, AdminError>(removed)
        })?;
        info!(count = removed.len(), by = actor.username(), "Apis deleted");
        Ok(removed)
    }

    /// The catalogue grouped by category.
    pub fn api_tree(&self) -> Result<Vec<ApiGroup>, AdminError> {
        let mut groups: Vec<ApiGroup> = Vec::new();
        for api in self.apis.list()? {
            match groups.iter_mut().find(|g| g.category == api.category) {
                Some(group) => group.children.push(api),
                None => groups.push(ApiGroup {
                    category: api.category.clone(),
                    children: vec![api],
                }),
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;

    fn new_api(method: &str, path: &str) -> NewApi {
        NewApi {
            method: method.to_string(),
            path: path.to_string(),
            category: "report".to_string(),
            description: "Reports".to_string(),
        }
    }

    #[test]
    fn test_create_grants_to_rank_one_roles() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let api = fx.admin.create_api(&admin, &new_api("get", "/report/list")).unwrap();
        assert_eq!(api.method, "GET");

        let store = fx.admin.synchronizer().store();
        assert!(store.enforce("admin", "/report/list", "GET"));
        assert!(!store.enforce("user", "/report/list", "GET"));
    }

    #[test]
    fn test_update_moves_rules() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let api = fx.admin.create_api(&admin, &new_api("GET", "/report/list")).unwrap();
        fx.admin.update_api(&admin, api.id, &new_api("POST", "/report/query")).unwrap();

        let store = fx.admin.synchronizer().store();
        assert!(store.enforce("admin", "/report/query", "POST"));
        assert!(!store.enforce("admin", "/report/list", "GET"));
    }

    #[test]
    fn test_delete_removes_rules() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let api = fx.admin.create_api(&admin, &new_api("GET", "/report/list")).unwrap();
        fx.admin.delete_apis(&admin, &[api.id]).unwrap();
        assert!(fx
            .admin
            .synchronizer()
            .store()
            .query_by_object_action("/report/list", "GET")
            .is_empty());
    }

    #[test]
    fn test_api_tree_groups_by_category() {
        let fx = fixture();
        let admin = fx.actor("admin");
        fx.admin.create_api(&admin, &new_api("GET", "/report/list")).unwrap();
        fx.admin.create_api(&admin, &new_api("POST", "/report/export")).unwrap();

        let tree = fx.admin.api_tree().unwrap();
        let categories: Vec<&str> = tree.iter().map(|g| g.category.as_str()).collect();
        assert_eq!(categories, vec!["api", "log", "menu", "report", "role", "user"]);
        let report = tree.iter().find(|g| g.category == "report").unwrap();
        assert_eq!(report.children.len(), 2);
        assert_eq!(
            tree.iter().map(|g| g.children.len()).sum::<usize>(),
            fx.admin.list_apis().unwrap().len()
        );
    }

    #[test]
    fn test_rejects_bad_method() {
        let fx = fixture();
        let admin = fx.actor("admin");
        assert!(matches!(
            fx.admin.create_api(&admin, &new_api("TRACE", "/x")),
            Err(AdminError::Invalid(_))
        ));
    }
}
