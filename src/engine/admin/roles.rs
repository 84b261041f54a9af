//! Role, role-menu and role-API management

use std::collections::BTreeSet;
use tracing::info;

use super::{require, unique_ids, Actor, AdminError, AdminService};
use crate::engine::models::{Api, Menu, NewRole, Role};
use crate::engine::rbac::{GuardError, PolicyRule};

fn validate_role(role: &NewRole) -> Result<(), AdminError> {
    require(!role.name.trim().is_empty(), "role name is required")?;
    require(!role.keyword.trim().is_empty(), "role keyword is required")?;
    require(role.sort >= 1, "role sort must be at least 1")
}

impl AdminService {
    pub fn list_roles(&self) -> Result<Vec<Role>, AdminError> {
        Ok(self.roles.list()?)
    }

    pub fn create_role(&self, actor: &Actor, role: &NewRole) -> Result<Role, AdminError> {
        validate_role(role)?;
        actor.privilege.ensure_can_act_on("create role", role.sort)?;
        let created = self.roles.create(role, actor.username())?;
        info!(role = %created.keyword, sort = created.sort, by = actor.username(), "Role created");
        Ok(created)
    }

    /// Updates a role; a keyword change moves its rules to the new keyword.
    pub fn update_role(&self, actor: &Actor, id: i64, role: &NewRole) -> Result<Role, AdminError> {
        validate_role(role)?;
        let (updated, synced) = self.sync.locked(|session| {
            let current = self.roles.get(id)?;
            actor.privilege.ensure_can_act_on("update role", current.sort)?;
            actor.privilege.ensure_can_act_on("update role", role.sort)?;

            let updated = self.roles.update(id, role)?;
            let synced = session.rename_subject(
                &format!("role '{}'", updated.keyword),
                &current.keyword,
                &updated.keyword,
            );
            Ok::<_, AdminError>((updated, synced))
        })?;
        // Role changes affect every cached user holding the role.
        self.cache.flush();
        synced?;
        info!(role = %updated.keyword, by = actor.username(), "Role updated");
        Ok(updated)
    }

    pub fn delete_roles(&self, actor: &Actor, ids: &[i64]) -> Result<Vec<Role>, AdminError> {
        let ids = unique_ids(ids);
        require(!ids.is_empty(), "no role ids given")?;
        let (removed, synced) = self.sync.locked(|session| {
            let targets = self.roles.get_by_ids(&ids)?;
            for target in &targets {
                actor.privilege.ensure_can_act_on("delete role", target.sort)?;
            }

            let removed = self.roles.delete_by_ids(&ids)?;
            let keywords: Vec<String> = removed.iter().map(|r| r.keyword.clone()).collect();
            let synced = session.remove_subjects(&format!("roles {}", keywords.join(", ")), &keywords);
            Ok::<_, AdminError>((removed, synced))
        })?;
        self.cache.flush();
        synced?;
        info!(count = removed.len(), by = actor.username(), "Roles deleted");
        Ok(removed)
    }

    pub fn role_menus(&self, id: i64) -> Result<Vec<Menu>, AdminError> {
        self.roles.get(id)?;
        Ok(self.roles.menus(id)?)
    }

    /// Replaces the role's menus. Restricted actors may only hand out menus
    /// they can reach themselves.
    pub fn update_role_menus(&self, actor: &Actor, id: i64, menu_ids: &[i64]) -> Result<(), AdminError> {
        let role = self.roles.get(id)?;
        actor.privilege.ensure_can_act_on("update role menus", role.sort)?;

        let menu_ids = unique_ids(menu_ids);
        let menus = self.menus.get_by_ids(&menu_ids)?;
        require(menus.len() == menu_ids.len(), "unknown menu id")?;

        if !actor.privilege.unrestricted {
            let held: BTreeSet<i64> = self.menus.user_menus(actor.user.id)?.iter().map(|m| m.id).collect();
            if let Some(menu) = menus.iter().find(|m| !held.contains(&m.id)) {
                return Err(GuardError::NotHeld {
                    kind: "menu",
                    item: menu.name.clone(),
                }
                .into());
            }
        }

        self.roles.replace_menus(id, &menu_ids)?;
        self.cache.flush();
        info!(role = %role.keyword, menus = menu_ids.len(), by = actor.username(), "Role menus updated");
        Ok(())
    }

    /// Catalogue entries the role currently holds a rule for.
    pub fn role_apis(&self, id: i64) -> Result<Vec<Api>, AdminError> {
        let role = self.roles.get(id)?;
        let held: BTreeSet<(String, String)> = self
            .sync
            .store()
            .query_by_subject(&role.keyword)
            .into_iter()
            .map(|r| (r.object, r.action))
            .collect();
        let apis = self
            .apis
            .list()?
            .into_iter()
            .filter(|api| held.contains(&(api.path.clone(), api.method.clone())))
            .collect();
        Ok(apis)
    }

    /// Makes the role's rules exactly the given APIs. Restricted actors may
    /// only grant APIs one of their own roles holds. The role is read under
    /// the sequence lock so a concurrent rename or delete cannot strand the
    /// new rules on a stale keyword.
    pub fn update_role_apis(&self, actor: &Actor, id: i64, api_ids: &[i64]) -> Result<(), AdminError> {
        let api_ids = unique_ids(api_ids);
        let apis = self.apis.get_by_ids(&api_ids)?;
        require(apis.len() == api_ids.len(), "unknown api id")?;

        let (keyword, granted, synced) = self.sync.locked(|session| {
            let role = self.roles.get(id)?;
            actor.privilege.ensure_can_act_on("update role apis", role.sort)?;

            if !actor.privilege.unrestricted {
                let store = self.sync.store();
                let held: BTreeSet<(String, String)> = actor
                    .user
                    .active_role_keywords()
                    .iter()
                    .flat_map(|keyword| store.query_by_subject(keyword))
                    .map(|r| (r.object, r.action))
                    .collect();
                if let Some(api) = apis
                    .iter()
                    .find(|api| !held.contains(&(api.path.clone(), api.method.clone())))
                {
                    return Err(GuardError::NotHeld {
                        kind: "api",
                        item: format!("{} {}", api.method, api.path),
                    }
                    .into());
                }
            }

            let rules: Vec<PolicyRule> = apis
                .iter()
                .map(|api| PolicyRule::new(role.keyword.clone(), api.path.clone(), &api.method))
                .collect();
            let synced = session.set_subject_rules(&format!("role '{}' apis", role.keyword), &role.keyword, &rules);
            Ok::<_, AdminError>((role.keyword, rules.len(), synced))
        })?;
        self.cache.flush();
        synced?;
        info!(role = %keyword, apis = granted, by = actor.username(), "Role apis updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;
    use crate::engine::database::DatabaseError;
    use crate::engine::models::Status;

    fn new_role(keyword: &str, sort: u32) -> NewRole {
        NewRole {
            name: keyword.to_string(),
            keyword: keyword.to_string(),
            description: None,
            status: Status::Active,
            sort,
        }
    }

    #[test]
    fn test_restricted_actor_cannot_create_higher_role() {
        let fx = fixture();
        let user = fx.actor("user");
        let err = fx.admin.create_role(&user, &new_role("lead", 2)).unwrap_err();
        assert!(matches!(err, AdminError::Guard(GuardError::Escalation { .. })));
        assert!(fx.admin.list_roles().unwrap().iter().all(|r| r.keyword != "lead"));
        assert!(fx.admin.create_role(&user, &new_role("intern", 4)).is_ok());
    }

    #[test]
    fn test_unrestricted_actor_can_create_rank_one() {
        let fx = fixture();
        let admin = fx.actor("admin");
        assert!(fx.admin.create_role(&admin, &new_role("root", 1)).is_ok());
    }

    #[test]
    fn test_rename_moves_rules_and_flushes_cache() {
        let fx = fixture();
        let admin = fx.actor("admin");
        fx.admin.current_user("user").unwrap();
        assert!(!fx.admin.cache().is_empty());

        let role = fx.role("user");
        let mut renamed = new_role("member", role.sort);
        renamed.name = role.name.clone();
        fx.admin.update_role(&admin, role.id, &renamed).unwrap();

        let store = fx.admin.synchronizer().store();
        assert!(store.enforce("member", "/user/info", "GET"));
        assert!(!store.enforce("user", "/user/info", "GET"));
        assert!(fx.admin.cache().is_empty());
    }

    #[test]
    fn test_delete_roles_removes_rules() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let guest = fx.role("guest");
        fx.admin.delete_roles(&admin, &[guest.id]).unwrap();
        assert!(fx.admin.synchronizer().store().query_by_subject("guest").is_empty());
        assert!(matches!(
            fx.admin.role_menus(guest.id),
            Err(AdminError::Storage(DatabaseError::NotFound(_)))
        ));
    }

    #[test]
    fn test_restricted_actor_can_only_grant_held_apis() {
        let fx = fixture();
        let user = fx.actor("user");
        let guest = fx.role("guest");
        let apis = fx.admin.apis.list().unwrap();
        let held = apis.iter().find(|a| a.path == "/user/info").unwrap();
        let not_held = apis.iter().find(|a| a.path == "/api/create").unwrap();

        let err = fx.admin.update_role_apis(&user, guest.id, &[not_held.id]).unwrap_err();
        assert!(matches!(err, AdminError::Guard(GuardError::NotHeld { kind: "api", .. })));

        fx.admin.update_role_apis(&user, guest.id, &[held.id]).unwrap();
        let granted = fx.admin.role_apis(guest.id).unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].path, "/user/info");
    }

    #[test]
    fn test_update_role_menus() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let guest = fx.role("guest");
        let menu = fx.admin.list_menus().unwrap().remove(0);
        fx.admin.update_role_menus(&admin, guest.id, &[menu.id, menu.id]).unwrap();
        assert_eq!(fx.admin.role_menus(guest.id).unwrap(), vec![menu]);

        let user = fx.actor("user");
        let admin_role = fx.role("admin");
        assert!(matches!(
            fx.admin.update_role_menus(&user, admin_role.id, &[]),
            Err(AdminError::Guard(GuardError::Escalation { .. }))
        ));
    }
}
