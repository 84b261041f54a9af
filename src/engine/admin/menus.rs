//! Menu management

use tracing::info;

use super::{require, unique_ids, Actor, AdminError, AdminService};
use crate::engine::models::{Menu, NewMenu};

fn validate_menu(menu: &NewMenu) -> Result<(), AdminError> {
    require(!menu.name.trim().is_empty(), "menu name is required")?;
    require(!menu.title.trim().is_empty(), "menu title is required")?;
    require(menu.parent_id >= 0, "menu parent id must not be negative")
}

impl AdminService {
    pub fn list_menus(&self) -> Result<Vec<Menu>, AdminError> {
        Ok(self.menus.list()?)
    }

    pub fn user_menus(&self, user_id: i64) -> Result<Vec<Menu>, AdminError> {
        Ok(self.menus.user_menus(user_id)?)
    }

    fn check_parent(&self, parent_id: i64) -> Result<(), AdminError> {
        if parent_id != 0 {
            self.menus.get(parent_id)?;
        }
        Ok(())
    }

    pub fn create_menu(&self, actor: &Actor, menu: &NewMenu) -> Result<Menu, AdminError> {
        validate_menu(menu)?;
        self.check_parent(menu.parent_id)?;
        let created = self.menus.create(menu, actor.username())?;
        info!(menu = %created.name, by = actor.username(), "Menu created");
        Ok(created)
    }

    pub fn update_menu(&self, actor: &Actor, id: i64, menu: &NewMenu) -> Result<Menu, AdminError> {
        validate_menu(menu)?;
        require(menu.parent_id != id, "a menu cannot be its own parent")?;
        self.check_parent(menu.parent_id)?;
        let updated = self.menus.update(id, menu)?;
        info!(menu = %updated.name, by = actor.username(), "Menu updated");
        Ok(updated)
    }

    /// Deletes menus together with their role links. A menu whose children
    /// are not deleted with it is refused.
    pub fn delete_menus(&self, actor: &Actor, ids: &[i64]) -> Result<Vec<Menu>, AdminError> {
        let ids = unique_ids(ids);
        require(!ids.is_empty(), "no menu ids given")?;
        let orphaned = self
            .menus
            .child_ids(&ids)?
            .into_iter()
            .any(|child| ids.binary_search(&child).is_err());
        require(!orphaned, "delete the child menus first")?;

        let removed = self.menus.delete_by_ids(&ids)?;
        self.cache.flush();
        info!(count = removed.len(), by = actor.username(), "Menus deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;
    use crate::engine::database::DatabaseError;
    use crate::engine::models::Status;

    fn new_menu(name: &str, parent_id: i64) -> NewMenu {
        NewMenu {
            name: name.to_string(),
            title: name.to_string(),
            path: format!("/{}", name),
            parent_id,
            sort: 30,
            status: Status::Active,
        }
    }

    #[test]
    fn test_create_and_update_check_parent() {
        let fx = fixture();
        let admin = fx.actor("admin");
        assert!(matches!(
            fx.admin.create_menu(&admin, &new_menu("reports", 999)),
            Err(AdminError::Storage(DatabaseError::NotFound(_)))
        ));

        let reports = fx.admin.create_menu(&admin, &new_menu("reports", 0)).unwrap();
        let daily = fx.admin.create_menu(&admin, &new_menu("daily", reports.id)).unwrap();
        assert_eq!(daily.creator, "admin");

        assert!(matches!(
            fx.admin.update_menu(&admin, daily.id, &new_menu("daily", daily.id)),
            Err(AdminError::Invalid(_))
        ));
        let renamed = fx.admin.update_menu(&admin, daily.id, &new_menu("weekly", reports.id)).unwrap();
        assert_eq!(renamed.path, "/weekly");
    }

    #[test]
    fn test_delete_removes_role_links_and_flushes_cache() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let dashboard = fx
            .admin
            .list_menus()
            .unwrap()
            .into_iter()
            .find(|m| m.name == "dashboard")
            .unwrap();
        let guest = fx.admin.current_user("guest").unwrap();
        assert_eq!(fx.admin.user_menus(guest.id).unwrap(), vec![dashboard.clone()]);

        fx.admin.delete_menus(&admin, &[dashboard.id]).unwrap();
        assert!(fx.admin.user_menus(guest.id).unwrap().is_empty());
        assert!(fx.admin.role_menus(fx.role("guest").id).unwrap().is_empty());
        assert!(fx.admin.cache().is_empty());
    }

    #[test]
    fn test_delete_refuses_to_orphan_children() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let menus = fx.admin.list_menus().unwrap();
        let system = menus.iter().find(|m| m.name == "system").unwrap();
        assert!(matches!(
            fx.admin.delete_menus(&admin, &[system.id]),
            Err(AdminError::Invalid(_))
        ));

        let family: Vec<i64> = menus
            .iter()
            .filter(|m| m.id == system.id || m.parent_id == system.id)
            .map(|m| m.id)
            .collect();
        assert_eq!(fx.admin.delete_menus(&admin, &family).unwrap().len(), 5);
    }
}
