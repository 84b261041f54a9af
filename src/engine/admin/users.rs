//! User management and password handling

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordVerifier, Version};
use serde::Deserialize;
use tracing::info;

use super::{require, unique_ids, Actor, AdminError, AdminService};
use crate::engine::models::{NewUser, Role, Status, User, UserQuery, UserUpdate};
use crate::engine::rbac::{target_rank, GuardError};

const MIN_PASSWORD_LEN: usize = 6;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AdminError>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id, stored as a PHC string. Verification reads the cost from the
/// stored hash, so hashes made with other parameters still verify.
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Memory cost in KiB, iterations and lanes.
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, AdminError> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(|e| AdminError::Hash(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AdminError> {
        use argon2::PasswordHasher as _;

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AdminError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2().verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub role_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub role_ids: Vec<i64>,
    #[serde(default)]
    pub password: Option<String>,
}

fn validate_password(password: &str) -> Result<(), AdminError> {
    require(
        password.chars().count() >= MIN_PASSWORD_LEN,
        "password must be at least 6 characters",
    )
}

impl AdminService {
    /// Cached user snapshot, loaded from storage on a miss.
    pub fn current_user(&self, username: &str) -> Result<User, AdminError> {
        Ok(self.cache.get_or_load(username, |name| self.users.get_by_username(name))?)
    }

    pub fn list_users(&self, query: &UserQuery) -> Result<(Vec<User>, i64), AdminError> {
        Ok(self.users.search(query)?)
    }

    fn requested_roles(&self, role_ids: &[i64]) -> Result<Vec<Role>, AdminError> {
        let role_ids = unique_ids(role_ids);
        require(!role_ids.is_empty(), "at least one role is required")?;
        let roles = self.roles.get_by_ids(&role_ids)?;
        require(roles.len() == role_ids.len(), "unknown role id")?;
        Ok(roles)
    }

    pub fn create_user(&self, actor: &Actor, request: &CreateUser) -> Result<User, AdminError> {
        require(!request.username.trim().is_empty(), "username is required")?;
        validate_password(&request.password)?;
        let roles = self.requested_roles(&request.role_ids)?;
        actor.privilege.ensure_can_act_on("create user", target_rank(&roles))?;

        let user = self.users.create(
            &NewUser {
                username: request.username.clone(),
                password_hash: self.hasher.hash(&request.password)?,
                nickname: request.nickname.clone(),
                status: request.status,
                role_ids: roles.iter().map(|r| r.id).collect(),
            },
            actor.username(),
        )?;
        info!(user = %user.username, by = actor.username(), "User created");
        Ok(user)
    }

    pub fn update_user(&self, actor: &Actor, id: i64, request: &UpdateUser) -> Result<User, AdminError> {
        require(!request.username.trim().is_empty(), "username is required")?;
        let target = self.users.get(id)?;
        let role_ids = unique_ids(&request.role_ids);

        if target.id == actor.user.id {
            if !request.status.is_active() {
                return Err(GuardError::SelfMutation("disable the account").into());
            }
            if role_ids != target.role_ids() {
                return Err(GuardError::SelfMutation("change roles").into());
            }
            if request.password.is_some() {
                return Err(GuardError::SelfMutation("change the password").into());
            }
        } else {
            actor.privilege.ensure_can_act_on("update user", target_rank(&target.roles))?;
            let roles = self.requested_roles(&role_ids)?;
            actor.privilege.ensure_can_act_on("update user", target_rank(&roles))?;
        }

        let password_hash = match &request.password {
            Some(password) => {
                validate_password(password)?;
                Some(self.hasher.hash(password)?)
            }
            None => None,
        };
        let updated = self.users.update(
            id,
            &UserUpdate {
                username: request.username.clone(),
                nickname: request.nickname.clone(),
                status: request.status,
                role_ids,
                password_hash,
            },
        )?;

        if target.username != updated.username {
            self.cache.delete(&target.username);
        }
        self.cache.set(updated.clone());
        info!(user = %updated.username, by = actor.username(), "User updated");
        Ok(updated)
    }

    pub fn delete_users(&self, actor: &Actor, ids: &[i64]) -> Result<Vec<User>, AdminError> {
        let ids = unique_ids(ids);
        require(!ids.is_empty(), "no user ids given")?;
        if ids.contains(&actor.user.id) {
            return Err(GuardError::SelfMutation("delete the account").into());
        }
        let targets = self.users.get_by_ids(&ids)?;
        for target in &targets {
            actor.privilege.ensure_can_act_on("delete user", target_rank(&target.roles))?;
        }

        let removed = self.users.delete_by_ids(&ids)?;
        for user in &removed {
            self.cache.delete(&user.username);
        }
        info!(count = removed.len(), by = actor.username(), "Users deleted");
        Ok(removed)
    }

    pub fn change_password(&self, username: &str, old_password: &str, new_password: &str) -> Result<(), AdminError> {
        let user = self.users.get_by_username(username)?;
        require(self.hasher.verify(old_password, &user.password_hash), "old password is incorrect")?;
        validate_password(new_password)?;

        self.users.set_password(username, &self.hasher.hash(new_password)?)?;
        self.cache.set(self.users.get_by_username(username)?);
        info!(user = username, "Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;

    fn create_request(username: &str, role_ids: Vec<i64>) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            password: "secret1".to_string(),
            nickname: None,
            status: Status::Active,
            role_ids,
        }
    }

    fn update_request(user: &User) -> UpdateUser {
        UpdateUser {
            username: user.username.clone(),
            nickname: user.nickname.clone(),
            status: user.status,
            role_ids: user.role_ids(),
            password: None,
        }
    }

    #[test]
    fn test_argon2_hashes_are_salted_phc_strings() {
        let hasher = Argon2Hasher::with_cost(1024, 1, 1).unwrap();
        let hash = hasher.hash("123456").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("123456", &hash));
        assert!(!hasher.verify("654321", &hash));
        assert_ne!(hasher.hash("123456").unwrap(), hash);
        assert!(!hasher.verify("123456", "salt$digest"));

        // The stored cost wins over the verifier's own parameters.
        assert!(Argon2Hasher::default().verify("123456", &hash));
    }

    #[test]
    fn test_invalid_cost_is_rejected() {
        assert!(matches!(Argon2Hasher::with_cost(1, 0, 0), Err(AdminError::Hash(_))));
    }

    #[test]
    fn test_create_user_guards_rank() {
        let fx = fixture();
        let user = fx.actor("user");
        let admin_role = fx.role("admin");
        let guest_role = fx.role("guest");

        let err = fx.admin.create_user(&user, &create_request("eve", vec![admin_role.id])).unwrap_err();
        assert!(matches!(err, AdminError::Guard(GuardError::Escalation { .. })));

        let created = fx.admin.create_user(&user, &create_request("dan", vec![guest_role.id])).unwrap();
        assert_eq!(created.roles[0].keyword, "guest");
        assert!(fx.admin.hasher.verify("secret1", &created.password_hash));
    }

    #[test]
    fn test_create_user_validation() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let mut request = create_request("dan", vec![]);
        assert!(matches!(fx.admin.create_user(&admin, &request), Err(AdminError::Invalid(_))));
        request.role_ids = vec![fx.role("guest").id];
        request.password = "123".into();
        assert!(matches!(fx.admin.create_user(&admin, &request), Err(AdminError::Invalid(_))));
    }

    #[test]
    fn test_self_mutation_is_refused() {
        let fx = fixture();
        let user = fx.actor("user");

        let mut request = update_request(&user.user);
        request.status = Status::Disabled;
        assert!(matches!(
            fx.admin.update_user(&user, user.user.id, &request),
            Err(AdminError::Guard(GuardError::SelfMutation(_)))
        ));

        let mut request = update_request(&user.user);
        request.role_ids = vec![fx.role("admin").id];
        assert!(matches!(
            fx.admin.update_user(&user, user.user.id, &request),
            Err(AdminError::Guard(GuardError::SelfMutation(_)))
        ));

        assert!(matches!(
            fx.admin.delete_users(&user, &[user.user.id]),
            Err(AdminError::Guard(GuardError::SelfMutation(_)))
        ));

        let mut request = update_request(&user.user);
        request.nickname = Some("Me".into());
        assert_eq!(
            fx.admin.update_user(&user, user.user.id, &request).unwrap().nickname.as_deref(),
            Some("Me")
        );
    }

    #[test]
    fn test_update_refreshes_cache() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let guest = fx.admin.current_user("guest").unwrap();

        let mut request = update_request(&guest);
        request.nickname = Some("Visitor".into());
        fx.admin.update_user(&admin, guest.id, &request).unwrap();
        assert_eq!(
            fx.admin.current_user("guest").unwrap().nickname.as_deref(),
            Some("Visitor")
        );

        request.username = "visitor".into();
        fx.admin.update_user(&admin, guest.id, &request).unwrap();
        assert!(fx.admin.cache().get("guest").is_none());
        assert_eq!(fx.admin.current_user("visitor").unwrap().id, guest.id);
    }

    #[test]
    fn test_restricted_actor_cannot_touch_peer() {
        let fx = fixture();
        let user = fx.actor("user");
        let peer = fx
            .admin
            .create_user(&fx.actor("admin"), &create_request("peer", vec![fx.role("user").id]))
            .unwrap();
        assert!(matches!(
            fx.admin.update_user(&user, peer.id, &update_request(&peer)),
            Err(AdminError::Guard(GuardError::Escalation { .. }))
        ));
        assert!(matches!(
            fx.admin.delete_users(&user, &[peer.id]),
            Err(AdminError::Guard(GuardError::Escalation { .. }))
        ));
    }

    #[test]
    fn test_delete_evicts_cache() {
        let fx = fixture();
        let admin = fx.actor("admin");
        let guest = fx.admin.current_user("guest").unwrap();
        fx.admin.delete_users(&admin, &[guest.id]).unwrap();
        assert!(fx.admin.cache().get("guest").is_none());
        assert!(fx.admin.current_user("guest").is_err());
    }

    #[test]
    fn test_list_users() {
        let fx = fixture();
        let (users, total) = fx.admin.list_users(&UserQuery::default()).unwrap();
        assert_eq!(total, 3);
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["admin", "user", "guest"]);

        let (users, _) = fx
            .admin
            .list_users(&UserQuery { nickname: Some("Gue".into()), ..Default::default() })
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].roles[0].keyword, "guest");
    }

    #[test]
    fn test_change_password() {
        let fx = fixture();
        assert!(matches!(
            fx.admin.change_password("user", "wrong!", "newpass"),
            Err(AdminError::Invalid(_))
        ));
        fx.admin.change_password("user", "123456", "newpass").unwrap();
        let cached = fx.admin.cache().get("user").unwrap();
        assert!(fx.admin.hasher.verify("newpass", &cached.password_hash));
    }
}
