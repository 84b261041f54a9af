//! Admin services
//!
//! Role, API, menu and user management. Every mutation is checked against
//! the role hierarchy, mirrored into the policy store and reflected in the
//! user cache.

pub mod apis;
pub mod menus;
pub mod roles;
pub mod users;

use std::sync::Arc;
use thiserror::Error;

use crate::engine::cache::UserInfoCache;
use crate::engine::database::{Database, DatabaseError};
use crate::engine::models::User;
use crate::engine::rbac::{GuardError, PolicySynchronizer, Privilege, SyncError};
use crate::engine::repository::{ApiRepository, MenuRepository, RoleRepository, UserRepository};

pub use apis::ApiGroup;
pub use users::{Argon2Hasher, CreateUser, PasswordHasher, UpdateUser};

#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

/// The authenticated user performing an operation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub privilege: Privilege,
}

impl Actor {
    pub fn resolve(user: User) -> Result<Self, GuardError> {
        let privilege = Privilege::resolve(&user.roles)?;
        Ok(Self { user, privilege })
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }
}

#[derive(Clone)]
pub struct AdminService {
    pub(crate) roles: RoleRepository,
    pub(crate) users: UserRepository,
    pub(crate) apis: ApiRepository,
    pub(crate) menus: MenuRepository,
    pub(crate) sync: Arc<PolicySynchronizer>,
    pub(crate) cache: Arc<UserInfoCache>,
    pub(crate) hasher: Arc<dyn PasswordHasher>,
}

impl AdminService {
    pub fn new(db: Database, sync: Arc<PolicySynchronizer>, cache: Arc<UserInfoCache>) -> Self {
        Self {
            roles: RoleRepository::new(db.clone()),
            users: UserRepository::new(db.clone()),
            apis: ApiRepository::new(db.clone()),
            menus: MenuRepository::new(db),
            sync,
            cache,
            hasher: Arc::new(Argon2Hasher::default()),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn cache(&self) -> &Arc<UserInfoCache> {
        &self.cache
    }

    pub fn synchronizer(&self) -> &Arc<PolicySynchronizer> {
        &self.sync
    }
}

pub(crate) fn require(condition: bool, message: &str) -> Result<(), AdminError> {
    if condition {
        Ok(())
    } else {
        Err(AdminError::Invalid(message.to_string()))
    }
}

/// Deduplicated, sorted copy of a request's id list.
pub(crate) fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
