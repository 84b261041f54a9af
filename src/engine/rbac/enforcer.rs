//! RBAC Enforcement Layer
//!
//! Request-level access control: a caller is permitted when any of its
//! active roles holds the `(route template, method)` rule.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::policy::PolicyStore;
use crate::engine::models::User;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("User is not logged in or has been disabled")]
    Identity,
    #[error("Permission denied for {action} {object}")]
    PermissionDenied { object: String, action: String },
}

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<PolicyStore>,
}

impl Authorizer {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub fn check(&self, user: Option<&User>, object: &str, action: &str) -> Result<(), AuthzError> {
        let user = match user {
            Some(user) if user.is_active() => user,
            _ => return Err(AuthzError::Identity),
        };

        let subjects = user.active_role_keywords();
        if self.store.enforce_any(&subjects, object, action) {
            debug!(user = %user.username, object, action, "Access granted");
            Ok(())
        } else {
            debug!(user = %user.username, ?subjects, object, action, "Access denied");
            Err(AuthzError::PermissionDenied {
                object: object.to_string(),
                action: action.to_uppercase(),
            })
        }
    }
}
