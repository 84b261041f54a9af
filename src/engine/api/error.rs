use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::engine::admin::AdminError;
use crate::engine::audit::AuditError;
use crate::engine::database::DatabaseError;
use crate::engine::rbac::{AuthzError, GuardError};

/// Response body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub data: T,
    pub message: String,
    /// Machine-readable failure kind, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: StatusCode::OK.as_u16(),
        data,
        message: "success".to_string(),
        reason: None,
    })
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Authz(#[from] AuthzError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error("Too many requests")]
    RateLimited,
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        ApiError::Admin(AdminError::Guard(err))
    }
}

fn storage_status(err: &DatabaseError) -> (StatusCode, &'static str) {
    match err {
        DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        DatabaseError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
    }
}

impl ApiError {
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Authz(AuthzError::Identity) => (StatusCode::UNAUTHORIZED, "identity"),
            ApiError::Authz(AuthzError::PermissionDenied { .. }) => (StatusCode::UNAUTHORIZED, "permission_denied"),
            ApiError::Admin(AdminError::Guard(e)) => (StatusCode::FORBIDDEN, e.code()),
            ApiError::Admin(AdminError::Invalid(_)) => (StatusCode::BAD_REQUEST, "invalid"),
            ApiError::Admin(AdminError::Sync(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "policy_sync_partial"),
            ApiError::Admin(AdminError::Hash(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "password_hash"),
            ApiError::Admin(AdminError::Storage(e)) | ApiError::Storage(e) => storage_status(e),
            ApiError::Audit(AuditError::Storage(e)) => storage_status(e),
            ApiError::Audit(AuditError::Closed) => (StatusCode::SERVICE_UNAVAILABLE, "audit_closed"),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status();
        if status.is_server_error() {
            error!(reason, error = %self, "Request failed");
        }
        let body = Envelope {
            code: status.as_u16(),
            data: (),
            message: self.to_string(),
            reason: Some(reason),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rbac::{PolicyError, SyncError, SyncStep};

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(AuthzError::Identity).status().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(GuardError::SelfMutation("delete the account")).status(),
            (StatusCode::FORBIDDEN, "self_mutation")
        );
        assert_eq!(
            ApiError::from(DatabaseError::NotFound("role 9".into())).status().0,
            StatusCode::NOT_FOUND
        );

        let partial = SyncError::Partial {
            entity: "role 'member'".into(),
            step: SyncStep::Remove,
            source: PolicyError::Storage(DatabaseError::NotFound("rule".into())),
        };
        assert_eq!(ApiError::RateLimited.status(), (StatusCode::TOO_MANY_REQUESTS, "rate_limited"));

        let err = ApiError::from(AdminError::from(partial));
        assert_eq!(err.status(), (StatusCode::INTERNAL_SERVER_ERROR, "policy_sync_partial"));
        assert!(err.to_string().starts_with("role 'member' was saved but permission sync failed on remove"));
    }
}
