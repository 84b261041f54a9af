//! Request middleware: identity, authorization and operation logging

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

use super::error::ApiError;
use super::ApiState;
use crate::engine::admin::Actor;
use crate::engine::audit::AuditEvent;
use crate::engine::models::User;
use crate::engine::rbac::AuthzError;

/// Resolves the caller's username from request headers.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Trusts a username header set by an upstream authenticator.
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Username attached to a response for the operation log.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

/// Route template of the request as stored in policy rules: URL prefix
/// stripped, placeholders written as `:name`.
pub fn route_template(prefix: &str, request: &Request) -> Option<String> {
    let matched = request.extensions().get::<MatchedPath>()?.as_str();
    let mount = format!("/{}", prefix);
    let template = matched
        .strip_prefix(mount.as_str())
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(matched);
    Some(template.replace('{', ":").replace('}', ""))
}

fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn with_principal(mut response: Response, username: String) -> Response {
    response.extensions_mut().insert(Principal(username));
    response
}

/// Loads the caller through the user cache and attaches it to the request.
pub async fn identify(State(state): State<ApiState>, mut request: Request, next: Next) -> Response {
    let Some(username) = state.identity.resolve(request.headers()) else {
        return ApiError::from(AuthzError::Identity).into_response();
    };
    let user = match state.admin.current_user(&username) {
        Ok(user) => user,
        Err(e) => {
            debug!(user = %username, error = %e, "Unknown caller");
            return with_principal(ApiError::from(AuthzError::Identity).into_response(), username);
        }
    };
    request.extensions_mut().insert(user);
    with_principal(next.run(request).await, username)
}

/// Checks the caller's roles against the route template and method.
pub async fn authorize(State(state): State<ApiState>, mut request: Request, next: Next) -> Response {
    let object = route_template(&state.prefix, &request).unwrap_or_else(|| request.uri().path().to_string());
    let action = request.method().as_str().to_string();
    let user = request.extensions().get::<User>().cloned();

    if let Err(e) = state.authorizer.check(user.as_ref(), &object, &action) {
        return ApiError::from(e).into_response();
    }
    let actor = match user.map(Actor::resolve) {
        Some(Ok(actor)) => actor,
        Some(Err(e)) => return ApiError::from(e).into_response(),
        None => return ApiError::from(AuthzError::Identity).into_response(),
    };
    request.extensions_mut().insert(actor);
    next.run(request).await
}

/// Refuses the request with 429 when the shared token bucket is empty.
pub async fn rate_limit(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    if let Some(bucket) = &state.rate_limit {
        if !bucket.try_take() {
            debug!(path = %request.uri().path(), "Rate limited");
            return ApiError::RateLimited.into_response();
        }
    }
    next.run(request).await
}

/// Queues an operation log event once the response is produced. Hand-offs
/// in flight are bounded by `audit_permits`; when none is free the response
/// waits for one.
pub async fn record_operation(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(producer) = state.audit.as_ref().map(|pipeline| pipeline.producer()) else {
        return next.run(request).await;
    };
    let started_at = Utc::now();
    let timer = Instant::now();
    let method = request.method().as_str().to_string();
    let path = route_template(&state.prefix, &request).unwrap_or_else(|| request.uri().path().to_string());
    let ip = client_ip(&request);

    let response = next.run(request).await;

    let username = response
        .extensions()
        .get::<Principal>()
        .map(|p| p.0.clone())
        .unwrap_or_default();
    let status = response.status().as_u16();
    let time_cost = timer.elapsed().as_millis() as i64;
    let permit = match state.audit_permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            warn!(error = %e, "Dropping operation log event");
            return response;
        }
    };
    let admin = state.admin.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let description = admin.describe_api(&path, &method).unwrap_or_default();
        let event = AuditEvent {
            username,
            ip,
            method,
            path,
            description,
            status,
            start_time: started_at,
            time_cost,
        };
        if let Err(e) = producer.send(event).await {
            warn!(error = %e, "Dropping operation log event");
        }
    });
    response
}
