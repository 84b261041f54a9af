//! Rolegate API Module
//! Admin REST API guarded by role-based access checks, with OpenAPI documentation

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::engine::admin::AdminService;
use crate::engine::audit::{AuditPipeline, SqliteAuditSink};
use crate::engine::database::Database;
use crate::engine::rbac::Authorizer;

pub use error::{ApiError, Envelope};
pub use middleware::{HeaderIdentity, IdentityResolver};
pub use rate_limit::TokenBucket;

#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub admin: AdminService,
    pub authorizer: Authorizer,
    pub identity: Arc<dyn IdentityResolver>,
    /// `None` disables operation logging.
    pub audit: Option<Arc<AuditPipeline>>,
    pub audit_log: SqliteAuditSink,
    /// Bounds operation log hand-offs still waiting for queue space.
    pub audit_permits: Arc<Semaphore>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<Arc<TokenBucket>>,
    /// Mount point without slashes, e.g. `api`.
    pub prefix: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::user_info,
        handlers::list_users,
        handlers::change_password,
        handlers::create_user,
        handlers::update_user,
        handlers::delete_users,
        handlers::list_roles,
        handlers::create_role,
        handlers::update_role,
        handlers::role_menus,
        handlers::update_role_menus,
        handlers::role_apis,
        handlers::update_role_apis,
        handlers::delete_roles,
        handlers::list_menus,
        handlers::create_menu,
        handlers::update_menu,
        handlers::delete_menus,
        handlers::user_menus,
        handlers::list_apis,
        handlers::api_tree,
        handlers::create_api,
        handlers::update_api,
        handlers::delete_apis,
        handlers::list_operation_logs,
        handlers::delete_operation_logs,
    ),
    tags(
        (name = "base", description = "Public endpoints"),
        (name = "user", description = "User management"),
        (name = "role", description = "Roles and their menus and apis"),
        (name = "menu", description = "Menus"),
        (name = "api", description = "Api catalogue"),
        (name = "log", description = "Operation logs"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/base/health", get(handlers::health))
        .route("/base/openapi.json", get(handlers::openapi));

    // identify runs before authorize: the last route_layer is the outermost
    let protected = Router::new()
        .route("/user/info", get(handlers::user_info))
        .route("/user/list", get(handlers::list_users))
        .route("/user/changePwd", put(handlers::change_password))
        .route("/user/create", post(handlers::create_user))
        .route("/user/update/{userId}", patch(handlers::update_user))
        .route("/user/delete/batch", delete(handlers::delete_users))
        .route("/role/list", get(handlers::list_roles))
        .route("/role/create", post(handlers::create_role))
        .route("/role/update/{roleId}", patch(handlers::update_role))
        .route("/role/menus/get/{roleId}", get(handlers::role_menus))
        .route("/role/menus/update/{roleId}", patch(handlers::update_role_menus))
        .route("/role/apis/get/{roleId}", get(handlers::role_apis))
        .route("/role/apis/update/{roleId}", patch(handlers::update_role_apis))
        .route("/role/delete/batch", delete(handlers::delete_roles))
        .route("/menu/list", get(handlers::list_menus))
        .route("/menu/create", post(handlers::create_menu))
        .route("/menu/update/{menuId}", patch(handlers::update_menu))
        .route("/menu/delete/batch", delete(handlers::delete_menus))
        .route("/menu/access/list/{userId}", get(handlers::user_menus))
        .route("/api/list", get(handlers::list_apis))
        .route("/api/tree", get(handlers::api_tree))
        .route("/api/create", post(handlers::create_api))
        .route("/api/update/{apiId}", patch(handlers::update_api))
        .route("/api/delete/batch", delete(handlers::delete_apis))
        .route("/log/operation/list", get(handlers::list_operation_logs))
        .route("/log/operation/delete/batch", delete(handlers::delete_operation_logs))
        .route_layer(from_fn_with_state(state.clone(), middleware::authorize))
        .route_layer(from_fn_with_state(state.clone(), middleware::identify));

    let routes = public
        .merge(protected)
        .route_layer(from_fn_with_state(state.clone(), middleware::record_operation));

    Router::new()
        .nest(&format!("/{}", state.prefix), routes)
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
