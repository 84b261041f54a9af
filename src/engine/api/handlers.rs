//! Route handlers

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::Extension;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::OpenApi;

use super::error::{ok, ApiError, Envelope};
use super::{ApiDoc, ApiState};
use crate::engine::admin::{Actor, ApiGroup, CreateUser, UpdateUser};
use crate::engine::audit::{LogQuery, OperationLog};
use crate::engine::models::{Api, Menu, NewApi, NewMenu, NewRole, Role, User, UserQuery};
use crate::engine::observability::HealthReport;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
}

#[utoipa::path(get, path = "/api/base/health", responses((status = 200, description = "Service health")), tag = "base")]
pub async fn health(State(state): State<ApiState>) -> Json<Envelope<HealthReport>> {
    let audit = state.audit.as_ref().map(|pipeline| pipeline.stats());
    ok(HealthReport::collect(
        &state.db,
        state.admin.synchronizer().store(),
        state.admin.cache().len(),
        audit,
    ))
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(get, path = "/api/user/info", responses((status = 200, description = "Current user with roles")), tag = "user")]
pub async fn user_info(Extension(actor): Extension<Actor>) -> ApiResult<User> {
    Ok(ok(actor.user))
}

#[utoipa::path(get, path = "/api/user/list", params(UserQuery), responses((status = 200, description = "Filtered page of users")), tag = "user")]
pub async fn list_users(State(state): State<ApiState>, Query(query): Query<UserQuery>) -> ApiResult<Page<User>> {
    let (items, total) = state.admin.list_users(&query)?;
    Ok(ok(Page { items, total }))
}

#[utoipa::path(put, path = "/api/user/changePwd", request_body = Value, responses((status = 200, description = "Password changed")), tag = "user")]
pub async fn change_password(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult<()> {
    state
        .admin
        .change_password(actor.username(), &body.old_password, &body.new_password)?;
    Ok(ok(()))
}

#[utoipa::path(post, path = "/api/user/create", request_body = Value, responses((status = 200, description = "Created user")), tag = "user")]
pub async fn create_user(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateUser>,
) -> ApiResult<User> {
    Ok(ok(state.admin.create_user(&actor, &body)?))
}

#[utoipa::path(
    patch,
    path = "/api/user/update/{userId}",
    request_body = Value,
    params(("userId" = i64, Path, description = "User id")),
    responses((status = 200, description = "Updated user")),
    tag = "user"
)]
pub async fn update_user(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
    Json(body): Json<UpdateUser>,
) -> ApiResult<User> {
    Ok(ok(state.admin.update_user(&actor, user_id, &body)?))
}

#[utoipa::path(delete, path = "/api/user/delete/batch", request_body = Value, responses((status = 200, description = "Deleted users")), tag = "user")]
pub async fn delete_users(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<Vec<User>> {
    Ok(ok(state.admin.delete_users(&actor, &body.ids)?))
}

#[utoipa::path(get, path = "/api/role/list", responses((status = 200, description = "All roles")), tag = "role")]
pub async fn list_roles(State(state): State<ApiState>) -> ApiResult<Vec<Role>> {
    Ok(ok(state.admin.list_roles()?))
}

#[utoipa::path(post, path = "/api/role/create", request_body = Value, responses((status = 200, description = "Created role")), tag = "role")]
pub async fn create_role(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewRole>,
) -> ApiResult<Role> {
    Ok(ok(state.admin.create_role(&actor, &body)?))
}

#[utoipa::path(
    patch,
    path = "/api/role/update/{roleId}",
    request_body = Value,
    params(("roleId" = i64, Path, description = "Role id")),
    responses((status = 200, description = "Updated role")),
    tag = "role"
)]
pub async fn update_role(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(role_id): Path<i64>,
    Json(body): Json<NewRole>,
) -> ApiResult<Role> {
    Ok(ok(state.admin.update_role(&actor, role_id, &body)?))
}

#[utoipa::path(
    get,
    path = "/api/role/menus/get/{roleId}",
    params(("roleId" = i64, Path, description = "Role id")),
    responses((status = 200, description = "Menus of the role")),
    tag = "role"
)]
pub async fn role_menus(State(state): State<ApiState>, Path(role_id): Path<i64>) -> ApiResult<Vec<Menu>> {
    Ok(ok(state.admin.role_menus(role_id)?))
}

#[utoipa::path(
    patch,
    path = "/api/role/menus/update/{roleId}",
    request_body = Value,
    params(("roleId" = i64, Path, description = "Role id")),
    responses((status = 200, description = "Menus replaced")),
    tag = "role"
)]
pub async fn update_role_menus(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(role_id): Path<i64>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<()> {
    state.admin.update_role_menus(&actor, role_id, &body.ids)?;
    Ok(ok(()))
}

#[utoipa::path(
    get,
    path = "/api/role/apis/get/{roleId}",
    params(("roleId" = i64, Path, description = "Role id")),
    responses((status = 200, description = "Apis the role may call")),
    tag = "role"
)]
pub async fn role_apis(State(state): State<ApiState>, Path(role_id): Path<i64>) -> ApiResult<Vec<Api>> {
    Ok(ok(state.admin.role_apis(role_id)?))
}

#[utoipa::path(
    patch,
    path = "/api/role/apis/update/{roleId}",
    request_body = Value,
    params(("roleId" = i64, Path, description = "Role id")),
    responses((status = 200, description = "Apis replaced")),
    tag = "role"
)]
pub async fn update_role_apis(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(role_id): Path<i64>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<()> {
    state.admin.update_role_apis(&actor, role_id, &body.ids)?;
    Ok(ok(()))
}

#[utoipa::path(delete, path = "/api/role/delete/batch", request_body = Value, responses((status = 200, description = "Deleted roles")), tag = "role")]
pub async fn delete_roles(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<Vec<Role>> {
    Ok(ok(state.admin.delete_roles(&actor, &body.ids)?))
}

#[utoipa::path(get, path = "/api/menu/list", responses((status = 200, description = "All menus")), tag = "menu")]
pub async fn list_menus(State(state): State<ApiState>) -> ApiResult<Vec<Menu>> {
    Ok(ok(state.admin.list_menus()?))
}

#[utoipa::path(post, path = "/api/menu/create", request_body = Value, responses((status = 200, description = "Created menu")), tag = "menu")]
pub async fn create_menu(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewMenu>,
) -> ApiResult<Menu> {
    Ok(ok(state.admin.create_menu(&actor, &body)?))
}

#[utoipa::path(
    patch,
    path = "/api/menu/update/{menuId}",
    request_body = Value,
    params(("menuId" = i64, Path, description = "Menu id")),
    responses((status = 200, description = "Updated menu")),
    tag = "menu"
)]
pub async fn update_menu(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(menu_id): Path<i64>,
    Json(body): Json<NewMenu>,
) -> ApiResult<Menu> {
    Ok(ok(state.admin.update_menu(&actor, menu_id, &body)?))
}

#[utoipa::path(delete, path = "/api/menu/delete/batch", request_body = Value, responses((status = 200, description = "Deleted menus")), tag = "menu")]
pub async fn delete_menus(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<Vec<Menu>> {
    Ok(ok(state.admin.delete_menus(&actor, &body.ids)?))
}

#[utoipa::path(
    get,
    path = "/api/menu/access/list/{userId}",
    params(("userId" = i64, Path, description = "User id")),
    responses((status = 200, description = "Menus reachable by the user")),
    tag = "menu"
)]
pub async fn user_menus(State(state): State<ApiState>, Path(user_id): Path<i64>) -> ApiResult<Vec<Menu>> {
    Ok(ok(state.admin.user_menus(user_id)?))
}

#[utoipa::path(get, path = "/api/api/list", responses((status = 200, description = "Api catalogue")), tag = "api")]
pub async fn list_apis(State(state): State<ApiState>) -> ApiResult<Vec<Api>> {
    Ok(ok(state.admin.list_apis()?))
}

#[utoipa::path(get, path = "/api/api/tree", responses((status = 200, description = "Api catalogue grouped by category")), tag = "api")]
pub async fn api_tree(State(state): State<ApiState>) -> ApiResult<Vec<ApiGroup>> {
    Ok(ok(state.admin.api_tree()?))
}

#[utoipa::path(post, path = "/api/api/create", request_body = Value, responses((status = 200, description = "Created api")), tag = "api")]
pub async fn create_api(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewApi>,
) -> ApiResult<Api> {
    Ok(ok(state.admin.create_api(&actor, &body)?))
}

#[utoipa::path(
    patch,
    path = "/api/api/update/{apiId}",
    request_body = Value,
    params(("apiId" = i64, Path, description = "Api id")),
    responses((status = 200, description = "Updated api")),
    tag = "api"
)]
pub async fn update_api(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(api_id): Path<i64>,
    Json(body): Json<NewApi>,
) -> ApiResult<Api> {
    Ok(ok(state.admin.update_api(&actor, api_id, &body)?))
}

#[utoipa::path(delete, path = "/api/api/delete/batch", request_body = Value, responses((status = 200, description = "Deleted apis")), tag = "api")]
pub async fn delete_apis(
    State(state): State<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<IdsRequest>,
) -> ApiResult<Vec<Api>> {
    Ok(ok(state.admin.delete_apis(&actor, &body.ids)?))
}

#[utoipa::path(get, path = "/api/log/operation/list", params(LogQuery), responses((status = 200, description = "Operation logs, newest first")), tag = "log")]
pub async fn list_operation_logs(
    State(state): State<ApiState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Page<OperationLog>> {
    let (items, total) = state.audit_log.list(&query)?;
    Ok(ok(Page { items, total }))
}

#[utoipa::path(delete, path = "/api/log/operation/delete/batch", request_body = Value, responses((status = 200, description = "Number of deleted logs")), tag = "log")]
pub async fn delete_operation_logs(State(state): State<ApiState>, Json(body): Json<IdsRequest>) -> ApiResult<Value> {
    let removed = state.audit_log.delete_by_ids(&body.ids)?;
    Ok(ok(json!({ "deleted": removed })))
}
