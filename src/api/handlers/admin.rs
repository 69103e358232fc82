//! Admin user endpoints.
//!
//! Flow Overview:
//! 1) Take the claims attached by the bearer middleware (if any).
//! 2) Require an admin over the request audience.
//! 3) Run the operation through the [`AdminExecutor`](crate::admin::AdminExecutor).
//! 4) On success, hand the event to the webhook notifier (fire-and-forget).

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::{header::LINK, HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::IpAddr;
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    admin::AdminUserParams,
    api::AppState,
    auth::{require_admin, Claims},
    error::{Error, ErrorBody, Result},
    models::{AuditAction, User},
    storage::ListQuery,
    webhook::AdminEvent,
};

const USERS_PATH: &str = "/admin/users";
const TOTAL_COUNT_HEADER: &str = "x-total-count";

#[derive(Debug, Serialize, ToSchema)]
pub struct UserList {
    pub aud: String,
    pub users: Vec<User>,
}

#[utoipa::path(
    get,
    path = "/admin/users",
    params(ListQuery),
    responses(
        (status = 200, description = "Users of the request audience", body = UserList),
        (status = 401, description = "Missing or non-admin claims", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_users(
    Extension(state): Extension<AppState>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let claims = claims.map(|Extension(claims)| claims);
    let (_actor, aud) =
        require_admin(claims.as_ref(), &headers, &state.config, state.admin.store()).await?;
    let Query(query) = query.map_err(|err| Error::client(format!("Bad pagination parameters: {err}")))?;

    let page = state.admin.list(&aud, &query).await?;
    let headers = pagination_headers(&query, page.total);

    Ok((
        headers,
        Json(UserList {
            aud,
            users: page.users,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/admin/users/{user_id}",
    params(("user_id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "The user", body = User),
        (status = 400, description = "Malformed user id", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn get_user(
    Extension(state): Extension<AppState>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<User>> {
    let claims = claims.map(|Extension(claims)| claims);
    require_admin(claims.as_ref(), &headers, &state.config, state.admin.store()).await?;

    Ok(Json(state.admin.load_user(&user_id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = AdminUserParams,
    responses(
        (status = 200, description = "User created", body = User),
        (status = 400, description = "Missing identifiers or bad ban duration", body = ErrorBody),
        (status = 422, description = "Invalid or already registered identifiers", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn create_user(
    Extension(state): Extension<AppState>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    body: std::result::Result<Json<AdminUserParams>, JsonRejection>,
) -> Result<Json<User>> {
    let claims = claims.map(|Extension(claims)| claims);
    let (actor, aud) =
        require_admin(claims.as_ref(), &headers, &state.config, state.admin.store()).await?;
    let Json(params) = body.map_err(read_params_error)?;

    let user = state
        .admin
        .create(&actor, &aud, params, client_ip(&headers))
        .await?;
    notify(&state, AuditAction::UserSignedUp, &actor, &user);

    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/admin/users/{user_id}",
    params(("user_id" = String, Path, description = "User id")),
    request_body = AdminUserParams,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Malformed user id or bad ban duration", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody),
        (status = 422, description = "Password too short or identifier taken", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn update_user(
    Extension(state): Extension<AppState>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    body: std::result::Result<Json<AdminUserParams>, JsonRejection>,
) -> Result<Json<User>> {
    let claims = claims.map(|Extension(claims)| claims);
    let (actor, _aud) =
        require_admin(claims.as_ref(), &headers, &state.config, state.admin.store()).await?;
    let Json(params) = body.map_err(read_params_error)?;

    let user = state
        .admin
        .update(&actor, &user_id, params, client_ip(&headers))
        .await?;
    notify(&state, AuditAction::UserModified, &actor, &user);

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{user_id}",
    params(("user_id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    Extension(state): Extension<AppState>,
    claims: Option<Extension<Claims>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    let claims = claims.map(|Extension(claims)| claims);
    let (actor, _aud) =
        require_admin(claims.as_ref(), &headers, &state.config, state.admin.store()).await?;

    let user = state
        .admin
        .delete(&actor, &user_id, client_ip(&headers))
        .await?;
    notify(&state, AuditAction::UserDeleted, &actor, &user);

    Ok(Json(json!({})))
}

fn read_params_error(err: JsonRejection) -> Error {
    debug!(error = %err, "failed to read admin params");
    Error::client("Could not read params")
}

fn notify(state: &AppState, kind: AuditAction, actor: &User, user: &User) {
    if let Some(webhook) = &state.webhook {
        webhook.dispatch(AdminEvent::new(kind, actor, user));
    }
}

/// First hop of `X-Forwarded-For`, recorded with audit entries.
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn pagination_headers(query: &ListQuery, total: u64) -> HeaderMap {
    let page = query.page();
    let per_page = query.per_page();
    let last = total.div_ceil(per_page).max(1);

    let mut links = Vec::new();
    if page < last {
        links.push(format!(
            "<{USERS_PATH}?page={}&per_page={per_page}>; rel=\"next\"",
            page + 1
        ));
    }
    links.push(format!(
        "<{USERS_PATH}?page={last}&per_page={per_page}>; rel=\"last\""
    ));

    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_COUNT_HEADER, HeaderValue::from(total));
    if let Ok(link) = HeaderValue::from_str(&links.join(", ")) {
        headers.insert(LINK, link);
    }
    headers
}
