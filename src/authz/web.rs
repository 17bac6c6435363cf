//! HTTP surface of the authorization core: permission checks, expression
//! evaluation, and the ACL entry admin endpoints.
//!
//! The caller's identity arrives as an `x-user-id` header resolved through
//! storage; session authentication itself lives in front of this service.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::authz::acl::{parse_mask, AclResolver, MAX_MASK, MIN_MASK};
use crate::authz::chain::PolicyChain;
use crate::authz::context::{Principal, RequestContext};
use crate::authz::errors::AuthzError;
use crate::authz::handlers::HandlerRegistry;
use crate::authz::models::ModelRegistry;
use crate::storage;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub acl: Arc<AclResolver>,
    pub handlers: Arc<HandlerRegistry>,
    pub models: Arc<ModelRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/evaluate", post(handle_evaluate))
        .route("/v1/entries", get(list_entries).post(create_entry))
        .route("/v1/entries/{id}", delete(delete_entry))
        .route("/v1/cache/clear", post(clear_cache))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn principal_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Principal>, AuthzError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());

    match user_id {
        Some(id) => Ok(storage::load_principal(&state.db, id).await?),
        None => Ok(None),
    }
}

fn request_context(
    state: &AppState,
    principal: Option<Principal>,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
) -> RequestContext {
    RequestContext::new(state.db.clone(), state.acl.clone(), state.models.clone())
        .with_principal(principal)
        .with_path_params(params)
        .with_query(query)
}

/// Admin endpoints sit behind a policy chain rather than ad-hoc checks.
async fn require_acl_admin(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<(), AuthzError> {
    PolicyChain::new(&state.handlers, ctx)
        .call("authenticated", vec![])?
        .and()
        .call("hasAuthority", vec![json!("ACL_ADMIN")])?
        .await
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    /// Mask number or permission name, e.g. 1 or "READ"
    permission: Value,
    /// e.g. "Document"
    resource_type: String,
    /// Context expression resolving to the object id(s), e.g.
    /// "params.documentId" or "Document(3).id"; omitted = type-level check
    object: Option<String>,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    query: HashMap<String, String>,
    /// Treat "mentioned nowhere" as a denial
    #[serde(default)]
    negative: bool,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
}

async fn handle_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AuthzError> {
    let mask = parse_mask(&req.permission)?;
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, req.params, req.query);

    let object_ids: Vec<Option<i64>> = match &req.object {
        None => vec![None],
        Some(expr) => {
            let resolved = ctx.fetch(expr).await?;
            let values = match resolved {
                Value::Array(values) => values,
                other => vec![other],
            };
            values
                .into_iter()
                .map(|value| match value {
                    Value::Null => Ok(None),
                    Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| {
                        AuthzError::InvalidExpression("object id is not an integer".into())
                    }),
                    other => Err(AuthzError::InvalidExpression(format!(
                        "`{other}` is not usable as an object id"
                    ))),
                })
                .collect::<Result<_, _>>()?
        }
    };

    let mut allowed = true;
    for object_id in object_ids {
        match state
            .acl
            .has_permission(mask, &req.resource_type, object_id, req.negative, ctx.principal())
            .await
        {
            Ok(granted) => allowed = allowed && granted,
            Err(AuthzError::Forbidden) => {
                allowed = false;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Json(CheckResponse { allowed }))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    expression: String,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    query: HashMap<String, String>,
    /// Stand-in for the response body, readable as `returnValue`
    return_value: Option<Value>,
}

#[derive(Debug, Serialize)]
struct EvaluateResponse {
    value: Value,
}

async fn handle_evaluate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AuthzError> {
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, req.params, req.query);
    if let Some(body) = req.return_value {
        ctx.set_return_value(body);
    }

    let value = ctx.fetch(&req.expression).await?;
    Ok(Json(EvaluateResponse { value }))
}

async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<storage::AclEntryFilter>,
) -> Result<Json<Vec<storage::AclEntryView>>, AuthzError> {
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, HashMap::new(), HashMap::new());
    require_acl_admin(&state, &ctx).await?;

    let entries = storage::list_acl_entries(&state.db, filter).await?;
    Ok(Json(entries))
}

async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<storage::NewAclEntry>,
) -> Result<impl IntoResponse, AuthzError> {
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, HashMap::new(), HashMap::new());
    require_acl_admin(&state, &ctx).await?;

    if !(MIN_MASK..=MAX_MASK).contains(&input.mask) {
        let body = json!({ "error": format!("mask must be within {MIN_MASK}..={MAX_MASK}") });
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let resource_type = input.resource_type.clone();
    let entry = storage::create_acl_entry(&state.db, input).await?;

    // No automatic invalidation: every entry mutation clears the cache.
    state.acl.clear_cache();

    let view = storage::AclEntryView {
        id: entry.id,
        resource_type,
        object_id: entry.object_id,
        sid: entry.sid,
        principal: entry.principal,
        mask: entry.mask,
        granting: entry.granting,
    };
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

async fn delete_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AuthzError> {
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, HashMap::new(), HashMap::new());
    require_acl_admin(&state, &ctx).await?;

    if !storage::delete_acl_entry(&state.db, id).await? {
        return Err(AuthzError::NotFound);
    }
    state.acl.clear_cache();

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthzError> {
    let principal = principal_from_headers(&state, &headers).await?;
    let ctx = request_context(&state, principal, HashMap::new(), HashMap::new());
    require_acl_admin(&state, &ctx).await?;

    state.acl.clear_cache();
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
