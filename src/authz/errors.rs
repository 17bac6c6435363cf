use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    /// Authorization denied. The only error kind ever swallowed internally,
    /// and only while attempting an OR branch of a policy chain.
    #[error("Access denied")]
    #[diagnostic(code(palisade::authz::forbidden))]
    Forbidden,

    /// A referenced entity does not exist during expression resolution.
    #[error("Referenced resource does not exist")]
    #[diagnostic(code(palisade::authz::not_found))]
    NotFound,

    #[error("Invalid context expression: {0}")]
    #[diagnostic(
        code(palisade::authz::invalid_expression),
        help("Syntax: NAME, NAME.key, NAME(ARG), NAME(param=ARG), NAME(ARG).key; reserved names: params, query, returnValue")
    )]
    InvalidExpression(String),

    #[error("No authorization handler registered under `{0}`")]
    #[diagnostic(
        code(palisade::authz::unknown_handler),
        help("Register the handler on the HandlerRegistry before naming it in a chain")
    )]
    UnknownHandler(String),

    #[error("No model registered under `{0}`")]
    #[diagnostic(
        code(palisade::authz::unknown_model),
        help("Register the entity on the ModelRegistry to make it addressable from context expressions")
    )]
    UnknownModel(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(palisade::authz::db))]
    Db(#[from] sea_orm::DbErr),
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthzError::Forbidden => StatusCode::FORBIDDEN,
            AuthzError::NotFound => StatusCode::NOT_FOUND,
            // Configuration/programming mistakes and db failures are internal,
            // never downgraded to an authorization decision.
            AuthzError::InvalidExpression(_)
            | AuthzError::UnknownHandler(_)
            | AuthzError::UnknownModel(_)
            | AuthzError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "authorization internals failed");
        }

        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
