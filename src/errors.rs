use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PalisadeError {
    #[error("Config error: {0}")]
    #[diagnostic(code(palisade::config))]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    #[diagnostic(code(palisade::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] crate::authz::errors::AuthzError),

    #[error("{0}")]
    #[diagnostic(code(palisade::other))]
    Other(String),
}
