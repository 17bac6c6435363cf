//! Per-request state consulted by authorization handlers: the authenticated
//! principal, URL parameters, the staged response body, and the resolver
//! that gives context expressions their meaning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::authz::acl::AclResolver;
use crate::authz::errors::AuthzError;
use crate::authz::eval::{evaluate, ExprResolver};
use crate::authz::expr::{ExpressionParser, DEFAULT_KEY};
use crate::authz::models::ModelRegistry;
use crate::authz::plan::plan;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

/// The authenticated subject: user id plus group and authority memberships.
/// Produced by the authentication collaborator, consumed read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub groups: Vec<NamedRef>,
    pub authorities: Vec<NamedRef>,
}

impl Principal {
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    pub fn has_authority(&self, name: &str) -> bool {
        self.authorities.iter().any(|a| a.name == name)
    }
}

pub struct RequestContext {
    db: DatabaseConnection,
    acl: Arc<AclResolver>,
    models: Arc<ModelRegistry>,
    principal: Option<Principal>,
    path_params: HashMap<String, String>,
    query: HashMap<String, String>,
    /// Response body staged by the surrounding request pipeline, readable
    /// from expressions as `returnValue`.
    return_value: RwLock<Option<Value>>,
    /// Rows fetched by model lookups, memoized for the request's lifetime.
    /// Concurrent writes to one key are idempotent overwrites.
    row_cache: Mutex<HashMap<String, Value>>,
}

impl RequestContext {
    pub fn new(db: DatabaseConnection, acl: Arc<AclResolver>, models: Arc<ModelRegistry>) -> Self {
        Self {
            db,
            acl,
            models,
            principal: None,
            path_params: HashMap::new(),
            query: HashMap::new(),
            return_value: RwLock::new(None),
            row_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    pub fn with_path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn acl(&self) -> &AclResolver {
        &self.acl
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_return_value(&self, value: Value) {
        *self
            .return_value
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    /// Parse, plan, and evaluate a context expression against this request.
    pub async fn fetch(&self, expression: &str) -> Result<Value, AuthzError> {
        let parser = ExpressionParser::new();
        let root = parser.parse(expression)?;
        let instructions = plan(&root);
        evaluate(&instructions, self).await
    }

    async fn fetch_model_value(
        &self,
        name: &str,
        key: Option<&str>,
        params: &HashMap<String, Value>,
    ) -> Result<Value, AuthzError> {
        let fetcher = self
            .models
            .get(name)
            .ok_or_else(|| AuthzError::UnknownModel(name.to_string()))?;

        // A null match value makes the whole lookup null without a query.
        if params.values().any(Value::is_null) {
            return Ok(Value::Null);
        }

        let mut filters: Vec<(String, Value)> = params
            .iter()
            .map(|(param, value)| {
                let column = if param == DEFAULT_KEY {
                    fetcher.primary_key().to_string()
                } else {
                    param.clone()
                };
                (column, value.clone())
            })
            .collect();
        filters.sort_by(|a, b| a.0.cmp(&b.0));

        let cache_key = {
            let parts: Vec<String> = filters
                .iter()
                .map(|(column, value)| format!("{column}({value})"))
                .collect();
            format!("{name}.{}", parts.join(","))
        };

        let cached = self
            .row_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&cache_key)
            .cloned();

        let row = match cached {
            Some(row) => row,
            None => {
                let row = fetcher
                    .fetch_row(&self.db, &filters)
                    .await?
                    .ok_or(AuthzError::NotFound)?;
                self.row_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(cache_key, row.clone());
                row
            }
        };

        let column = key.unwrap_or_else(|| fetcher.primary_key());
        Ok(row.get(column).cloned().unwrap_or(Value::Null))
    }

    fn return_value_ids(&self) -> Value {
        let body = self
            .return_value
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match body {
            Some(Value::Array(entries)) => Value::Array(
                entries
                    .iter()
                    .map(|entry| entry.get("id").cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
            Some(entry) => entry.get("id").cloned().unwrap_or(Value::Null),
            None => Value::Null,
        }
    }
}

/// URL parameter and query values arrive as strings; numeric-looking ones
/// come back as numbers so they compare against database ids.
fn coerce_scalar(raw: Option<&String>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.clone())
}

#[async_trait]
impl ExprResolver for RequestContext {
    async fn resolve(
        &self,
        name: &str,
        key: Option<&str>,
        params: Option<&HashMap<String, Value>>,
    ) -> Result<Value, AuthzError> {
        if let Some(params) = params {
            return self.fetch_model_value(name, key, params).await;
        }

        match name {
            "params" => {
                let field = key.ok_or_else(|| {
                    AuthzError::InvalidExpression(
                        "`params` requires a field, e.g. params.userId".into(),
                    )
                })?;
                Ok(coerce_scalar(self.path_params.get(field)))
            }
            "query" => {
                let field = key.ok_or_else(|| {
                    AuthzError::InvalidExpression(
                        "`query` requires a field, e.g. query.limit".into(),
                    )
                })?;
                Ok(coerce_scalar(self.query.get(field)))
            }
            "returnValue" => Ok(self.return_value_ids()),
            literal => {
                if let Ok(n) = literal.parse::<i64>() {
                    return Ok(Value::Number(n.into()));
                }
                Err(AuthzError::InvalidExpression(format!(
                    "`{literal}` is not a reserved name, a number, or a model lookup"
                )))
            }
        }
    }
}
