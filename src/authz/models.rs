//! Maps expression entity names ("User", "Document") to row fetchers so the
//! resolver can turn a model lookup into a database query without the
//! evaluator knowing anything about the ORM.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr};
use sea_orm::{DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::entities;

/// Fetches one row of a named entity as JSON, matched on column filters.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Column consulted when the expression omits a column name.
    fn primary_key(&self) -> &str;

    async fn fetch_row(
        &self,
        db: &DatabaseConnection,
        filters: &[(String, Value)],
    ) -> Result<Option<Value>, AuthzError>;
}

/// Generic fetcher over any sea-orm entity whose model serializes to JSON.
pub struct EntityFetcher<E> {
    primary_key: String,
    _marker: PhantomData<E>,
}

impl<E> EntityFetcher<E> {
    pub fn new(primary_key: &str) -> Self {
        Self {
            primary_key: primary_key.to_string(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E> ModelFetcher for EntityFetcher<E>
where
    E: EntityTrait,
    E::Model: Serialize + Sync,
{
    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    async fn fetch_row(
        &self,
        db: &DatabaseConnection,
        filters: &[(String, Value)],
    ) -> Result<Option<Value>, AuthzError> {
        let mut select = E::find();
        for (column, value) in filters {
            select = select.filter(Expr::col(Alias::new(column.as_str())).eq(db_value(value)?));
        }

        match select.one(db).await? {
            Some(model) => {
                let row = serde_json::to_value(&model).map_err(|e| {
                    AuthzError::InvalidExpression(format!("row is not representable as JSON: {e}"))
                })?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }
}

fn db_value(value: &Value) -> Result<sea_orm::Value, AuthzError> {
    match value {
        Value::Number(n) if n.is_i64() => Ok(n.as_i64().into()),
        Value::Number(n) => Ok(n.as_f64().into()),
        Value::String(s) => Ok(s.as_str().into()),
        Value::Bool(b) => Ok((*b).into()),
        other => Err(AuthzError::InvalidExpression(format!(
            "`{other}` cannot be used as a lookup value"
        ))),
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    fetchers: HashMap<String, Arc<dyn ModelFetcher>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every entity of this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("User", Arc::new(EntityFetcher::<entities::User>::new("id")));
        registry.register(
            "Authority",
            Arc::new(EntityFetcher::<entities::Authority>::new("id")),
        );
        registry.register("Group", Arc::new(EntityFetcher::<entities::Group>::new("id")));
        registry.register(
            "AclClass",
            Arc::new(EntityFetcher::<entities::AclClass>::new("id")),
        );
        registry.register(
            "AclEntry",
            Arc::new(EntityFetcher::<entities::AclEntry>::new("id")),
        );
        registry.register(
            "Document",
            Arc::new(EntityFetcher::<entities::Document>::new("id")),
        );
        registry
    }

    pub fn register(&mut self, name: &str, fetcher: Arc<dyn ModelFetcher>) {
        self.fetchers.insert(name.to_string(), fetcher);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ModelFetcher>> {
        self.fetchers.get(name)
    }
}
