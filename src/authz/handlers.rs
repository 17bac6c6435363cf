//! Named authorization handlers. A handler approves by returning `Ok(())`
//! and denies with `AuthzError::Forbidden`; any other error is an internal
//! failure and always aborts the surrounding chain.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::authz::acl::parse_mask;
use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;

#[async_trait]
pub trait PolicyHandler: Send + Sync {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError>;
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PolicyHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Registry holding only the built-ins `isNull` / `isNotNull`.
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register("isNull", Arc::new(IsNull));
        registry.register("isNotNull", Arc::new(IsNotNull));
        registry
    }

    /// Registry with the full handler set registered by the identity and
    /// ACL subsystems.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("deny", Arc::new(Deny));
        registry.register("authenticated", Arc::new(Authenticated));
        registry.register("hasId", Arc::new(HasId));
        registry.register("hasGroup", Arc::new(HasGroup));
        registry.register("hasAuthority", Arc::new(HasAuthority));
        registry.register("hasPermission", Arc::new(HasPermission));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn PolicyHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PolicyHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// JS-style truthiness, which the expression language leans on.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn arg_str(args: &[Value], index: usize, handler: &str) -> Result<String, AuthzError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(AuthzError::InvalidExpression(format!(
            "`{handler}` expects a string at argument {index}"
        ))),
    }
}

/// A permission argument: a raw mask number or a permission name.
fn arg_mask(args: &[Value], index: usize, handler: &str) -> Result<i32, AuthzError> {
    let value = args.get(index).ok_or_else(|| {
        AuthzError::InvalidExpression(format!(
            "`{handler}` expects a permission at argument {index}"
        ))
    })?;
    parse_mask(value)
}

/// Passes when the expression (if any) resolves to a falsy value.
struct IsNull;

#[async_trait]
impl PolicyHandler for IsNull {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let value = match args.first() {
            Some(Value::String(expr)) => ctx.fetch(expr).await?,
            _ => Value::Null,
        };
        if truthy(&value) {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// Passes when the expression resolves to a truthy value.
struct IsNotNull;

#[async_trait]
impl PolicyHandler for IsNotNull {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let value = match args.first() {
            Some(Value::String(expr)) => ctx.fetch(expr).await?,
            _ => Value::Null,
        };
        if !truthy(&value) {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// Unconditional denial, or conditional on an expression.
struct Deny;

#[async_trait]
impl PolicyHandler for Deny {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let value = match args.first() {
            Some(Value::String(expr)) => ctx.fetch(expr).await?,
            _ => Value::Bool(true),
        };
        if truthy(&value) {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

struct Authenticated;

#[async_trait]
impl PolicyHandler for Authenticated {
    async fn check(&self, ctx: &RequestContext, _args: &[Value]) -> Result<(), AuthzError> {
        if ctx.principal().is_none() {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// Passes when the expression resolves to the authenticated user's own id.
struct HasId;

#[async_trait]
impl PolicyHandler for HasId {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let expr = arg_str(args, 0, "hasId")?;
        let value = ctx.fetch(&expr).await?;

        let matches = match (ctx.principal(), value.as_i64()) {
            (Some(user), Some(id)) => user.id == id,
            _ => false,
        };
        if !matches {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// Passes when the user belongs to any of the named groups.
struct HasGroup;

#[async_trait]
impl PolicyHandler for HasGroup {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let Some(user) = ctx.principal() else {
            return Err(AuthzError::Forbidden);
        };
        let any = args
            .iter()
            .filter_map(Value::as_str)
            .any(|name| user.has_group(name));
        if !any {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// Passes when the user holds any of the named authorities.
struct HasAuthority;

#[async_trait]
impl PolicyHandler for HasAuthority {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let Some(user) = ctx.principal() else {
            return Err(AuthzError::Forbidden);
        };
        let any = args
            .iter()
            .filter_map(Value::as_str)
            .any(|name| user.has_authority(name));
        if !any {
            return Err(AuthzError::Forbidden);
        }
        Ok(())
    }
}

/// `hasPermission(mask, resourceType, contextExpr, negativeThrows?)`.
///
/// Resolves the context expression to an object id (or an array of ids,
/// each checked independently) and delegates to the ACL resolver. The
/// boolean outcome is discarded: denial only surfaces through an explicit
/// deny entry or the `negativeThrows` flag, exactly as the resolver raises
/// it.
struct HasPermission;

#[async_trait]
impl PolicyHandler for HasPermission {
    async fn check(&self, ctx: &RequestContext, args: &[Value]) -> Result<(), AuthzError> {
        let mask = arg_mask(args, 0, "hasPermission")?;
        let type_name = arg_str(args, 1, "hasPermission")?;
        let expr = arg_str(args, 2, "hasPermission")?;
        let negative = args.get(3).map(truthy).unwrap_or(false);

        let resolved = ctx.fetch(&expr).await?;
        let ids = match resolved {
            Value::Array(values) => values,
            other => vec![other],
        };

        for value in ids {
            let object_id = match value {
                Value::Null => None,
                Value::Number(n) => Some(n.as_i64().ok_or_else(|| {
                    AuthzError::InvalidExpression("object id is not an integer".into())
                })?),
                other => {
                    return Err(AuthzError::InvalidExpression(format!(
                        "`{other}` is not usable as an object id"
                    )))
                }
            };

            ctx.acl()
                .has_permission(mask, &type_name, object_id, negative, ctx.principal())
                .await?;
        }

        Ok(())
    }
}
