//! Parser for the context-expression mini-language.
//!
//! Supported syntax:
//! - Bare lookups: `params.userId`, `query.limit`, `returnValue`, `17`
//! - Model lookups: `User(1)`, `User(params.userId).nickname`
//! - Named parameters: `Page(name=params.pageName).ownerId`
//! - Arbitrary nesting: `User(ShopOrder(orderCode=params.orderCode).userId).nickname`

use std::collections::HashMap;

use crate::authz::errors::AuthzError;

/// Column consulted when a lookup omits an explicit key or parameter name.
pub const DEFAULT_KEY: &str = "id";

/// One node of a parsed context expression. A leaf has `params = None`;
/// a call node carries a non-empty map of parameter name to sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub name: String,
    pub key: Option<String>,
    pub params: Option<HashMap<String, ExprNode>>,
}

pub struct ExpressionParser {
    default_key: String,
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self {
            default_key: DEFAULT_KEY.to_string(),
        }
    }
}

impl ExpressionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an expression string into a node tree.
    ///
    /// Grammar: `NAME ( "(" ARG ")" )? ( "." KEY )?` where `ARG` is either
    /// `SUBNAME "=" SUBEXPR` or a bare `SUBEXPR`, recursing into the same
    /// grammar. The key resolution rule: an explicit dot-suffix wins;
    /// otherwise a call node defaults to the configured key and a bare
    /// lookup has no key.
    pub fn parse(&self, expression: &str) -> Result<ExprNode, AuthzError> {
        let expression = expression.trim();

        let name_end = expression
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(expression.len());
        if name_end == 0 {
            return Err(AuthzError::InvalidExpression(format!(
                "expected a name at the start of `{expression}`"
            )));
        }
        let name = &expression[..name_end];
        let mut rest = expression[name_end..].trim_start();

        let mut arg = None;
        if let Some(stripped) = rest.strip_prefix('(') {
            let close = matching_paren(stripped).ok_or_else(|| {
                AuthzError::InvalidExpression(format!(
                    "missing closing parenthesis in `{expression}`"
                ))
            })?;
            let inner = stripped[..close].trim();
            if inner.is_empty() {
                return Err(AuthzError::InvalidExpression(format!(
                    "empty parameter in `{expression}`"
                )));
            }
            arg = Some(inner);
            rest = stripped[close + 1..].trim_start();
        }

        let mut key = None;
        if let Some(stripped) = rest.strip_prefix('.') {
            let k = stripped.trim();
            if k.is_empty() || !k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(AuthzError::InvalidExpression(format!(
                    "invalid key `{k}` in `{expression}`"
                )));
            }
            key = Some(k.to_string());
            rest = "";
        }
        if !rest.is_empty() {
            return Err(AuthzError::InvalidExpression(format!(
                "unexpected trailing input `{rest}` in `{expression}`"
            )));
        }

        let params = match arg {
            None => None,
            Some(arg) => {
                let (param_name, sub_expression) = self.split_param(arg)?;
                let mut params = HashMap::new();
                params.insert(param_name, self.parse(sub_expression)?);
                Some(params)
            }
        };

        // A call without an explicit dot-suffix reads the default column.
        if key.is_none() && params.is_some() {
            key = Some(self.default_key.clone());
        }

        Ok(ExprNode {
            name: name.to_string(),
            key,
            params,
        })
    }

    /// Split a call argument into `(parameter name, sub-expression)`.
    /// `orderCode=params.orderCode` names the parameter explicitly;
    /// a bare sub-expression falls back to the default key.
    fn split_param<'b>(&self, arg: &'b str) -> Result<(String, &'b str), AuthzError> {
        let name_end = arg
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(arg.len());
        let after = arg[name_end..].trim_start();

        if let Some(value) = after.strip_prefix('=') {
            if name_end == 0 {
                return Err(AuthzError::InvalidExpression(format!(
                    "empty parameter name in `{arg}`"
                )));
            }
            let value = value.trim();
            if value.is_empty() {
                return Err(AuthzError::InvalidExpression(format!(
                    "empty parameter value in `{arg}`"
                )));
            }
            return Ok((arg[..name_end].to_string(), value));
        }

        Ok((self.default_key.clone(), arg))
    }
}

/// Byte offset of the `)` matching an already-consumed `(`, or `None`.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
