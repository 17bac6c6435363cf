//! Iterative bottom-up evaluation of a planned instruction list.
//!
//! The evaluator owns no I/O: the meaning of "resolve a name/key/params
//! lookup" is injected through [`ExprResolver`], so the same walk serves
//! database lookups, URL-parameter lookups, and test stubs alike.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::plan::Instruction;

/// Resolves one lookup node to a concrete value.
#[async_trait]
pub trait ExprResolver: Send + Sync {
    async fn resolve(
        &self,
        name: &str,
        key: Option<&str>,
        params: Option<&HashMap<String, Value>>,
    ) -> Result<Value, AuthzError>;
}

struct Slot {
    key: Option<String>,
    value: Value,
}

/// Walk the instruction list from last to first, feeding each node's
/// resolved parameters from an evaluation stack. A node with N params
/// consumes the N most recently produced slots (matched by slot key) and
/// pushes its own value under its parent slot key; after the full pass the
/// single remaining slot holds the root's value.
///
/// Resolver calls are memoized per evaluation for identical
/// `(name, key, params)`, since several parents may reference the same
/// sub-expression.
pub async fn evaluate(
    instructions: &[Instruction<'_>],
    resolver: &dyn ExprResolver,
) -> Result<Value, AuthzError> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut memo: HashMap<String, Value> = HashMap::new();

    for item in instructions.iter().rev() {
        let params = if item.param_count > 0 {
            let mut map = HashMap::with_capacity(item.param_count);
            for _ in 0..item.param_count {
                let slot = slots.pop().ok_or_else(|| {
                    AuthzError::InvalidExpression(
                        "evaluation stack exhausted before all parameters were filled".into(),
                    )
                })?;
                map.insert(slot.key.unwrap_or_default(), slot.value);
            }
            Some(map)
        } else {
            None
        };

        let memo_key = memo_key(&item.node.name, item.node.key.as_deref(), params.as_ref());
        let value = match memo.get(&memo_key) {
            Some(value) => value.clone(),
            None => {
                let value = resolver
                    .resolve(&item.node.name, item.node.key.as_deref(), params.as_ref())
                    .await?;
                memo.insert(memo_key, value.clone());
                value
            }
        };

        slots.push(Slot {
            key: item.parent_slot_key.map(str::to_string),
            value,
        });
    }

    let root = slots.pop().ok_or_else(|| {
        AuthzError::InvalidExpression("cannot evaluate an empty instruction list".into())
    })?;
    Ok(root.value)
}

fn memo_key(name: &str, key: Option<&str>, params: Option<&HashMap<String, Value>>) -> String {
    // BTreeMap gives the serialized params a stable field order
    let params_repr = params
        .map(|p| {
            let ordered: BTreeMap<&str, &Value> = p.iter().map(|(k, v)| (k.as_str(), v)).collect();
            serde_json::to_string(&ordered).unwrap_or_default()
        })
        .unwrap_or_default();
    format!("{name}|{}|{params_repr}", key.unwrap_or(""))
}
