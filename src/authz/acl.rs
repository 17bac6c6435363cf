//! Grant/deny resolution over raw ACL entries, with a process-wide decision
//! cache.
//!
//! The cache has no TTL and no automatic invalidation: whoever mutates ACL
//! entries must call [`AclResolver::clear_cache`] afterwards, and until then
//! concurrent requests may read stale decisions. A racing miss recomputes the
//! same decision, which is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::authz::context::Principal;
use crate::authz::errors::AuthzError;

/// Permission bits carried by ACL entries. Raw masks are accepted anywhere a
/// permission is, bounded to `1..=65536`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPermission {
    Read,
    Write,
    Create,
    Delete,
    Admin,
}

impl AclPermission {
    pub fn mask(self) -> i32 {
        match self {
            AclPermission::Read => 1,
            AclPermission::Write => 2,
            AclPermission::Create => 4,
            AclPermission::Delete => 8,
            AclPermission::Admin => 16,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "READ" => Some(AclPermission::Read),
            "WRITE" => Some(AclPermission::Write),
            "CREATE" => Some(AclPermission::Create),
            "DELETE" => Some(AclPermission::Delete),
            "ADMIN" => Some(AclPermission::Admin),
            _ => None,
        }
    }
}

pub const MIN_MASK: i32 = 1;
pub const MAX_MASK: i32 = 65536;

/// A permission given as a raw mask number or a permission name.
pub fn parse_mask(value: &serde_json::Value) -> Result<i32, AuthzError> {
    match value {
        serde_json::Value::Number(n) => {
            let mask = n.as_i64().unwrap_or(0) as i32;
            if !(MIN_MASK..=MAX_MASK).contains(&mask) {
                return Err(AuthzError::InvalidExpression(format!(
                    "permission mask {mask} out of range"
                )));
            }
            Ok(mask)
        }
        serde_json::Value::String(s) => AclPermission::from_name(s)
            .map(AclPermission::mask)
            .ok_or_else(|| AuthzError::InvalidExpression(format!("unknown permission `{s}`"))),
        other => Err(AuthzError::InvalidExpression(format!(
            "`{other}` is not a permission"
        ))),
    }
}

/// Raw ACL row as loaded from persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntryRow {
    pub type_name: String,
    /// `None` scopes the entry to the whole resource type.
    pub object_id: Option<i64>,
    /// Subject id: a user id when `principal`, an authority id otherwise.
    pub sid: i64,
    pub principal: bool,
    pub mask: i32,
    pub granting: bool,
}

/// Loads the raw entries for one `(mask, type, object)` triple.
#[async_trait]
pub trait AclEntryLoader: Send + Sync {
    async fn load_entries(
        &self,
        mask: i32,
        type_name: &str,
        object_id: Option<i64>,
    ) -> Result<Vec<AclEntryRow>, AuthzError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AclKey {
    mask: i32,
    type_name: String,
    object_id: Option<i64>,
}

/// Entries for one cache key, partitioned into the four subject-id buckets.
#[derive(Debug, Default)]
pub struct AclDecision {
    pub entry_count: usize,
    pub granted_users: Vec<i64>,
    pub granted_authorities: Vec<i64>,
    pub ungranted_users: Vec<i64>,
    pub ungranted_authorities: Vec<i64>,
}

impl AclDecision {
    fn from_entries(entries: &[AclEntryRow]) -> Self {
        let bucket = |principal: bool, granting: bool| -> Vec<i64> {
            entries
                .iter()
                .filter(|e| e.principal == principal && e.granting == granting)
                .map(|e| e.sid)
                .collect()
        };

        Self {
            entry_count: entries.len(),
            granted_users: bucket(true, true),
            granted_authorities: bucket(false, true),
            ungranted_users: bucket(true, false),
            ungranted_authorities: bucket(false, false),
        }
    }
}

/// One long-lived resolver instance owns the cache; consumers receive it by
/// `Arc`, never through ambient global state.
pub struct AclResolver {
    loader: Arc<dyn AclEntryLoader>,
    cache: RwLock<HashMap<AclKey, Arc<AclDecision>>>,
}

impl AclResolver {
    pub fn new(loader: Arc<dyn AclEntryLoader>) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every cached decision. Must be called after any ACL entry
    /// mutation; there is no automatic invalidation.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Cached decision for the triple, loading and partitioning the raw
    /// entries on first use. Repeated calls with the same key return the
    /// same `Arc` without touching the loader again.
    pub async fn get_acl(
        &self,
        mask: i32,
        type_name: &str,
        object_id: Option<i64>,
    ) -> Result<Arc<AclDecision>, AuthzError> {
        let key = AclKey {
            mask,
            type_name: type_name.to_string(),
            object_id,
        };

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(decision) = cache.get(&key) {
                return Ok(decision.clone());
            }
        }

        let entries = self.loader.load_entries(mask, type_name, object_id).await?;
        let decision = Arc::new(AclDecision::from_entries(&entries));

        // A racing request may have inserted in the meantime; last write
        // wins and both decisions are equivalent.
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, decision.clone());

        Ok(decision)
    }

    /// Interpret a decision for the given principal.
    ///
    /// - no entries: negative, no login required
    /// - entries but no principal: any configured ACL mandates authentication
    /// - positive grants take absolute priority over explicit denies
    /// - an explicit deny is fatal
    /// - mentioned nowhere: negative, but not an error
    pub fn check_acl(
        &self,
        decision: &AclDecision,
        principal: Option<&Principal>,
    ) -> Result<bool, AuthzError> {
        if decision.entry_count == 0 {
            return Ok(false);
        }

        let Some(user) = principal else {
            return Err(AuthzError::Forbidden);
        };

        if decision.granted_users.contains(&user.id)
            || user
                .authorities
                .iter()
                .any(|a| decision.granted_authorities.contains(&a.id))
        {
            return Ok(true);
        }

        if decision.ungranted_users.contains(&user.id)
            || user
                .authorities
                .iter()
                .any(|a| decision.ungranted_authorities.contains(&a.id))
        {
            return Err(AuthzError::Forbidden);
        }

        Ok(false)
    }

    /// Object-level check with type-level fallback.
    ///
    /// An object whose ACL does not grant the principal is rescued by a
    /// type-level grant (`object_id = None`, same mask). With
    /// `negative_throws`, an unresolved outcome fails with Forbidden instead
    /// of returning `false`. An explicit deny from either level always
    /// propagates.
    pub async fn has_permission(
        &self,
        mask: i32,
        type_name: &str,
        object_id: Option<i64>,
        negative_throws: bool,
        principal: Option<&Principal>,
    ) -> Result<bool, AuthzError> {
        let acl = self.get_acl(mask, type_name, object_id).await?;

        if self.check_acl(&acl, principal)? {
            return Ok(true);
        }

        if object_id.is_some() {
            let type_acl = self.get_acl(mask, type_name, None).await?;
            if self.check_acl(&type_acl, principal)? {
                return Ok(true);
            }
        }

        if negative_throws {
            return Err(AuthzError::Forbidden);
        }

        Ok(false)
    }
}
