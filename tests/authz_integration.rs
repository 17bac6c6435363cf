//! End-to-end flows over a real database: context expressions resolving
//! through sea-orm, policy chains guarding with identity and ACL handlers,
//! and the decision cache against the database-backed entry loader.

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;

use helpers::db::{seed_acl_entry, seed_user, seed_user_with_authority, TestDb};
use palisade::authz::acl::AclResolver;
use palisade::authz::chain::PolicyChain;
use palisade::authz::context::RequestContext;
use palisade::authz::errors::AuthzError;
use palisade::authz::handlers::HandlerRegistry;
use palisade::authz::models::ModelRegistry;
use palisade::storage::{self, DbAclEntryLoader};
use sea_orm::DatabaseConnection;
use serde_json::json;

async fn context_for(
    db: &DatabaseConnection,
    user_id: Option<i64>,
    params: HashMap<String, String>,
) -> RequestContext {
    let acl = Arc::new(AclResolver::new(Arc::new(DbAclEntryLoader::new(db.clone()))));
    let models = Arc::new(ModelRegistry::with_defaults());

    let principal = match user_id {
        Some(id) => storage::load_principal(db, id)
            .await
            .expect("Failed to load principal"),
        None => None,
    };

    RequestContext::new(db.clone(), acl, models)
        .with_principal(principal)
        .with_path_params(params)
}

#[tokio::test]
async fn test_model_expressions_resolve_through_database() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let alice = seed_user(db, "alice").await;
    let doc = storage::create_document(db, alice.id, "intro")
        .await
        .expect("Failed to create document");

    let ctx = context_for(
        db,
        None,
        [("documentId".to_string(), doc.id.to_string())].into(),
    )
    .await;

    let owner = ctx
        .fetch("Document(params.documentId).owner_id")
        .await
        .expect("Failed to fetch owner");
    assert_eq!(owner, json!(alice.id));

    // Nested lookup: document -> owner -> username
    let username = ctx
        .fetch("User(Document(params.documentId).owner_id).username")
        .await
        .expect("Failed to fetch username");
    assert_eq!(username, json!("alice"));
}

#[tokio::test]
async fn test_model_lookup_by_named_column() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let alice = seed_user(db, "alice").await;
    storage::create_document(db, alice.id, "intro")
        .await
        .expect("Failed to create document");

    let ctx = context_for(db, None, [("slug".to_string(), "intro".to_string())].into()).await;

    let owner = ctx
        .fetch("Document(title=params.slug).owner_id")
        .await
        .expect("Failed to fetch owner");
    assert_eq!(owner, json!(alice.id));
}

#[tokio::test]
async fn test_model_lookup_missing_row_is_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let ctx = context_for(db, None, HashMap::new()).await;

    let err = ctx.fetch("Document(999999)").await.unwrap_err();
    assert!(matches!(err, AuthzError::NotFound));
}

#[tokio::test]
async fn test_model_lookup_null_param_resolves_null() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let ctx = context_for(db, None, HashMap::new()).await;

    // params.missing is null, so the lookup never reaches the database
    let value = ctx
        .fetch("Document(title=params.missing).id")
        .await
        .expect("Failed to fetch");
    assert_eq!(value, serde_json::Value::Null);
}

#[tokio::test]
async fn test_owner_or_admin_chain() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let alice = seed_user(db, "alice").await;
    let bob = seed_user_with_authority(db, "bob", "ADMIN").await;
    let carol = seed_user(db, "carol").await;
    let doc = storage::create_document(db, alice.id, "intro")
        .await
        .expect("Failed to create document");

    let registry = HandlerRegistry::with_defaults();
    let params: HashMap<String, String> =
        [("documentId".to_string(), doc.id.to_string())].into();

    // Owner passes via hasId
    let ctx = context_for(db, Some(alice.id), params.clone()).await;
    let outcome = PolicyChain::new(&registry, &ctx)
        .call("hasId", vec![json!("Document(params.documentId).owner_id")])
        .unwrap()
        .or()
        .call("hasAuthority", vec![json!("ADMIN")])
        .unwrap()
        .await;
    assert!(outcome.is_ok());

    // Admin passes via the OR branch
    let ctx = context_for(db, Some(bob.id), params.clone()).await;
    let outcome = PolicyChain::new(&registry, &ctx)
        .call("hasId", vec![json!("Document(params.documentId).owner_id")])
        .unwrap()
        .or()
        .call("hasAuthority", vec![json!("ADMIN")])
        .unwrap()
        .await;
    assert!(outcome.is_ok());

    // Neither owner nor admin
    let ctx = context_for(db, Some(carol.id), params).await;
    let err = PolicyChain::new(&registry, &ctx)
        .call("hasId", vec![json!("Document(params.documentId).owner_id")])
        .unwrap()
        .or()
        .call("hasAuthority", vec![json!("ADMIN")])
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden));
}

#[tokio::test]
async fn test_acl_precedence_with_database_loader() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    // USER is denied type-wide; MANAGER is granted. Only managers get in.
    let manager = seed_user_with_authority(db, "manager", "MANAGER").await;
    let plain = seed_user_with_authority(db, "plain", "USER").await;

    let user_authority = storage::get_authority_by_name(db, "USER")
        .await
        .expect("Query failed")
        .expect("Authority not found");
    let manager_authority = storage::get_authority_by_name(db, "MANAGER")
        .await
        .expect("Query failed")
        .expect("Authority not found");

    // The manager also belongs to USER, so both entries apply to them.
    storage::grant_authority(db, manager.id, user_authority.id)
        .await
        .expect("Failed to grant authority");

    seed_acl_entry(db, "Document", None, user_authority.id, false, 1, false).await;
    seed_acl_entry(db, "Document", None, manager_authority.id, false, 1, true).await;

    let acl = AclResolver::new(Arc::new(DbAclEntryLoader::new(db.clone())));

    let manager_principal = storage::load_principal(db, manager.id)
        .await
        .expect("Query failed")
        .expect("Principal not found");
    let plain_principal = storage::load_principal(db, plain.id)
        .await
        .expect("Query failed")
        .expect("Principal not found");

    // Grant beats deny for the manager
    let allowed = acl
        .has_permission(1, "Document", None, false, Some(&manager_principal))
        .await
        .expect("Check failed");
    assert!(allowed);

    // Explicit deny is fatal for the plain user
    let err = acl
        .has_permission(1, "Document", None, false, Some(&plain_principal))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden));

    // A configured ACL mandates authentication
    let err = acl
        .has_permission(1, "Document", None, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden));
}

#[tokio::test]
async fn test_type_level_fallback_with_database_loader() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let reader = seed_user_with_authority(db, "reader", "READER").await;
    let authority = storage::get_authority_by_name(db, "READER")
        .await
        .expect("Query failed")
        .expect("Authority not found");

    // Type-level grant only; object 42 has no entries of its own.
    seed_acl_entry(db, "Document", None, authority.id, false, 1, true).await;

    let acl = AclResolver::new(Arc::new(DbAclEntryLoader::new(db.clone())));
    let principal = storage::load_principal(db, reader.id)
        .await
        .expect("Query failed")
        .expect("Principal not found");

    let allowed = acl
        .has_permission(1, "Document", Some(42), false, Some(&principal))
        .await
        .expect("Check failed");
    assert!(allowed);

    // Unrelated type stays unresolved and honors the negative flag
    let err = acl
        .has_permission(1, "Image", Some(42), true, Some(&principal))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden));
}

#[tokio::test]
async fn test_cache_serves_stale_decisions_until_cleared() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let bob = seed_user(db, "bob").await;
    let acl = AclResolver::new(Arc::new(DbAclEntryLoader::new(db.clone())));
    let principal = storage::load_principal(db, bob.id)
        .await
        .expect("Query failed")
        .expect("Principal not found");

    // First check caches the empty decision
    let allowed = acl
        .has_permission(1, "Document", Some(7), false, Some(&principal))
        .await
        .expect("Check failed");
    assert!(!allowed);

    // A new grant is invisible until the cache is cleared
    seed_acl_entry(db, "Document", Some(7), bob.id, true, 1, true).await;
    let allowed = acl
        .has_permission(1, "Document", Some(7), false, Some(&principal))
        .await
        .expect("Check failed");
    assert!(!allowed);

    acl.clear_cache();
    let allowed = acl
        .has_permission(1, "Document", Some(7), false, Some(&principal))
        .await
        .expect("Check failed");
    assert!(allowed);
}
