use std::net::SocketAddr;
use std::sync::Arc;

use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;

use crate::authz::acl::AclResolver;
use crate::authz::handlers::HandlerRegistry;
use crate::authz::models::ModelRegistry;
use crate::authz::web::{router, AppState};
use crate::settings::Settings;
use crate::storage::DbAclEntryLoader;

/// Wire the long-lived authorization state: one ACL resolver owning the
/// decision cache, plus the handler and model registries.
pub fn app_state(db: DatabaseConnection) -> AppState {
    let loader = Arc::new(DbAclEntryLoader::new(db.clone()));
    AppState {
        db,
        acl: Arc::new(AclResolver::new(loader)),
        handlers: Arc::new(HandlerRegistry::with_defaults()),
        models: Arc::new(ModelRegistry::with_defaults()),
    }
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let state = app_state(db);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;

    Ok(())
}
