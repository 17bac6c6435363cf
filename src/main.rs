mod authz;
mod entities;
mod errors;
mod settings;
mod storage;
mod web;

use clap::Parser;
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "palisade", version, about = "Authorization decision service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and bring the schema up to date
    let db = storage::init(&settings.database).await.into_diagnostic()?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    // ensure an ACL administrator exists
    ensure_bootstrap_admin(&db).await?;

    // start web server
    web::serve(settings, db).await?;
    Ok(())
}

/// Seed the `admin` user with the ACL_ADMIN authority so the entry admin
/// endpoints are reachable on a fresh database.
async fn ensure_bootstrap_admin(
    db: &sea_orm::DatabaseConnection,
) -> Result<(), errors::PalisadeError> {
    let user = match storage::get_user_by_username(db, "admin").await? {
        Some(user) => user,
        None => {
            let user = storage::create_user(db, "admin", None, None).await?;
            tracing::info!(user_id = user.id, "Created default admin user");
            user
        }
    };

    if storage::get_authority_by_name(db, "ACL_ADMIN").await?.is_none() {
        let authority = storage::create_authority(db, "ACL_ADMIN").await?;
        storage::grant_authority(db, user.id, authority.id).await?;
        tracing::info!("Granted ACL_ADMIN to the default admin user");
    }

    Ok(())
}
