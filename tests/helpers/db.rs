use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Create a test user
pub async fn seed_user(db: &DatabaseConnection, username: &str) -> palisade::entities::user::Model {
    palisade::storage::create_user(db, username, None, None)
        .await
        .expect("Failed to create test user")
}

/// Create a test user holding the named authority
pub async fn seed_user_with_authority(
    db: &DatabaseConnection,
    username: &str,
    authority: &str,
) -> palisade::entities::user::Model {
    let user = seed_user(db, username).await;

    let authority = match palisade::storage::get_authority_by_name(db, authority)
        .await
        .expect("Query failed")
    {
        Some(existing) => existing,
        None => palisade::storage::create_authority(db, authority)
            .await
            .expect("Failed to create authority"),
    };

    palisade::storage::grant_authority(db, user.id, authority.id)
        .await
        .expect("Failed to grant authority");

    user
}

/// Create a test ACL entry
pub async fn seed_acl_entry(
    db: &DatabaseConnection,
    resource_type: &str,
    object_id: Option<i64>,
    sid: i64,
    principal: bool,
    mask: i32,
    granting: bool,
) -> palisade::entities::acl_entry::Model {
    palisade::storage::create_acl_entry(
        db,
        palisade::storage::NewAclEntry {
            resource_type: resource_type.to_string(),
            object_id,
            sid,
            principal,
            mask,
            granting,
        },
    )
    .await
    .expect("Failed to create ACL entry")
}
