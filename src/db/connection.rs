use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbPooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(String),

    #[error("Failed to get connection from pool: {0}")]
    PoolCheckout(#[from] r2d2::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("{0}")]
    Other(String),
}

/// Create a new connection pool for the catalog database.
///
/// Writes are serialized by the refresh orchestrator; readers use their own
/// pooled connections, so a modest pool size is plenty.
pub fn create_pool(database_url: &str) -> Result<DbPool, DbError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(16)
        .build(manager)
        .map_err(|e| DbError::PoolCreation(e.to_string()))
}

/// Establish a single connection with a busy timeout so concurrent readers
/// do not immediately fail while the refresh writer holds the lock.
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection, diesel::ConnectionError> {
    let mut conn = SqliteConnection::establish(database_url)?;

    diesel::sql_query("PRAGMA busy_timeout = 5000")
        .execute(&mut conn)
        .map_err(|e| {
            diesel::ConnectionError::BadConnection(format!("Failed to set busy_timeout: {}", e))
        })?;

    Ok(conn)
}

/// Run all pending migrations. Idempotent: a second run is a no-op.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), DbError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::Migration(e.to_string()))?;
    Ok(())
}

/// Convenience for tests and the refresh pipeline: an in-memory or on-disk
/// pool with migrations already applied.
pub fn create_migrated_pool(database_url: &str) -> Result<DbPool, DbError> {
    let pool = create_pool(database_url)?;
    let mut conn = pool.get()?;
    diesel::sql_query("PRAGMA busy_timeout = 5000").execute(&mut conn)?;
    run_migrations(&mut conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");
        // Second run must be a no-op, not an error
        run_migrations(&mut conn).expect("second migration run");
    }

    #[test]
    fn test_schema_has_core_tables() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        #[derive(diesel::QueryableByName)]
        struct NameRow {
            #[diesel(sql_type = diesel::sql_types::Text)]
            name: String,
        }

        let rows: Vec<NameRow> =
            diesel::sql_query("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .load(&mut conn)
                .expect("table list");
        let names: Vec<String> = rows.into_iter().map(|r| r.name).collect();

        for table in [
            "events",
            "playables",
            "event_images",
            "user_preferences",
            "lanes",
            "lane_events",
            "adb_lanes",
            "provider_lanes",
            "amazon_channels",
            "auth_blobs",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }
}
