pub mod catalog;
pub mod connection;
pub mod models;
pub mod schema;

#[cfg(test)]
pub mod test_support;

pub use connection::{
    create_migrated_pool, create_pool, establish_connection, run_migrations, DbError, DbPool,
    DbPooledConnection,
};
pub use models::{
    AdbLane, AmazonChannel, AuthBlob, Event, EventImage, Lane, LaneEvent, NewAdbLane, Playable,
    ProviderLane, UserPreference,
};
