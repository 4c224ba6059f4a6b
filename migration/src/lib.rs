pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_catalog_cache;
mod m20250101_000002_create_users;

/// Bumped whenever a migration changes an existing table. The app recreates
/// the schema from scratch when the stored version differs.
pub const SCHEMA_VERSION: i32 = 2;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_catalog_cache::Migration),
            Box::new(m20250101_000002_create_users::Migration),
        ]
    }
}
