use migration::{Migrator, MigratorTrait, SCHEMA_VERSION};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tracing::{info, warn};

use crate::error::AppResult;

pub async fn connect_and_migrate(database_url: &str) -> AppResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_string());
    if database_url.contains(":memory:") {
        // Every pooled connection would open its own empty in-memory database.
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;

    for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL", "PRAGMA cache_size=-64000"]
    {
        execute(&db, pragma).await?;
    }

    migrate(&db).await?;
    Ok(db)
}

/// Brings the schema to `SCHEMA_VERSION`. A database written by a different
/// schema version is dropped and rebuilt; cached rows and users are lost.
pub async fn migrate(db: &DatabaseConnection) -> AppResult<()> {
    let stored = schema_version(db).await?;

    if stored != 0 && stored != SCHEMA_VERSION {
        warn!(stored, expected = SCHEMA_VERSION, "schema version changed, recreating database");
        Migrator::fresh(db).await?;
    } else {
        Migrator::up(db, None).await?;
    }

    if stored != SCHEMA_VERSION {
        execute(db, &format!("PRAGMA user_version = {SCHEMA_VERSION}")).await?;
        info!(version = SCHEMA_VERSION, "schema ready");
    }

    Ok(())
}

pub async fn schema_version(db: &DatabaseConnection) -> AppResult<i32> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "PRAGMA user_version".to_string(),
        ))
        .await?;

    Ok(match row {
        Some(row) => row.try_get_by_index::<i32>(0)?,
        None => 0,
    })
}

async fn execute(db: &DatabaseConnection, sql: &str) -> AppResult<()> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string())).await?;
    Ok(())
}
