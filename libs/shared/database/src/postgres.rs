//! Postgres pool, schema migrations and lock-bounded transactions shared by
//! every cell's store.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};

use crate::error::DatabaseError;

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, DatabaseError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;

    info!("Connected to Postgres with up to {} connections", max_connections);
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Storage(format!("migration failed: {}", e)))?;

    info!("Database schema is up to date");
    Ok(())
}

/// Opens a transaction in which every row lock wait gives up after
/// `lock_timeout` with SQLSTATE 55P03, surfaced as
/// [`DatabaseError::LockTimeout`].
pub async fn begin_with_lock_timeout(
    pool: &PgPool,
    lock_timeout: Duration,
) -> Result<Transaction<'static, Postgres>, DatabaseError> {
    let mut tx = pool.begin().await?;

    // Zero would disable the timeout. SET takes no bind parameters.
    let statement = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis().max(1));
    sqlx::query(&statement).execute(&mut *tx).await?;

    Ok(tx)
}

/// Pool for store tests against a live database, taken from
/// `TEST_DATABASE_URL`. Returns `None` when the variable is unset so those
/// tests skip.
pub async fn connect_for_tests() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok().filter(|u| !u.is_empty())?;

    match connect(&url, 8).await {
        Ok(pool) => match migrate(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                warn!("Test database migration failed: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Test database unreachable: {}", e);
            None
        }
    }
}
