// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent storage for the backup core on top of the application's SQLite
//! database.
//!
//! The main interface is [`SqlStore`] which offers the change-ledger and
//! activity-log operations on a connection pool. Unlike a plain pool handle
//! the inner pool is replaceable at runtime: the restore engine swaps the
//! database file underneath the application and installs a fresh pool
//! afterwards.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use sqlx::migrate;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Sqlite;
use tokio::sync::RwLock;

use crate::db::errors::SqlStoreError;

pub mod errors;
pub mod models;
pub mod stores;

/// Re-export of the SQLite connection pool type.
pub type Pool = sqlx::SqlitePool;

/// Create database when not existing.
pub async fn create_database(url: &str) -> Result<()> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?;
    }

    Ok(())
}

/// Create a connection pool.
pub async fn connection_pool(url: &str, max_connections: u32) -> Result<Pool, sqlx::Error> {
    let pool: Pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &Pool) -> Result<()> {
    migrate!().run(pool).await?;

    Ok(())
}

/// Resolves the filesystem path of the database file behind a SQLite
/// connection string.
///
/// Returns `None` for in-memory databases which have no file to snapshot or
/// swap.
pub fn database_file_path(url: &str) -> Option<PathBuf> {
    let without_scheme = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    // Drop connection parameters like `?mode=rwc`
    let path = without_scheme.split('?').next().unwrap_or(without_scheme);

    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// SQL based persistent storage for the change ledger and the activity log.
#[derive(Clone, Debug)]
pub struct SqlStore {
    pool: Arc<RwLock<Pool>>,
}

impl SqlStore {
    /// Create a new `SqlStore` using the provided db `Pool`.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool: Arc::new(RwLock::new(pool)),
        }
    }

    /// Returns a handle onto the current connection pool.
    pub async fn pool(&self) -> Pool {
        self.pool.read().await.clone()
    }

    /// Closes the current pool and installs `pool` in its place.
    ///
    /// Called by the restore engine after the database file was swapped, so
    /// every open connection onto the old file gets torn down.
    pub(crate) async fn replace_pool(&self, pool: Pool) {
        let mut current = self.pool.write().await;
        let old = std::mem::replace(&mut *current, pool);
        old.close().await;
    }

    /// Closes the current connection pool without replacing it, used right
    /// before the database file is moved away underneath it.
    pub(crate) async fn close(&self) {
        self.pool.read().await.close().await;
    }

    /// Online copy of the live database into `target` using SQLite's
    /// `VACUUM INTO`.
    ///
    /// The copy is compacted and does not take an exclusive lock, so
    /// foreground connections keep reading and writing while it runs.
    pub async fn vacuum_into(&self, target: &Path) -> Result<(), SqlStoreError> {
        let pool = self.pool().await;

        // VACUUM does not accept bound parameters, quote the path inline
        let path = target.display().to_string().replace('\'', "''");

        sqlx::query(&format!("VACUUM INTO '{}'", path))
            .execute(&pool)
            .await
            .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(())
    }

    /// Row count of `table`, zero when the table does not exist in the
    /// current schema.
    pub async fn table_row_count(&self, table: &str) -> i64 {
        let pool = self.pool().await;

        let result = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM \"{}\"",
            table.replace('"', "\"\"")
        ))
        .fetch_one(&pool)
        .await;

        match result {
            Ok(count) => count,
            Err(err) => {
                log::debug!("Counting rows of table {} failed: {}", table, err);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::database_file_path;
    use crate::test_helpers::test_node;

    #[rstest]
    #[case("sqlite:pacta_local.db", Some("pacta_local.db"))]
    #[case("sqlite:/var/lib/pacta/pacta_local.db", Some("/var/lib/pacta/pacta_local.db"))]
    #[case("sqlite://data/pacta_local.db?mode=rwc", Some("data/pacta_local.db"))]
    #[case("sqlite::memory:", None)]
    #[case("sqlite:", None)]
    fn resolves_database_file_paths(#[case] url: &str, #[case] expected: Option<&str>) {
        assert_eq!(database_file_path(url), expected.map(PathBuf::from));
    }

    #[tokio::test]
    async fn vacuum_into_creates_queryable_copy() {
        let node = test_node().await;

        let target = node.tmp.path().join("copy.db");
        node.context.store.vacuum_into(&target).await.unwrap();
        assert!(target.exists());

        // The copy must be a readable database on its own
        let pool = super::connection_pool(&format!("sqlite:{}", target.display()), 1)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usuarios")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn missing_tables_count_as_zero() {
        let node = test_node().await;

        assert_eq!(node.context.store.table_row_count("usuarios").await, 2);
        assert_eq!(node.context.store.table_row_count("no_such_table").await, 0);
    }
}
