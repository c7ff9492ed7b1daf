// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;

use crate::archive::ArchiveStore;
use crate::bus::ServiceMessage;
use crate::config::Configuration;
use crate::context::Context;
use crate::db::{connection_pool, create_database, run_pending_migrations, Pool, SqlStore};
use crate::manager::ServiceManager;
use crate::restore::RestoreEngine;
use crate::scheduler::{scheduler_service, SchedulerHandle};
use crate::snapshot::SnapshotBuilder;

/// Capacity of the internal broadcast channel used to communicate between
/// services.
const SERVICE_BUS_CAPACITY: usize = 1024;

/// Makes sure database is created and migrated before returning connection
/// pool.
async fn initialize_db(config: &Configuration) -> Result<Pool> {
    // Create database when not existing
    create_database(&config.database_url).await?;

    // Create connection pool
    let pool = connection_pool(&config.database_url, config.database_max_connections).await?;

    // Run pending migrations
    run_pending_migrations(&pool).await?;

    Ok(pool)
}

/// Main runtime managing the backup core within the host process.
///
/// The node is the composition root: it owns the service manager and the
/// scheduler handle, and its `start`/`shutdown` pair is the scheduler's
/// explicit lifecycle. There is no global scheduler instance anywhere.
#[allow(missing_debug_implementations)]
pub struct Node {
    context: Context,
    manager: ServiceManager<Context, ServiceMessage>,
}

impl Node {
    /// Start the backup core with your configuration. This method can be
    /// used to run it within other applications.
    pub async fn start(config: Configuration) -> Result<Self> {
        // Initialize database and get connection pool
        let pool = initialize_db(&config).await?;

        // Prepare the storage handle and the on-disk archive catalog
        let store = SqlStore::new(pool);
        let archive = ArchiveStore::create(&config.backup_dir)?;

        // Create service manager with shared data between services
        let context = Context::new(config, store, archive);
        let mut manager =
            ServiceManager::<Context, ServiceMessage>::new(SERVICE_BUS_CAPACITY, context.clone());

        // Start the scheduler driving snapshots, pruning and compaction
        manager.add("scheduler", scheduler_service);

        Ok(Self { context, manager })
    }

    /// Shared context of this node, giving access to configuration, store
    /// and archive catalog.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Handle for operator commands against the running scheduler.
    pub fn scheduler(&self) -> SchedulerHandle {
        self.context.scheduler.clone()
    }

    /// Snapshot builder bound to this node's store and archive catalog.
    pub fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            self.context.store.clone(),
            self.context.archive.clone(),
            self.context.config.uploads_dir.clone(),
        )
    }

    /// Restore engine bound to this node's store and archive catalog.
    pub fn restore_engine(&self) -> RestoreEngine {
        RestoreEngine::new(
            self.context.store.clone(),
            self.context.archive.clone(),
            &self.context.config,
        )
    }

    /// This future resolves when at least one system service stopped.
    ///
    /// It can be used to exit the application as a stopped service usually
    /// means that something went wrong.
    pub async fn on_exit(&self) {
        self.manager.on_exit().await;
    }

    /// Close all running concurrent tasks and wait until they are fully shut
    /// down. An in-flight snapshot or restore finishes before this returns,
    /// so no half-written archive is left behind.
    pub async fn shutdown(self) {
        // Wait until all tasks are shut down
        self.manager.shutdown().await;

        // Close connection pool
        self.context.store.close().await;
    }
}
