// SPDX-License-Identifier: AGPL-3.0-or-later

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::archive::ArchiveStore;
use crate::config::Configuration;
use crate::db::SqlStore;
use crate::scheduler::{SchedulerCommand, SchedulerHandle};

/// Inner data shared across all services.
#[derive(Debug)]
pub struct Data {
    /// Node configuration.
    pub config: Configuration,

    /// Storage handle with the database connection pool.
    pub store: SqlStore,

    /// On-disk catalog of backup archives.
    pub archive: ArchiveStore,

    /// Handle for sending commands to the scheduler service.
    pub scheduler: SchedulerHandle,

    /// Receiving end of the scheduler command channel, claimed by the
    /// scheduler service when it starts.
    commands: Mutex<Option<mpsc::Receiver<SchedulerCommand>>>,
}

/// Data shared across all services.
#[derive(Debug)]
pub struct Context(pub Arc<Data>);

impl Context {
    /// Returns a new instance of `Context`.
    pub fn new(config: Configuration, store: SqlStore, archive: ArchiveStore) -> Self {
        let (tx, rx) = mpsc::channel(16);

        Self(Arc::new(Data {
            config,
            store,
            archive,
            scheduler: SchedulerHandle::new(tx),
            commands: Mutex::new(Some(rx)),
        }))
    }

    /// Claims the scheduler command receiver. Returns `None` when a scheduler
    /// service already took it.
    pub(crate) async fn take_scheduler_commands(
        &self,
    ) -> Option<mpsc::Receiver<SchedulerCommand>> {
        self.0.commands.lock().await.take()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for Context {
    type Target = Data;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
