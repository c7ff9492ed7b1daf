// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;

use anyhow::Result;
use log::{error, info};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task;
use tokio::task::JoinHandle;
use triggered::{Listener, Trigger};

/// Sends messages through the communication bus between services.
pub type Sender<T> = broadcast::Sender<T>;

/// Receives shutdown signal for services so they can react accordingly.
pub type Shutdown = JoinHandle<()>;

/// Generic async service function receiving a shared context and access to
/// the communication bus and shutdown signal handler.
///
/// The `async_trait` macro hides the boxed-and-pinned future signature a
/// plain trait would otherwise need.
#[async_trait::async_trait]
pub trait Service<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    async fn call(&self, context: D, shutdown: Shutdown, tx: Sender<M>) -> Result<()>;
}

/// Implements `Service` for any suitable async function.
#[async_trait::async_trait]
impl<FN, F, D, M> Service<D, M> for FN
where
    FN: Fn(D, Shutdown, Sender<M>) -> F + Sync,
    F: Future<Output = Result<()>> + Send + 'static,
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    async fn call(&self, context: D, shutdown: Shutdown, tx: Sender<M>) -> Result<()> {
        (self)(context, shutdown, tx).await
    }
}

/// Wrapper around `Trigger` which also fires as soon as it gets dropped.
#[derive(Clone)]
struct Signal(Trigger);

impl Signal {
    /// Fires the signal manually.
    pub fn trigger(&self) {
        self.0.trigger();
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Service manager for orchestration of long-running concurrent processes.
///
/// Offers a broadcast bus for cross-service communication and a shutdown
/// signal services can subscribe to. `shutdown` resolves only after every
/// service finished its teardown, which is what keeps an in-flight snapshot
/// or restore job from being cut off when the process exits.
///
/// A stopped service (panic, error or regular return) fires an exit signal
/// which can be awaited via `on_exit`; an unexpectedly stopped service
/// usually means the application should terminate.
pub struct ServiceManager<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Shared, thread-safe context between services.
    context: D,

    /// Sender of our communication bus.
    tx: Sender<M>,

    /// Sender of exit signal, fired when a service returned, errored or
    /// panicked.
    exit_signal: Signal,

    /// Receiver of exit signal.
    exit_handle: Listener,

    /// Sender of shutdown signal.
    ///
    /// This is a broadcast channel because we track the subscriber count and
    /// treat "all senders dropped" as "all services are gone".
    shutdown_signal: broadcast::Sender<bool>,
}

impl<D, M> ServiceManager<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Returns a new instance of a service manager.
    ///
    /// The `capacity` argument defines the maximum bound of messages on the
    /// communication bus.
    pub fn new(capacity: usize, context: D) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (shutdown_signal, _) = broadcast::channel(16);
        let (exit_signal, exit_handle) = triggered::trigger();

        Self {
            context,
            tx,
            exit_signal: Signal(exit_signal),
            exit_handle,
            shutdown_signal,
        }
    }

    /// Adds a new service to the manager and spawns it right away.
    pub fn add<F: Service<D, M> + Send + Sync + Copy + 'static>(
        &mut self,
        name: &'static str,
        service: F,
    ) {
        let tx = self.tx.clone();

        // Sender and receiver for shutdown channel
        let shutdown_tx = self.shutdown_signal.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        // Wait for any signal from the shutdown channel
        let signal = task::spawn(async move {
            let _ = shutdown_rx.recv().await;
        });

        let exit_signal = self.exit_signal.clone();
        let context = self.context.clone();

        task::spawn(async move {
            info!("Start {} service", name);

            let handle = service.call(context, signal, tx).await;

            // Dropping this service's shutdown sender signals the shutdown
            // procedure that this service has finally stopped
            drop(shutdown_tx);

            if let Some(err) = handle.err() {
                error!("Error in {} service: {}", name, err);
                exit_signal.trigger();
            }

            // `exit_signal` drops here and fires through the `Drop` impl, so
            // panics inside the service are signalled as well
        });
    }

    /// Future which resolves as soon as a service returned an error, panicked
    /// or stopped.
    pub async fn on_exit(&self) {
        self.exit_handle.clone().await;
    }

    /// Informs all services about graceful shutdown and waits for them until
    /// they all stopped.
    pub async fn shutdown(self) {
        info!("Received shutdown signal");

        let mut rx = self.shutdown_signal.subscribe();

        // Broadcast graceful shutdown messages to all services
        self.shutdown_signal.send(true).unwrap();

        // Drop our own sender so _all_ senders eventually close, otherwise
        // the recv() below would sleep forever
        drop(self.shutdown_signal);

        // When every sender has gone out of scope the recv call returns a
        // `Closed` error: all services have shut down and we are done
        loop {
            match rx.recv().await {
                Err(RecvError::Closed) => break,
                _ => (),
            }
        }
    }
}
