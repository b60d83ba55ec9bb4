//! # Reconnection Supervisor
//!
//! Watches the transport and brings channels back after a drop: reconnect
//! with exponential backoff, then rejoin every channel that still has
//! subscribers and re-publish presence. After `max_attempts` failures in a
//! round it reports a persistent disconnect and drops to one quiet connect
//! attempt per `max_delay` until one succeeds. [`ReconnectionSupervisor::retry_now`]
//! starts a full round at any time.

mod backoff;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;

use std::sync::Arc;

use livewire_common::new_correlation_id;
use livewire_config::ReconnectConfig;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::registry::{ChannelRegistry, RegistryInner};
use crate::transport::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Connected,
    /// Waiting on, or running, the given attempt of the current round.
    Reconnecting { attempt: u32 },
    /// The last round gave up after `attempts` tries.
    Disconnected { attempts: u32 },
}

pub struct ReconnectionSupervisor {
    status_rx: watch::Receiver<SupervisorStatus>,
    retry: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectionSupervisor {
    /// Start supervising `registry`'s transport. Starts a round immediately
    /// if the transport is not connected.
    pub fn spawn(registry: &ChannelRegistry, config: &ReconnectConfig) -> Self {
        let inner = registry.inner().clone();
        let initial = match inner.transport.status() {
            ConnectionStatus::Connected => SupervisorStatus::Connected,
            _ => SupervisorStatus::Disconnected { attempts: 0 },
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let retry = Arc::new(Notify::new());

        let task = SupervisorTask {
            inner,
            backoff: Backoff::from_config(config),
            max_attempts: config.max_attempts.max(1),
            status_tx,
            retry: retry.clone(),
        };
        Self {
            status_rx,
            retry,
            task: Some(tokio::spawn(task.run())),
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_rx.clone()
    }

    /// Start a new reconnection round now.
    pub fn retry_now(&self) {
        self.retry.notify_one();
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("reconnection supervisor stopped");
        }
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Supervisor Loop
// ---------------------------------------------------------------------------

struct SupervisorTask {
    inner: Arc<RegistryInner>,
    backoff: Backoff,
    max_attempts: u32,
    status_tx: watch::Sender<SupervisorStatus>,
    retry: Arc<Notify>,
}

impl SupervisorTask {
    async fn run(self) {
        let mut connection = self.inner.transport.watch_status();
        let mut exhausted = false;
        if *connection.borrow_and_update() != ConnectionStatus::Connected {
            exhausted = !self.recover(&mut connection, None).await;
        }

        loop {
            let idle_retry = tokio::time::sleep(self.backoff.max_delay());
            tokio::select! {
                changed = connection.changed() => {
                    if changed.is_err() {
                        debug!("transport status channel closed");
                        break;
                    }
                    let status = *connection.borrow_and_update();
                    match status {
                        ConnectionStatus::Disconnected => {
                            warn!("connection lost");
                            exhausted = !self.recover(&mut connection, Some(TransportError::Closed)).await;
                        }
                        ConnectionStatus::Connected => {
                            self.inner.mark_dead_channels().await;
                            if self.inner.has_pending().await {
                                exhausted = !self.recover(&mut connection, None).await;
                            } else {
                                exhausted = false;
                                self.set_status(SupervisorStatus::Connected);
                            }
                        }
                        ConnectionStatus::Connecting => {}
                    }
                }
                _ = self.inner.resubscribe_needed.notified() => {
                    exhausted = !self.recover(&mut connection, None).await;
                }
                _ = self.retry.notified() => {
                    info!("manual reconnect requested");
                    exhausted = !self.recover(&mut connection, None).await;
                }
                _ = idle_retry, if exhausted => {
                    exhausted = !self.resume(&mut connection).await;
                }
            }
        }
    }

    /// One quiet attempt while disconnected. Status stays `Disconnected`
    /// unless it succeeds.
    async fn resume(&self, connection: &mut watch::Receiver<ConnectionStatus>) -> bool {
        let resumed = match self.reattach().await {
            Ok(0) => true,
            Ok(failures) => {
                debug!(failures, "channels still failing to rejoin");
                false
            }
            Err(e) => {
                debug!(error = %e, "still disconnected");
                false
            }
        };
        if resumed {
            info!("connection resumed");
            self.set_status(SupervisorStatus::Connected);
        } else {
            self.inner.mark_disconnected().await;
        }
        // Our own connect attempt moved the status; do not treat it as news.
        connection.borrow_and_update();
        resumed
    }

    /// Connect if needed and rejoin pending channels. Returns the number of
    /// channels that failed to rejoin.
    async fn reattach(&self) -> Result<usize, TransportError> {
        if self.inner.transport.status() != ConnectionStatus::Connected {
            self.inner.transport.connect().await?;
            // A fresh connection carries no channels.
            self.inner.mark_reconnecting(None).await;
        }
        Ok(self.inner.resubscribe_pending().await)
    }

    /// One reconnection round. Returns `false` when it gave up.
    async fn recover(
        &self,
        connection: &mut watch::Receiver<ConnectionStatus>,
        cause: Option<TransportError>,
    ) -> bool {
        let round = new_correlation_id();
        if self.inner.transport.status() != ConnectionStatus::Connected {
            let channels = self.inner.mark_reconnecting(cause).await;
            info!(round = %round, channels, "reconnecting");
        }

        for attempt in 1..=self.max_attempts {
            self.set_status(SupervisorStatus::Reconnecting { attempt });
            let delay = self.backoff.delay(attempt);
            debug!(round = %round, attempt, delay_ms = delay.as_millis() as u64, "waiting before attempt");
            tokio::time::sleep(delay).await;

            match self.reattach().await {
                Ok(0) => {
                    info!(round = %round, attempt, "reconnected");
                    self.set_status(SupervisorStatus::Connected);
                    if *connection.borrow() == ConnectionStatus::Connected {
                        connection.borrow_and_update();
                    }
                    return true;
                }
                Ok(failures) => warn!(round = %round, attempt, failures, "channels failed to rejoin"),
                Err(e) => warn!(round = %round, attempt, error = %e, "reconnect attempt failed"),
            }
        }

        let channels = self.inner.mark_disconnected().await;
        error!(
            round = %round,
            attempts = self.max_attempts,
            channels,
            retry_every_ms = self.backoff.max_delay().as_millis() as u64,
            "giving up on reconnection"
        );
        self.set_status(SupervisorStatus::Disconnected {
            attempts: self.max_attempts,
        });
        connection.borrow_and_update();
        false
    }

    fn set_status(&self, status: SupervisorStatus) {
        self.status_tx.send_replace(status);
    }
}
