//! State-update loop.
//!
//! Owns the store. Each tick drains the port without blocking, decodes and
//! applies every message in arrival order, and saves the store only when at
//! least one message was processed.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use batch_core::{Millis, epoch_millis};

use crate::error::StateResult;
use crate::message::Message;
use crate::port::PortReader;
use crate::reducer::{Applied, Reducer};
use crate::store::TargetStateStore;

pub struct StateUpdater {
    store: TargetStateStore,
    reader: PortReader,
    reducer: Reducer,
}

impl StateUpdater {
    pub fn new(store: TargetStateStore, reader: PortReader, reducer: Reducer) -> Self {
        Self {
            store,
            reader,
            reducer,
        }
    }

    pub fn store(&self) -> &TargetStateStore {
        &self.store
    }

    /// Drain and apply everything queued. Returns the number of messages processed.
    pub fn tick(&mut self, now: Millis) -> StateResult<usize> {
        let mut processed = 0;
        for raw in self.reader.drain() {
            let message = match Message::decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "undecodable port message dropped");
                    continue;
                }
            };
            let applied = self.reducer.apply(&mut self.store, message, now);
            if let Applied::Transitioned { from, to } = applied {
                debug!(%from, %to, "lifecycle transition applied");
            }
            processed += 1;
        }

        if processed > 0 {
            self.store.save()?;
        }
        Ok(processed)
    }

    /// Poll the port every `poll` until shutdown is signalled.
    ///
    /// Whatever is still queued at shutdown is applied before returning.
    pub async fn run(&mut self, poll: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = poll.as_millis() as u64, "state updater started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {
                    if let Err(e) = self.tick(epoch_millis()) {
                        error!(error = %e, "state update failed");
                    }
                }
                _ = shutdown.changed() => {
                    if let Err(e) = self.tick(epoch_millis()) {
                        error!(error = %e, "final state update failed");
                    }
                    info!("state updater shutting down");
                    break;
                }
            }
        }
    }
}
