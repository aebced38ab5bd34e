//! Idle-based drawing commit
//!
//! The learner is done drawing once the pen has stayed up for the quiet
//! period. Each arming bumps a generation counter; a fire only counts if it
//! carries the current generation, so a fire already queued before a
//! cancel is discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct CommitTimer {
    quiet: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    fire_tx: mpsc::Sender<u64>,
}

impl CommitTimer {
    /// Create a timer that reports fires on the returned channel
    pub fn new(quiet: Duration) -> (Self, mpsc::Receiver<u64>) {
        let (fire_tx, fire_rx) = mpsc::channel(4);
        (
            Self {
                quiet,
                generation: 0,
                pending: None,
                fire_tx,
            },
            fire_rx,
        )
    }

    /// (Re)start the quiet period
    pub fn arm(&mut self) {
        self.cancel();

        let generation = self.generation;
        let quiet = self.quiet;
        let fire_tx = self.fire_tx.clone();

        debug!(generation, ?quiet, "drawing commit armed");
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let _ = fire_tx.send(generation).await;
        }));
    }

    /// Abort any pending commit
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
            debug!(generation = self.generation, "drawing commit cancelled");
        }
        self.generation += 1;
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Consume a fire; true only for the currently armed generation
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && generation == self.generation {
            self.pending = None;
            true
        } else {
            debug!(generation, current = self.generation, "stale commit fire");
            false
        }
    }
}

impl Drop for CommitTimer {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
