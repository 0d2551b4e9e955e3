// src/shutdown.rs
use tokio::sync::watch;

/// A single cancellation signal shared by the health prober, the pending-
/// ledger sweeper and the stats-retention sweeper (spec §5 "graceful
/// shutdown ... probe and sweeper loops observe a shared cancellation
/// signal and exit"). Generalizes the teacher's private per-component
/// `watch` channel (`health::checker::HealthChecker`) into one handle.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}
