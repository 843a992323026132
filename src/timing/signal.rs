use crossbeam::channel::{self, Receiver, Sender};
use std::time::Duration;

/// Level-triggered wake-up flag.
///
/// Setting an already set signal is a no-op; a waiter consumes the level.
/// Backed by a one-slot channel so it can sit in a `select!` next to other
/// receivers.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    pub fn set(&self) {
        let _ = self.tx.try_send(());
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_set(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Blocks until set or until `timeout` elapses. Returns whether the
    /// signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
