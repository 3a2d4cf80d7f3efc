use tokio::sync::watch;

/// One-way latch: closed until the first backlog load completes.
///
/// Waiters suspend until [`ReadinessGate::open`] is called; opening again is a
/// no-op.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Open the gate. Returns `true` only for the call that opened it.
    pub fn open(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
