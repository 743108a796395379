use tokio::sync::watch;

/// Blocks until a fixed number of participants have arrived.
///
/// Arrival order is irrelevant; only the count matters. Extra arrivals after
/// the count reaches zero are ignored.
#[derive(Debug)]
pub struct StageBarrier {
    remaining: watch::Sender<usize>,
}

impl StageBarrier {
    pub fn new(expected: usize) -> Self {
        let (remaining, _) = watch::channel(expected);
        Self { remaining }
    }

    pub fn arrive(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
