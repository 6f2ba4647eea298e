//! One-shot idle shutdown timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Re-armable one-shot timer that reports back through an event channel.
///
/// Each arming gets a new epoch; a firing is only honoured if its epoch is
/// still the current one, so a timer that raced with a cancel is ignored.
#[derive(Debug, Default)]
pub struct IdleTimer {
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Cancel any pending timer and start a new one.
    pub fn arm<E, F>(&mut self, after: Duration, events: mpsc::UnboundedSender<E>, make_event: F)
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        self.cancel();
        let epoch = self.epoch;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(make_event(epoch));
        }));
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Accept a firing. Returns false for stale or cancelled timers.
    pub fn fired(&mut self, epoch: u64) -> bool {
        if self.handle.is_some() && epoch == self.epoch {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fires_once_with_current_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new();
        timer.arm(Duration::from_millis(10), tx, |epoch| epoch);

        let epoch = rx.recv().await.unwrap();
        assert!(timer.fired(epoch));
        assert!(!timer.fired(epoch));
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_rearm_invalidates_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new();
        timer.arm(Duration::from_millis(10), tx.clone(), |epoch| epoch);
        let first_epoch = timer.epoch;
        timer.arm(Duration::from_millis(20), tx, |epoch| epoch);

        let epoch = rx.recv().await.unwrap();
        assert_ne!(epoch, first_epoch);
        assert!(!timer.fired(first_epoch));
        assert!(timer.fired(epoch));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut timer = IdleTimer::new();
        timer.arm(Duration::from_millis(10), tx, |epoch| epoch);
        timer.cancel();

        let got = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(matches!(got, Ok(None)));
    }
}
