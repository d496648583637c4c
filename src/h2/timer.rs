//! Cancellable single-shot timer.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Sleep};

/// A timer that is either unarmed or armed for one deadline.
///
/// Re-arming replaces the previous deadline. Cancelling an unarmed or
/// already fired timer does nothing.
#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire after `after`, cancelling any earlier deadline.
    pub fn schedule(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(sleep(after)));
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the armed deadline passes; never resolves while unarmed.
    ///
    /// Cancel safe: dropping the future keeps the deadline armed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_deadline() {
        let mut timer = Timer::new();
        timer.schedule(Duration::from_secs(5));
        assert!(timer.is_armed());

        timer.fired().await;
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let mut timer = Timer::new();
        timer.cancel();
        timer.schedule(Duration::from_secs(1));
        timer.cancel();
        timer.cancel();

        let fired = tokio::time::timeout(Duration::from_secs(10), timer.fired()).await;
        assert!(fired.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_deadline() {
        let mut timer = Timer::new();
        timer.schedule(Duration::from_secs(1));
        timer.schedule(Duration::from_secs(60));

        let early = tokio::time::timeout(Duration::from_secs(30), timer.fired()).await;
        assert!(early.is_err());
        timer.fired().await;
    }
}
