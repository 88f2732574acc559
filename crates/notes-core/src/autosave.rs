//! Debounce handle for autosave.
//!
//! Holds at most one pending deadline. Scheduling again replaces it, so a
//! burst of edits produces one save after the last of them.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct AutoSaveScheduler {
    quiet_period: Duration,
    pending: Option<(String, Instant)>,
}

impl AutoSaveScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Start (or restart) the quiet period for `note_id`, replacing any
    /// pending timer.
    pub fn schedule(&mut self, note_id: &str) {
        let deadline = Instant::now() + self.quiet_period;
        debug!("Autosave for {} due in {:?}", note_id, self.quiet_period);
        self.pending = Some((note_id.to_string(), deadline));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Cancel only if the pending timer belongs to `note_id`.
    pub fn cancel_for(&mut self, note_id: &str) {
        if self.pending_note() == Some(note_id) {
            self.pending = None;
        }
    }

    pub fn pending_note(&self) -> Option<&str> {
        self.pending.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, at)| *at)
    }

    /// Wait for the pending deadline and take it. Never resolves while
    /// nothing is pending.
    ///
    /// Cancel safe: dropping the future leaves the timer in place.
    pub async fn fired(&mut self) -> String {
        let Some(deadline) = self.deadline() else {
            return std::future::pending().await;
        };
        sleep_until(deadline).await;
        match self.pending.take() {
            Some((note_id, _)) => note_id,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    const QUIET: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_quiet_period() {
        let mut scheduler = AutoSaveScheduler::new(QUIET);
        scheduler.schedule("n1");

        let fired = timeout(Duration::from_secs(4), scheduler.fired()).await;
        assert_eq!(fired.unwrap(), "n1");
        assert_eq!(scheduler.pending_note(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_restarts_timer() {
        let mut scheduler = AutoSaveScheduler::new(QUIET);
        scheduler.schedule("n1");
        advance(Duration::from_secs(2)).await;
        scheduler.schedule("n1");

        // Original deadline has passed, new one has not
        advance(Duration::from_secs(2)).await;
        assert!(timeout(Duration::from_millis(500), scheduler.fired()).await.is_err());

        assert!(timeout(Duration::from_secs(1), scheduler.fired()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_never_fires() {
        let mut scheduler = AutoSaveScheduler::new(QUIET);
        assert!(timeout(Duration::from_secs(60), scheduler.fired()).await.is_err());

        scheduler.schedule("n1");
        scheduler.cancel();
        assert!(timeout(Duration::from_secs(60), scheduler.fired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_for_other_note_keeps_timer() {
        let mut scheduler = AutoSaveScheduler::new(QUIET);
        scheduler.schedule("n1");
        scheduler.cancel_for("n2");
        assert_eq!(scheduler.pending_note(), Some("n1"));
        scheduler.cancel_for("n1");
        assert_eq!(scheduler.pending_note(), None);
    }
}
