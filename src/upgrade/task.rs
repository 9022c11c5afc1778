//! Background stage execution with a non-blocking foreground loop.
//!
//! Each slow stage (download, hashing, extraction) runs as exactly one
//! background task that delivers its result through a `oneshot` channel.
//! Intermediate progress is written into a [`ProgressState`] and read by
//! the foreground loop on its next tick; only the latest value matters.
//! The foreground loop owns the display and input and never blocks.

use crate::core::UpdateError;
use crate::ui::{PowerWarning, ProgressDisplay};
use crate::upgrade::fetch::CancelFlag;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::{Instant, MissedTickBehavior};

/// Screen text while a cancel request is being honoured.
pub const CANCELLING: &str = "Cancelling...";

/// Last-value-wins progress shared between a stage and the display loop.
#[derive(Debug, Default)]
pub struct ProgressState {
    done: AtomicU64,
    total: AtomicU64,
}

impl ProgressState {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A `total` of zero means unknown.
    pub fn set(&self, done: u64, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(done, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0, 0);
    }

    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (self.done.load(Ordering::Relaxed), self.total.load(Ordering::Relaxed))
    }

    /// Completed share in `0.0..=1.0`; zero while the total is unknown.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        let (done, total) = self.snapshot();
        if total == 0 {
            return 0.0;
        }
        (done as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Runs a future on the runtime, returning the receiving end of its result.
pub fn spawn_async<T, Fut>(work: Fut) -> oneshot::Receiver<T>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(work.await);
    });
    rx
}

/// Runs blocking file work on the blocking pool, returning the receiving
/// end of its result.
pub fn spawn_blocking<T, F>(work: F) -> oneshot::Receiver<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let _ = tx.send(work());
    });
    rx
}

/// What the foreground loop shows while a stage runs.
#[derive(Debug, Clone, Copy)]
pub struct StageView<'a> {
    /// Stage name used in [`UpdateError::TaskAborted`]
    pub name: &'static str,
    pub status: &'a str,
    pub hint: &'a str,
    /// Set when the stage honours cancel keys
    pub cancel: Option<&'a CancelFlag>,
}

/// The foreground half: input polling, redraws and result collection.
pub struct Foreground<'a, D: ProgressDisplay> {
    display: &'a mut D,
    poll_interval: Duration,
    power: PowerWarning,
}

impl<'a, D: ProgressDisplay> Foreground<'a, D> {
    pub fn new(display: &'a mut D, poll_interval: Duration, power: PowerWarning) -> Self {
        Self {
            display,
            poll_interval,
            power,
        }
    }

    /// Polls `rx` every tick until the stage delivers its result.
    ///
    /// While waiting, keys are polled (cancel keys raise the stage's cancel
    /// flag if it has one) and the latest progress is drawn. When the total
    /// is unknown the status shows the byte count instead.
    pub async fn drive<T>(
        &mut self,
        view: StageView<'_>,
        progress: &ProgressState,
        mut rx: oneshot::Receiver<T>,
    ) -> Result<T, UpdateError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancelling = false;

        loop {
            ticker.tick().await;

            match rx.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Closed) => {
                    return Err(UpdateError::TaskAborted { stage: view.name });
                }
                Err(TryRecvError::Empty) => {}
            }

            if let Some(key) = self.display.poll_key() {
                if let Some(cancel) = view.cancel.filter(|_| key.is_cancel()) {
                    cancel.cancel();
                    cancelling = true;
                }
            }

            let (done, total) = progress.snapshot();
            let status = if cancelling {
                CANCELLING.to_string()
            } else if total == 0 && done > 0 {
                format!("{} {:.1} MB", view.status, done as f64 / (1024.0 * 1024.0))
            } else {
                view.status.to_string()
            };
            let hint = if cancelling { "" } else { view.hint };

            self.display.set_power_warning(self.power.is_active());
            self.display.draw_progress(&status, progress.fraction(), hint);
        }
    }

    /// Keeps a message on screen for `duration`, still servicing the power
    /// warning.
    pub async fn hold(&mut self, status: &str, fraction: f64, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let _ = self.display.poll_key();
            self.display.set_power_warning(self.power.is_active());
            self.display.draw_progress(status, fraction, "");
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + self.poll_interval)).await;
        }
    }

    pub fn finish(&mut self) {
        self.display.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingDisplay;
    use crate::ui::Key;

    #[test]
    fn test_fraction_unknown_total() {
        let progress = ProgressState::new();
        progress.set(500, 0);
        assert_eq!(progress.fraction(), 0.0);
        progress.set(50, 200);
        assert!((progress.fraction() - 0.25).abs() < f64::EPSILON);
        progress.set(300, 200);
        assert_eq!(progress.fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_drive_returns_result() {
        let mut display = RecordingDisplay::new();
        let progress = ProgressState::new();
        let rx = spawn_blocking(|| 42);

        let mut fg = Foreground::new(&mut display, Duration::from_millis(5), PowerWarning::new());
        let view = StageView {
            name: "verify",
            status: "Verifying checksum...",
            hint: "",
            cancel: None,
        };
        assert_eq!(fg.drive(view, &progress, rx).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_aborted() {
        let mut display = RecordingDisplay::new();
        let progress = ProgressState::new();
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);

        let mut fg = Foreground::new(&mut display, Duration::from_millis(5), PowerWarning::new());
        let view = StageView {
            name: "install",
            status: "Installing update...",
            hint: "",
            cancel: None,
        };
        let err = fg.drive(view, &progress, rx).await.unwrap_err();
        assert!(matches!(err, UpdateError::TaskAborted { stage: "install" }));
    }

    #[tokio::test]
    async fn test_cancel_key_sets_flag() {
        let mut display = RecordingDisplay::with_keys(vec![Key::A, Key::B]);
        let progress = ProgressState::new();
        let cancel = CancelFlag::new();
        let watched = cancel.clone();
        let rx = spawn_async(async move {
            while !watched.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            "stopped"
        });

        let mut fg = Foreground::new(&mut display, Duration::from_millis(5), PowerWarning::new());
        let view = StageView {
            name: "download",
            status: "Downloading update...",
            hint: "B Cancel",
            cancel: Some(&cancel),
        };
        assert_eq!(fg.drive(view, &progress, rx).await.unwrap(), "stopped");
        assert!(cancel.is_cancelled());
        assert!(display.statuses().iter().any(|s| s == CANCELLING));
    }

    #[tokio::test]
    async fn test_unknown_total_shows_bytes() {
        let mut display = RecordingDisplay::new();
        let progress = ProgressState::new();
        progress.set(3 * 1024 * 1024, 0);
        let (tx, rx) = oneshot::channel::<()>();

        let mut fg = Foreground::new(&mut display, Duration::from_millis(5), PowerWarning::new());
        let view = StageView {
            name: "download",
            status: "Downloading update...",
            hint: "B Cancel",
            cancel: None,
        };
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });
        fg.drive(view, &progress, rx).await.unwrap();
        sender.await.unwrap();

        assert!(display.statuses().iter().any(|s| s == "Downloading update... 3.0 MB"));
    }

    #[tokio::test]
    async fn test_power_warning_forwarded() {
        let mut display = RecordingDisplay::new();
        let power = PowerWarning::new();
        power.trigger();

        let mut fg = Foreground::new(&mut display, Duration::from_millis(5), power);
        fg.hold("Update complete!", 1.0, Duration::from_millis(10)).await;

        assert!(display.power_warning_shown());
    }
}
