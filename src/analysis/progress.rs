//! Progress reporting for long analysis runs.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Default capacity of the progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub session_id: Uuid,
    pub status: ProgressStatus,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    pub current_entity: Option<String>,
}

/// Sending half handed to the engine.
///
/// Sends wait for channel capacity. A dropped receiver silences the
/// reporter instead of failing the run.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    /// A bounded channel and the reporter feeding it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn report(&self, update: ProgressUpdate) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(update).await.is_err() {
            debug!("Progress receiver dropped, update discarded");
        }
    }
}

/// Percentage of `completed` over `total`, 100 for an empty run.
pub fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (completed.min(total) as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(completed: usize, total: usize) -> ProgressUpdate {
        ProgressUpdate {
            session_id: Uuid::nil(),
            status: ProgressStatus::Running,
            completed,
            total,
            percentage: percentage(completed, total),
            current_entity: None,
        }
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 4), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(3, 3), 100.0);
        assert_eq!(percentage(0, 0), 100.0);
        assert_eq!(percentage(5, 3), 100.0);
    }

    #[tokio::test]
    async fn test_updates_arrive_in_order() {
        let (reporter, mut rx) = ProgressReporter::channel(4);
        reporter.report(update(1, 2)).await;
        reporter.report(update(2, 2)).await;
        drop(reporter);

        assert_eq!(rx.recv().await.map(|u| u.completed), Some(1));
        assert_eq!(rx.recv().await.map(|u| u.completed), Some(2));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_tolerated() {
        let (reporter, rx) = ProgressReporter::channel(1);
        drop(rx);
        reporter.report(update(1, 1)).await;
        ProgressReporter::disabled().report(update(1, 1)).await;
    }
}
