//! A presentation-side view of a session, fed from its event channel.

use tokio::sync::mpsc;

use crate::{
    aggregator::{ConfusionMatrix, CostHeadResult},
    poller::{Progress, ProgressEvent, SessionEvent},
    session::TaskState,
};

const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: &'static str,
    pub message: String,
}

/// Everything a front end needs to draw the session.
#[derive(Debug, Clone, Default)]
pub struct MonitorView {
    pub task: TaskState,
    pub train: Option<Progress>,
    pub test: Option<Progress>,
    pub epochs_completed: usize,
    pub costs: Vec<CostHeadResult>,
    pub confusion: Option<ConfusionMatrix>,
    pub completed: bool,
    pub logs: Vec<LogLine>,
}

/// Drives a [`MonitorView`] from a stream of [`SessionEvent`]s.
pub struct SessionMonitor {
    view: MonitorView,
    events: mpsc::Receiver<SessionEvent>,
}

impl SessionMonitor {
    /// Creates a new `SessionMonitor`.
    ///
    /// # Args
    /// * `events` - The receiver returned with the session controller.
    pub fn new(events: mpsc::Receiver<SessionEvent>) -> Self {
        Self {
            view: MonitorView::default(),
            events,
        }
    }

    pub fn view(&self) -> &MonitorView {
        &self.view
    }

    /// Drains all pending events and updates the view. Non-blocking.
    ///
    /// Should be called once per frame.
    pub fn tick(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    /// Waits for the next event and applies it.
    ///
    /// # Returns
    /// The event, or `None` once the controller is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        let event = self.events.recv().await?;
        self.apply(event.clone());
        Some(event)
    }

    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Progress(ProgressEvent::Train(p)) => self.view.train = Some(p),
            SessionEvent::Progress(ProgressEvent::Test(p)) => self.view.test = Some(p),

            SessionEvent::EpochCompleted {
                epoch,
                cycle,
                results,
            } => {
                self.view.epochs_completed = epoch;
                for r in &results {
                    self.push_log(
                        "INFO",
                        format!(
                            "epoch {epoch} cycle {cycle} {}: train loss={:.4} acc={:.2}% test loss={:.4} acc={:.2}%",
                            r.name, r.train_loss, r.train_accuracy, r.test_loss, r.test_accuracy
                        ),
                    );
                }
                self.view.costs = results;
            }

            SessionEvent::Completed { results, confusion } => {
                self.view.completed = true;
                let message = match &confusion {
                    Some(cm) => format!(
                        "run complete, {} test samples at {:.2}% accuracy",
                        cm.total(),
                        cm.accuracy()
                    ),
                    None => "run complete".to_string(),
                };
                self.push_log("INFO", message);
                self.view.costs = results;
                self.view.confusion = confusion;
            }

            SessionEvent::StateChanged(task) => {
                if task == TaskState::Running {
                    self.view.completed = false;
                }
                self.view.task = task;
                self.push_log("INFO", format!("session {task:?}"));
            }
        }
    }

    fn push_log(&mut self, level: &'static str, message: String) {
        self.view.logs.push(LogLine { level, message });
        if self.view.logs.len() > MAX_LOGS {
            let drain = self.view.logs.len() - MAX_LOGS;
            self.view.logs.drain(0..drain);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::EngineCounters;

    fn progress(sample_index: usize) -> Progress {
        Progress {
            counters: EngineCounters {
                sample_index,
                ..EngineCounters::default()
            },
            samples: 1000,
            fraction: sample_index as f32 / 1000.0,
            sample_rate: 0.0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn tick_drains_every_pending_event() {
        let (tx, rx) = mpsc::channel(16);
        let mut monitor = SessionMonitor::new(rx);

        tx.try_send(SessionEvent::StateChanged(TaskState::Running)).unwrap();
        tx.try_send(SessionEvent::Progress(ProgressEvent::Train(progress(100)))).unwrap();
        tx.try_send(SessionEvent::Progress(ProgressEvent::Train(progress(300)))).unwrap();
        tx.try_send(SessionEvent::Progress(ProgressEvent::Test(progress(50)))).unwrap();
        monitor.tick();

        let view = monitor.view();
        assert_eq!(view.task, TaskState::Running);
        assert_eq!(view.train.unwrap().counters.sample_index, 300);
        assert_eq!(view.test.unwrap().counters.sample_index, 50);
        assert_eq!(view.logs.len(), 1);
    }

    #[test]
    fn completion_keeps_results_and_matrix() {
        let (tx, rx) = mpsc::channel(16);
        let mut monitor = SessionMonitor::new(rx);

        let cm = ConfusionMatrix::from_counts(0, 0, vec![3, 1, 0, 4], &[]);
        tx.try_send(SessionEvent::Completed {
            results: Vec::new(),
            confusion: Some(cm.clone()),
        })
        .unwrap();
        monitor.tick();

        assert!(monitor.view().completed);
        assert_eq!(monitor.view().confusion, Some(cm));
        assert!(monitor.view().logs[0].message.contains("87.50%"));
    }

    #[test]
    fn log_lines_are_bounded() {
        let (tx, rx) = mpsc::channel(512);
        let mut monitor = SessionMonitor::new(rx);

        for _ in 0..(MAX_LOGS + 50) {
            tx.try_send(SessionEvent::StateChanged(TaskState::Paused)).unwrap();
        }
        monitor.tick();
        assert_eq!(monitor.view().logs.len(), MAX_LOGS);
    }

    #[tokio::test]
    async fn next_returns_none_after_the_sender_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let mut monitor = SessionMonitor::new(rx);
        tx.send(SessionEvent::StateChanged(TaskState::Stopped)).await.unwrap();
        drop(tx);

        assert_eq!(
            monitor.next().await,
            Some(SessionEvent::StateChanged(TaskState::Stopped))
        );
        assert_eq!(monitor.next().await, None);
    }
}
