use std::sync::Arc;

use parking_lot::Mutex;

use super::Stopwatch;
use crate::{
    aggregator::{ConfusionMatrix, CostAggregator},
    engine::{ModelInfo, NetworkState},
    poller::{ProgressEvent, ProgressPoller},
    schedule::{Optimizer, Schedule},
    training_log::TrainingLog,
};

/// The user-driven side of the session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    Paused,
    Running,
    #[default]
    Stopped,
}

/// Whether the current run trains or only evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunKind {
    #[default]
    Training,
    Testing,
}

/// State shared between the controller and its poller task.
#[derive(Debug, Default)]
pub struct SessionState {
    pub task: TaskState,
    /// Last phase the engine reported.
    pub network: NetworkState,
    pub run: RunKind,
    pub stopwatch: Stopwatch,
    pub sample_rate: f32,
    pub last_progress: Option<ProgressEvent>,
    pub active_optimizer: Option<Optimizer>,
    pub dataset: Option<String>,
    pub model: Option<ModelInfo>,
    pub schedule: Schedule,
    pub last_logged_epoch: usize,
    pub costs: CostAggregator,
    pub confusion: Option<ConfusionMatrix>,
    pub log: TrainingLog,
    /// The poller of the current run, released by whichever side ends it.
    pub(crate) poller: Option<ProgressPoller>,
}

pub type SharedState = Arc<Mutex<SessionState>>;

impl SessionState {
    pub fn new(log_delimiter: u8) -> Self {
        Self {
            log: TrainingLog::new(log_delimiter),
            ..Self::default()
        }
    }

    /// Ends the run, whichever way it ended.
    pub fn finish(&mut self) {
        self.task = TaskState::Stopped;
        self.network = NetworkState::Completed;
        self.sample_rate = 0.0;
        self.stopwatch.reset();
    }

    pub(crate) fn cost_count(&self) -> usize {
        self.model.as_ref().map(|m| m.cost_count).unwrap_or(0)
    }
}
