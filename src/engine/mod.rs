//! The gateway to the external training engine.
//!
//! The engine owns every tensor and all training state. The core only reaches it
//! through the [`Engine`] trait: flipping control flags, submitting schedules and
//! copying bounded buffers out of engine memory.

pub mod mock;

use std::{error::Error, fmt, io, path::Path};

use crate::{
    layout::LayerDescriptor,
    schedule::{RateSegment, TrainingStrategy},
};

pub use mock::{MockEngine, MockOp};

/// Error returned by a gateway call that the engine could not honour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineErr(String);

impl EngineErr {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for EngineErr {}

/// A network definition the engine refused, located by row and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionError {
    pub row: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.row, self.column, self.message)
    }
}

impl Error for DefinitionError {}

/// The phase the engine reports for the current run. Read-only to the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkState {
    #[default]
    Idle,
    NewEpoch,
    Testing,
    Training,
    SaveWeights,
    Completed,
}

/// Progress counters the engine exposes for polling.
///
/// These are plain scalars written by the engine's worker thread; a read may be
/// slightly stale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineCounters {
    pub state: NetworkState,
    pub cycle: usize,
    pub total_cycles: usize,
    pub epoch: usize,
    pub total_epochs: usize,
    pub group_index: usize,
    pub cost_index: usize,
    pub sample_index: usize,
    pub batch_size: usize,
    pub rate: f32,
    pub avg_loss: f32,
    pub errors: usize,
    pub error_percentage: f32,
}

/// Shape of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

/// Model-wide facts reported once a definition and dataset are loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub dataset: String,
    pub layer_count: usize,
    pub cost_count: usize,
    pub cost_index: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub input: InputShape,
    pub mean_std_normalization: bool,
    pub mean: [f32; 3],
    pub std_dev: [f32; 3],
    /// The dataset's label vocabulary, one list per label index.
    pub label_names: Vec<Vec<String>>,
}

/// Summary statistics of one tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TensorStats {
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

/// Per-layer statistics recomputed by the engine on request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerStats {
    pub neurons: TensorStats,
    pub weights: TensorStats,
    pub biases: TensorStats,
    pub fprop_millis: f32,
    pub bprop_millis: f32,
}

/// Loss and error figures of one cost head.
#[derive(Debug, Clone, PartialEq)]
pub struct CostStats {
    pub name: String,
    pub group_index: usize,
    pub label_index: usize,
    pub class_count: usize,
    pub train_loss: f32,
    pub train_errors: usize,
    pub train_error_percentage: f32,
    pub test_loss: f32,
    pub test_errors: usize,
    pub test_error_percentage: f32,
}

/// The fixed call surface of the training engine.
///
/// Every method takes `&self`: engines run their own worker threads and manage
/// their state internally, so one instance is shared between the controller and
/// the poller task.
pub trait Engine: Send + Sync {
    // lifecycle
    fn configure(&self, storage_dir: &Path) -> Result<(), EngineErr>;
    fn load_definition(&self, text: &str) -> Result<(), DefinitionError>;
    fn load_dataset(&self) -> Result<(), EngineErr>;
    fn dispose(&self);

    // control
    fn start_training(&self) -> Result<(), EngineErr>;
    fn start_testing(&self) -> Result<(), EngineErr>;
    fn pause(&self) -> Result<(), EngineErr>;
    fn resume(&self) -> Result<(), EngineErr>;
    fn stop(&self) -> Result<(), EngineErr>;

    // schedule
    fn add_rate_segment(
        &self,
        segment: &RateSegment,
        clear: bool,
        goto_epoch: usize,
        train_samples: usize,
    ) -> Result<(), EngineErr>;
    fn add_cyclic_rate_segment(
        &self,
        segment: &RateSegment,
        cycles: usize,
        clear: bool,
        goto_epoch: usize,
        goto_cycle: usize,
        train_samples: usize,
    ) -> Result<(), EngineErr>;
    fn clear_strategies(&self);
    fn add_strategy(&self, strategy: &TrainingStrategy);

    // introspection
    fn training_counters(&self) -> EngineCounters;
    fn testing_counters(&self) -> EngineCounters;
    fn model_info(&self) -> Option<ModelInfo>;
    fn layer_info(&self, index: usize) -> Option<LayerDescriptor>;
    fn layer_inputs(&self, index: usize) -> Vec<String>;
    fn refresh_layer_statistics(&self, index: usize) -> Option<LayerStats>;

    // snapshot/export
    /// Copies one planar input sample into `buf` and its labels into `labels`.
    fn input_snapshot(&self, buf: &mut [f32], labels: &mut [usize]) -> bool;
    /// Copies the pre-laid-out weight mosaic of a layer into `buf`.
    fn layer_image(&self, index: usize, fill: u8, buf: &mut [u8]) -> bool;
    fn confusion_matrix(&self, cost_index: usize, buf: &mut [u64]) -> Result<(), EngineErr>;
    fn cost_info(&self, index: usize) -> Option<CostStats>;

    // persistence
    fn load_weights(&self, path: &Path, persist_optimizer: bool) -> io::Result<()>;
    fn save_weights(&self, path: &Path, persist_optimizer: bool) -> io::Result<()>;
    fn load_layer_weights(&self, path: &Path, index: usize) -> io::Result<()>;
    fn save_layer_weights(&self, path: &Path, index: usize) -> io::Result<()>;
    fn reset_weights(&self, index: Option<usize>);

    // locking
    fn set_locked(&self, locked: bool);
    fn set_layer_locked(&self, index: usize, locked: bool);
}
