//! Control and visualization core for a convolutional-network workbench.
//!
//! The numerical engine is reached only through [`engine::Engine`]. On top of it
//! this crate drives training and evaluation sessions, samples their progress,
//! builds learning-rate schedules, renders weights and inputs into RGBA mosaics
//! and aggregates per-class and per-cost-head statistics.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod monitor;
pub mod poller;
pub mod schedule;
pub mod session;
pub mod snapshot;
pub mod training_log;

pub use aggregator::{ConfusionMatrix, CostAggregator, CostHeadResult};
pub use config::SessionConfig;
pub use engine::{Engine, EngineErr, MockEngine};
pub use error::{Result, WorkbenchErr};
pub use layout::{LayerDescriptor, LayerKind};
pub use monitor::SessionMonitor;
pub use poller::{ProgressEvent, SessionEvent, adjusted_sample_count};
pub use schedule::{CyclicSchedule, RateSegment, ScheduleBuilder, TrainingStrategy};
pub use session::{SessionController, TaskState};
pub use snapshot::{Snapshot, SnapshotImage, SnapshotRenderer};
pub use training_log::{LogRow, TrainingLog};
