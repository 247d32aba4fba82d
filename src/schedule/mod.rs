//! Learning-rate and augmentation schedules.
//!
//! A schedule is an ordered list of [`RateSegment`]s, each covering a block of
//! epochs. Cyclic entries repeat their segment for a number of cycles, growing the
//! cycle length by the segment's epoch multiplier. The engine evaluates the decay
//! curve inside each block; this module only carries the envelope.

mod builder;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::ScheduleBuilder;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Optimizer {
    AdaBelief,
    AdaDelta,
    AdaGrad,
    #[default]
    Adam,
    Adamax,
    AdamW,
    AmsBound,
    AmsGrad,
    DiffGrad,
    Lamb,
    NAG,
    RAdam,
    RMSProp,
    SGD,
    SGDMomentum,
    SGDW,
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    #[default]
    Cubic,
    Linear,
    Nearest,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Batch size, sample dimensions and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchGeometry {
    pub n: usize,
    pub d: usize,
    pub h: usize,
    pub w: usize,
    pub pad_d: usize,
    pub pad_h: usize,
    pub pad_w: usize,
}

impl Default for BatchGeometry {
    fn default() -> Self {
        Self {
            n: 128,
            d: 1,
            h: 32,
            w: 32,
            pad_d: 0,
            pad_h: 4,
            pad_w: 4,
        }
    }
}

/// Augmentation applied by the engine while sampling batches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub input_dropout: f32,
    pub cutout: f32,
    pub cutmix: bool,
    pub auto_augment: f32,
    pub color_cast: f32,
    pub color_angle: usize,
    pub distortion: f32,
    pub interpolation: Interpolation,
    pub scaling: f32,
    pub rotation: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            vertical_flip: false,
            input_dropout: 0.0,
            cutout: 0.0,
            cutmix: false,
            auto_augment: 0.0,
            color_cast: 0.0,
            color_angle: 0,
            distortion: 0.0,
            interpolation: Interpolation::Cubic,
            scaling: 10.0,
            rotation: 12.0,
        }
    }
}

/// One contiguous block of epochs sharing optimizer and augmentation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSegment {
    pub optimizer: Optimizer,
    pub momentum: f32,
    pub beta2: f32,
    pub l2_penalty: f32,
    pub dropout: f32,
    pub eps: f32,
    pub batch: BatchGeometry,
    pub epochs: usize,
    pub epoch_multiplier: usize,
    pub maximum_rate: f32,
    pub minimum_rate: f32,
    pub final_rate: f32,
    pub gamma: f32,
    pub decay_after_epochs: usize,
    pub decay_factor: f32,
    pub augmentation: Augmentation,
}

impl Default for RateSegment {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::Adam,
            momentum: 0.9,
            beta2: 0.999,
            l2_penalty: 0.0005,
            dropout: 0.0,
            eps: 1e-8,
            batch: BatchGeometry::default(),
            epochs: 100,
            epoch_multiplier: 1,
            maximum_rate: 0.05,
            minimum_rate: 0.0001,
            final_rate: 0.1,
            gamma: 0.003,
            decay_after_epochs: 1,
            decay_factor: 1.0,
            augmentation: Augmentation::default(),
        }
    }
}

impl RateSegment {
    /// Copies the geometry and augmentation of `strategy` over this segment.
    pub fn with_strategy(mut self, strategy: &TrainingStrategy) -> Self {
        self.batch = strategy.batch;
        self.augmentation = strategy.augmentation;
        self
    }
}

/// A warm-restart schedule: segments repeated over `cycles`, with a resumption point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicSchedule {
    pub segments: Vec<RateSegment>,
    pub cycles: usize,
    #[serde(default = "first")]
    pub goto_epoch: usize,
    #[serde(default = "first")]
    pub goto_cycle: usize,
}

fn first() -> usize {
    1
}

impl CyclicSchedule {
    pub fn new(segments: Vec<RateSegment>, cycles: usize) -> Self {
        Self {
            segments,
            cycles,
            goto_epoch: 1,
            goto_cycle: 1,
        }
    }
}

/// Geometry and augmentation override active up to `fraction` of the total epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingStrategy {
    pub fraction: f32,
    #[serde(default)]
    pub batch: BatchGeometry,
    #[serde(default)]
    pub augmentation: Augmentation,
}

/// One submitted block: a segment and how many cycles it spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    pub segment: RateSegment,
    pub cycles: usize,
    pub cyclic: bool,
    pub goto_epoch: usize,
    pub goto_cycle: usize,
}

impl ScheduleEntry {
    /// Number of epochs in the given zero-based cycle.
    pub fn cycle_epochs(&self, cycle: usize) -> Option<usize> {
        if !self.cyclic {
            return Some(self.segment.epochs);
        }
        let growth = self.segment.epoch_multiplier.checked_pow(cycle as u32)?;
        self.segment.epochs.checked_mul(growth)
    }

    /// Number of epochs the entry spans over all its cycles.
    pub fn total_epochs(&self) -> Option<usize> {
        (0..self.cycles).try_fold(0usize, |acc, c| acc.checked_add(self.cycle_epochs(c)?))
    }
}

/// A schedule as it was last submitted to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
    pub strategies: Vec<TrainingStrategy>,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of epochs over every entry and cycle.
    pub fn total_epochs(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.total_epochs().unwrap_or(usize::MAX))
            .fold(0usize, usize::saturating_add)
    }

    /// One-based epoch the run resumes from.
    ///
    /// Every submission overwrites the engine's resume point, so the last entry
    /// decides regardless of what earlier entries asked for.
    pub fn resume_epoch(&self) -> usize {
        self.entries.last().map_or(1, |e| e.goto_epoch.max(1))
    }

    /// Total number of cycles over every entry.
    pub fn total_cycles(&self) -> usize {
        self.entries.iter().map(|e| e.cycles).sum()
    }

    /// Finds the segment governing a one-based global epoch.
    ///
    /// # Args
    /// * `epoch` - The one-based epoch, counted across all entries.
    ///
    /// # Returns
    /// The segment and the one-based cycle within its entry, or `None` when the
    /// epoch lies outside the schedule.
    pub fn segment_for_epoch(&self, epoch: usize) -> Option<(&RateSegment, usize)> {
        if epoch == 0 {
            return None;
        }

        let mut remaining = epoch;
        for entry in &self.entries {
            for cycle in 0..entry.cycles {
                let span = entry.cycle_epochs(cycle)?;
                if remaining <= span {
                    return Some((&entry.segment, cycle + 1));
                }
                remaining -= span;
            }
        }

        None
    }

    /// Finds the strategy active at `fraction` of the total epochs.
    pub fn strategy_for_fraction(&self, fraction: f32) -> Option<&TrainingStrategy> {
        self.strategies.iter().find(|s| fraction <= s.fraction)
    }

    /// The segment governing `epoch` with the active strategy applied.
    pub fn effective_segment(&self, epoch: usize) -> Option<RateSegment> {
        let (segment, _) = self.segment_for_epoch(epoch)?;
        let total = self.total_epochs();
        let fraction = if total == 0 { 1.0 } else { epoch as f32 / total as f32 };

        Some(match self.strategy_for_fraction(fraction) {
            Some(strategy) => segment.with_strategy(strategy),
            None => *segment,
        })
    }
}
