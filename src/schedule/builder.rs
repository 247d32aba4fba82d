use log::{debug, info};

use super::{
    Augmentation, BatchGeometry, CyclicSchedule, RateSegment, Schedule, ScheduleEntry,
    TrainingStrategy,
};
use crate::{
    Result,
    engine::Engine,
    error::WorkbenchErr,
};

/// Collects rate segments and strategies until they are submitted to the engine.
///
/// The first call after a clearing call seeds the schedule: its `clear` flag
/// decides whether the engine discards the segments it already holds.
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    entries: Vec<ScheduleEntry>,
    clear: bool,
    strategies: Vec<TrainingStrategy>,
    strategy_mode: bool,
}

impl Default for ScheduleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleBuilder {
    /// Creates an empty builder with strategy mode off.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            clear: true,
            strategies: Vec::new(),
            strategy_mode: false,
        }
    }

    /// Adds a flat segment spanning `segment.epochs` consecutive epochs.
    ///
    /// # Args
    /// * `segment` - The rate segment.
    /// * `clear` - Whether previously added segments are discarded.
    /// * `goto_epoch` - One-based epoch to resume from, `1` to start fresh.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidSchedule` if the segment or the resumption
    /// point is out of range. The builder is left untouched in that case.
    pub fn flat(&mut self, segment: RateSegment, clear: bool, goto_epoch: usize) -> Result<()> {
        validate_segment(&segment)?;

        let entry = ScheduleEntry {
            segment,
            cycles: 1,
            cyclic: false,
            goto_epoch,
            goto_cycle: 1,
        };
        self.push(vec![entry], clear)
    }

    /// Adds a warm-restart schedule.
    ///
    /// # Args
    /// * `schedule` - The segments, cycle count and resumption point.
    /// * `clear` - Whether previously added segments are discarded.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidSchedule` if any segment, the cycle count or
    /// the resumption point is out of range.
    pub fn cyclic(&mut self, schedule: CyclicSchedule, clear: bool) -> Result<()> {
        if schedule.segments.is_empty() {
            return invalid("a cyclic schedule needs at least one segment");
        }
        if schedule.cycles == 0 {
            return invalid("cycles must be greater than 0");
        }
        if schedule.goto_cycle == 0 || schedule.goto_cycle > schedule.cycles {
            return invalid(format!(
                "goto_cycle ({}) must lie in 1..={}",
                schedule.goto_cycle, schedule.cycles
            ));
        }

        let mut entries = Vec::with_capacity(schedule.segments.len());
        for segment in schedule.segments {
            validate_segment(&segment)?;
            entries.push(ScheduleEntry {
                segment,
                cycles: schedule.cycles,
                cyclic: true,
                goto_epoch: schedule.goto_epoch,
                goto_cycle: schedule.goto_cycle,
            });
        }

        self.push(entries, clear)
    }

    /// Replaces the strategy list.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidSchedule` unless the fractions strictly
    /// increase within `(0, 1]` and the last one is `1`.
    pub fn set_strategies(&mut self, strategies: Vec<TrainingStrategy>) -> Result<()> {
        let mut previous = 0.0;
        for (i, s) in strategies.iter().enumerate() {
            if !(s.fraction > previous && s.fraction <= 1.0) {
                return invalid(format!(
                    "strategy {i}: fraction {} must be greater than {previous} and at most 1",
                    s.fraction
                ));
            }
            validate_batch(&s.batch)?;
            validate_augmentation(&s.augmentation)?;
            previous = s.fraction;
        }

        if let Some(last) = strategies.last() {
            if last.fraction != 1.0 {
                return invalid("the last strategy must end at fraction 1");
            }
        }

        self.strategies = strategies;
        Ok(())
    }

    pub fn set_strategy_mode(&mut self, enabled: bool) {
        self.strategy_mode = enabled;
    }

    pub fn strategy_mode(&self) -> bool {
        self.strategy_mode
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the next submission clears the engine's current schedule.
    pub fn clears(&self) -> bool {
        self.clear
    }

    /// The schedule as it would be submitted.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            entries: self.entries.clone(),
            strategies: if self.strategy_mode {
                self.strategies.clone()
            } else {
                Vec::new()
            },
        }
    }

    /// Submits every pending segment and the strategies to the engine.
    ///
    /// # Args
    /// * `engine` - The engine to submit to.
    /// * `train_samples` - Size of the training set, forwarded to the engine.
    ///
    /// # Returns
    /// The submitted schedule.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidSchedule` if nothing was added or strategy mode
    /// is on without strategies, `WorkbenchErr::Engine` if the engine refuses a
    /// segment.
    pub fn submit(&self, engine: &dyn Engine, train_samples: usize) -> Result<Schedule> {
        if self.entries.is_empty() {
            return invalid("no rate segments have been added");
        }
        if self.strategy_mode && self.strategies.is_empty() {
            return invalid("strategy mode is enabled but no strategies were added");
        }

        for (i, entry) in self.entries.iter().enumerate() {
            let clear = i == 0 && self.clear;
            if entry.cyclic {
                engine.add_cyclic_rate_segment(
                    &entry.segment,
                    entry.cycles,
                    clear,
                    entry.goto_epoch,
                    entry.goto_cycle,
                    train_samples,
                )?;
            } else {
                engine.add_rate_segment(&entry.segment, clear, entry.goto_epoch, train_samples)?;
            }
        }

        engine.clear_strategies();
        if self.strategy_mode {
            for strategy in &self.strategies {
                engine.add_strategy(strategy);
            }
        }

        let schedule = self.schedule();
        info!(
            "submitted {} segment(s) over {} epoch(s), clear={} strategies={}",
            schedule.entries.len(),
            schedule.total_epochs(),
            self.clear,
            schedule.strategies.len()
        );
        Ok(schedule)
    }

    fn push(&mut self, entries: Vec<ScheduleEntry>, clear: bool) -> Result<()> {
        let mut candidate = if clear { Vec::new() } else { self.entries.clone() };
        candidate.extend(entries);

        let total = Schedule {
            entries: candidate.clone(),
            strategies: Vec::new(),
        }
        .total_epochs();

        for entry in &candidate {
            if entry.goto_epoch == 0 || entry.goto_epoch > total {
                return invalid(format!(
                    "goto_epoch ({}) must lie in 1..={total}",
                    entry.goto_epoch
                ));
            }
        }

        if clear || self.entries.is_empty() {
            self.clear = clear;
        }
        debug!(
            "schedule now holds {} segment(s), clear={}",
            candidate.len(),
            self.clear
        );
        self.entries = candidate;
        Ok(())
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(WorkbenchErr::InvalidSchedule(msg.into()))
}

fn probability(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{name} ({value}) must lie in [0, 1]"))
    }
}

fn validate_batch(batch: &BatchGeometry) -> Result<()> {
    if batch.n == 0 {
        return invalid("batch size N must be greater than 0");
    }
    if batch.d == 0 || batch.h == 0 || batch.w == 0 {
        return invalid("batch dimensions D, H and W must be greater than 0");
    }
    Ok(())
}

fn validate_augmentation(aug: &Augmentation) -> Result<()> {
    probability("input_dropout", aug.input_dropout)?;
    probability("cutout", aug.cutout)?;
    probability("auto_augment", aug.auto_augment)?;
    probability("color_cast", aug.color_cast)?;
    probability("distortion", aug.distortion)
}

fn validate_segment(segment: &RateSegment) -> Result<()> {
    if segment.epochs == 0 {
        return invalid("epochs must be greater than 0");
    }
    if segment.epoch_multiplier == 0 {
        return invalid("epoch_multiplier must be greater than 0");
    }
    if !(segment.minimum_rate > 0.0 && segment.minimum_rate <= segment.maximum_rate) {
        return invalid(format!(
            "rate bounds must satisfy 0 < minimum ({}) <= maximum ({})",
            segment.minimum_rate, segment.maximum_rate
        ));
    }
    probability("dropout", segment.dropout)?;
    validate_batch(&segment.batch)?;
    validate_augmentation(&segment.augmentation)
}
