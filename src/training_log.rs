//! The delimited per-epoch training log.

use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    aggregator::CostHeadResult,
    schedule::{Interpolation, Optimizer, RateSegment},
};

pub const DEFAULT_DELIMITER: u8 = b';';

/// Header of the log, in column order.
pub const COLUMNS: [&str; 42] = [
    "cycle",
    "epoch",
    "groupIndex",
    "costIndex",
    "costName",
    "N",
    "D",
    "H",
    "W",
    "padD",
    "padH",
    "padW",
    "optimizer",
    "rate",
    "eps",
    "momentum",
    "beta2",
    "gamma",
    "l2Penalty",
    "dropout",
    "inputDropout",
    "cutout",
    "cutMix",
    "autoAugment",
    "horizontalFlip",
    "verticalFlip",
    "colorCast",
    "colorAngle",
    "distortion",
    "interpolation",
    "scaling",
    "rotation",
    "avgTrainLoss",
    "trainErrors",
    "trainErrorPercentage",
    "trainAccuracy",
    "avgTestLoss",
    "testErrors",
    "testErrorPercentage",
    "testAccuracy",
    "elapsedMilliseconds",
    "elapsedTime",
];

/// Engine-reported position of a completed epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub cycle: usize,
    pub epoch: usize,
    pub rate: f32,
    pub elapsed: Duration,
}

/// One log line: a cost head's results for one epoch and the settings it ran with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    pub cycle: usize,
    pub epoch: usize,
    pub group_index: usize,
    pub cost_index: usize,
    pub cost_name: String,
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "H")]
    pub h: usize,
    #[serde(rename = "W")]
    pub w: usize,
    pub pad_d: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub optimizer: Optimizer,
    pub rate: f32,
    pub eps: f32,
    pub momentum: f32,
    pub beta2: f32,
    pub gamma: f32,
    pub l2_penalty: f32,
    pub dropout: f32,
    pub input_dropout: f32,
    pub cutout: f32,
    pub cut_mix: bool,
    pub auto_augment: f32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub color_cast: f32,
    pub color_angle: usize,
    pub distortion: f32,
    pub interpolation: Interpolation,
    pub scaling: f32,
    pub rotation: f32,
    pub avg_train_loss: f32,
    pub train_errors: usize,
    pub train_error_percentage: f32,
    pub train_accuracy: f32,
    pub avg_test_loss: f32,
    pub test_errors: usize,
    pub test_error_percentage: f32,
    pub test_accuracy: f32,
    pub elapsed_milliseconds: u64,
    pub elapsed_time: String,
}

impl LogRow {
    /// Creates a new `LogRow`.
    ///
    /// # Args
    /// * `record` - Cycle, epoch, rate and elapsed time reported for the epoch.
    /// * `segment` - The segment that governed the epoch, strategy overrides applied.
    /// * `cost_index` - Index of the cost head.
    /// * `cost` - The cost head's results after the epoch.
    pub fn new(
        record: &EpochRecord,
        segment: &RateSegment,
        cost_index: usize,
        cost: &CostHeadResult,
    ) -> Self {
        let batch = &segment.batch;
        let aug = &segment.augmentation;

        Self {
            cycle: record.cycle,
            epoch: record.epoch,
            group_index: cost.group_index,
            cost_index,
            cost_name: cost.name.clone(),
            n: batch.n,
            d: batch.d,
            h: batch.h,
            w: batch.w,
            pad_d: batch.pad_d,
            pad_h: batch.pad_h,
            pad_w: batch.pad_w,
            optimizer: segment.optimizer,
            rate: record.rate,
            eps: segment.eps,
            momentum: segment.momentum,
            beta2: segment.beta2,
            gamma: segment.gamma,
            l2_penalty: segment.l2_penalty,
            dropout: segment.dropout,
            input_dropout: aug.input_dropout,
            cutout: aug.cutout,
            cut_mix: aug.cutmix,
            auto_augment: aug.auto_augment,
            horizontal_flip: aug.horizontal_flip,
            vertical_flip: aug.vertical_flip,
            color_cast: aug.color_cast,
            color_angle: aug.color_angle,
            distortion: aug.distortion,
            interpolation: aug.interpolation,
            scaling: aug.scaling,
            rotation: aug.rotation,
            avg_train_loss: cost.train_loss,
            train_errors: cost.train_errors,
            train_error_percentage: cost.train_error_percentage,
            train_accuracy: cost.train_accuracy,
            avg_test_loss: cost.test_loss,
            test_errors: cost.test_errors,
            test_error_percentage: cost.test_error_percentage,
            test_accuracy: cost.test_accuracy,
            elapsed_milliseconds: record.elapsed.as_millis() as u64,
            elapsed_time: format_elapsed(record.elapsed),
        }
    }
}

/// Formats a duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Rows of the training log, in the order epochs completed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingLog {
    rows: Vec<LogRow>,
    delimiter: u8,
}

impl Default for TrainingLog {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl TrainingLog {
    pub fn new(delimiter: u8) -> Self {
        Self {
            rows: Vec::new(),
            delimiter,
        }
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn push(&mut self, row: LogRow) {
        self.rows.push(row);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Drops every row of `epoch` and later, for resuming mid-schedule.
    pub fn truncate_from_epoch(&mut self, epoch: usize) {
        self.rows.retain(|r| r.epoch < epoch);
    }

    /// Writes the header and every row. An empty log still gets its header.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::Log` if a row cannot be encoded, `WorkbenchErr::Io`
    /// if the writer fails.
    pub fn write<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(writer);

        wtr.write_record(COLUMNS)?;
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a log written with the same delimiter.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::Log` if the header or a row does not decode.
    pub fn read<R: io::Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_reader(reader);

        let rows = rdr.deserialize().collect::<std::result::Result<Vec<LogRow>, _>>()?;
        Ok(Self { rows, delimiter })
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write(io::BufWriter::new(file))
    }

    pub fn read_from(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read(io::BufReader::new(file), delimiter)
    }
}
