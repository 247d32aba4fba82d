//! Per-class and per-cost-head statistics.

use log::debug;

use crate::{
    Result,
    engine::{CostStats, Engine, EngineErr, ModelInfo},
};

/// A row-major `class_count x class_count` table of test predictions.
///
/// Row `r` counts the samples whose true class is `r`, column `c` the class the
/// model predicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub cost_index: usize,
    pub label_index: usize,
    pub class_count: usize,
    pub counts: Vec<u64>,
    pub labels: Vec<String>,
}

impl ConfusionMatrix {
    /// Builds a matrix from a flat row-major count buffer.
    ///
    /// Labels missing from the vocabulary are named by their class number.
    pub fn from_counts(
        cost_index: usize,
        label_index: usize,
        counts: Vec<u64>,
        vocabulary: &[String],
    ) -> Self {
        let class_count = counts.len().isqrt();
        let labels = (0..class_count)
            .map(|c| vocabulary.get(c).cloned().unwrap_or_else(|| c.to_string()))
            .collect();

        Self {
            cost_index,
            label_index,
            class_count,
            counts,
            labels,
        }
    }

    #[inline]
    pub fn count(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual * self.class_count + predicted]
    }

    pub fn row(&self, actual: usize) -> &[u64] {
        let start = actual * self.class_count;
        &self.counts[start..start + self.class_count]
    }

    /// Number of samples whose true class is `actual`.
    pub fn row_sum(&self, actual: usize) -> u64 {
        self.row(actual).iter().sum()
    }

    pub fn column_sum(&self, predicted: usize) -> u64 {
        (0..self.class_count).map(|r| self.count(r, predicted)).sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.class_count).map(|c| self.count(c, c)).sum()
    }

    /// Percentage of samples on the diagonal.
    pub fn accuracy(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f32 * 100.0 / total as f32,
        }
    }
}

/// Loss, error and accuracy figures of one cost head.
#[derive(Debug, Clone, PartialEq)]
pub struct CostHeadResult {
    pub name: String,
    pub group_index: usize,
    pub label_index: usize,
    pub class_count: usize,
    pub train_loss: f32,
    pub train_errors: usize,
    pub train_error_percentage: f32,
    pub train_accuracy: f32,
    pub test_loss: f32,
    pub test_errors: usize,
    pub test_error_percentage: f32,
    pub test_accuracy: f32,
}

impl From<&CostStats> for CostHeadResult {
    fn from(stats: &CostStats) -> Self {
        Self {
            name: stats.name.clone(),
            group_index: stats.group_index,
            label_index: stats.label_index,
            class_count: stats.class_count,
            train_loss: stats.train_loss,
            train_errors: stats.train_errors,
            train_error_percentage: stats.train_error_percentage,
            train_accuracy: 100.0 - stats.train_error_percentage,
            test_loss: stats.test_loss,
            test_errors: stats.test_errors,
            test_error_percentage: stats.test_error_percentage,
            test_accuracy: 100.0 - stats.test_error_percentage,
        }
    }
}

/// Keeps the latest result of every cost head and the active head selection.
#[derive(Debug, Clone, Default)]
pub struct CostAggregator {
    results: Vec<CostHeadResult>,
    active: usize,
}

impl CostAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[CostHeadResult] {
        &self.results
    }

    pub fn result(&self, index: usize) -> Option<&CostHeadResult> {
        self.results.get(index)
    }

    /// Index of the cost head the viewer displays.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn set_active(&mut self, index: usize) {
        self.active = index;
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.active = 0;
    }

    /// Replaces every result with a freshly fetched set.
    pub fn replace(&mut self, results: Vec<CostHeadResult>) {
        self.results = results;
    }

    /// Refreshes every cost head, not only the active one.
    ///
    /// # Args
    /// * `engine` - The engine to read cost statistics from.
    /// * `cost_count` - Number of cost heads of the loaded model.
    ///
    /// # Returns
    /// The refreshed results, in cost-head order.
    pub fn refresh_all(&mut self, engine: &dyn Engine, cost_count: usize) -> &[CostHeadResult] {
        self.results = fetch_results(engine, cost_count);
        &self.results
    }
}

/// Reads the current results of the first `cost_count` cost heads.
pub fn fetch_results(engine: &dyn Engine, cost_count: usize) -> Vec<CostHeadResult> {
    let results: Vec<_> = (0..cost_count)
        .map_while(|i| engine.cost_info(i))
        .map(|stats| CostHeadResult::from(&stats))
        .collect();

    debug!("fetched {} of {cost_count} cost head(s)", results.len());
    results
}

impl ConfusionMatrix {
    /// Fetches and labels the confusion matrix of a cost head.
    ///
    /// # Args
    /// * `engine` - The engine to copy the counts from.
    /// * `model` - The loaded model, for the label vocabulary.
    /// * `cost_index` - The cost head.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::Engine` if the head does not exist or the engine
    /// refuses the copy.
    pub fn fetch(engine: &dyn Engine, model: &ModelInfo, cost_index: usize) -> Result<Self> {
        let stats = engine
            .cost_info(cost_index)
            .ok_or_else(|| EngineErr::new(format!("no cost head {cost_index}")))?;

        let len = stats
            .class_count
            .checked_mul(stats.class_count)
            .ok_or_else(|| EngineErr::new(format!("{} classes overflow", stats.class_count)))?;

        let mut counts = vec![0u64; len];
        engine.confusion_matrix(cost_index, &mut counts)?;

        let vocabulary = model
            .label_names
            .get(stats.label_index)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(Self::from_counts(cost_index, stats.label_index, counts, vocabulary))
    }
}
