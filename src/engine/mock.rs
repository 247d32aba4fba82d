use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use super::{
    CostStats, DefinitionError, Engine, EngineCounters, EngineErr, InputShape, LayerStats,
    ModelInfo, NetworkState, TensorStats,
};
use crate::{
    layout::{LayerDescriptor, LayerKind},
    poller::adjusted_sample_count,
    schedule::{RateSegment, Schedule, ScheduleEntry, TrainingStrategy},
};

const WEIGHTS_MAGIC: &[u8; 8] = b"MOCKWGT1";

/// Gateway calls whose failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Configure,
    LoadDataset,
    StartTraining,
    StartTesting,
    Pause,
    Resume,
    Stop,
    AddSegment,
    ConfusionMatrix,
}

/// A rate segment as the engine received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub segment: RateSegment,
    /// `Some(cycles)` for cyclic submissions.
    pub cycles: Option<usize>,
    pub clear: bool,
    pub goto_epoch: usize,
    pub goto_cycle: usize,
    pub train_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Idle,
    Training,
    Testing,
}

#[derive(Debug)]
struct MockState {
    model: Option<ModelInfo>,
    layers: Vec<LayerDescriptor>,
    dataset_loaded: bool,
    storage_dir: Option<PathBuf>,
    submitted: Vec<Submitted>,
    schedule: Schedule,
    mode: RunMode,
    paused: bool,
    state: NetworkState,
    epoch: usize,
    sample_index: usize,
    costs: Vec<CostStats>,
    failures: Vec<MockOp>,
    resets: usize,
}

/// A deterministic in-process engine.
///
/// The simulation advances by a fixed number of samples on every counters read,
/// so a run progresses exactly as fast as it is polled. Each epoch is a training
/// pass, a test pass and one `NewEpoch` report; the run completes after the
/// schedule's last epoch.
#[derive(Debug)]
pub struct MockEngine {
    state: Mutex<MockState>,
    train_samples: usize,
    test_samples: usize,
    samples_per_read: usize,
    steps_per_read: usize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Creates a mock with 1000 training and 200 test samples, advancing 250
    /// samples per read.
    pub fn new() -> Self {
        Self::with_samples(1000, 200, 250)
    }

    /// Creates a mock with the given dataset sizes.
    ///
    /// # Args
    /// * `train_samples` - Training set size.
    /// * `test_samples` - Test set size.
    /// * `samples_per_read` - Samples processed between two counters reads.
    ///
    /// # Returns
    /// A new mock engine with no definition loaded.
    pub fn with_samples(train_samples: usize, test_samples: usize, samples_per_read: usize) -> Self {
        let state = MockState {
            model: None,
            layers: Vec::new(),
            dataset_loaded: false,
            storage_dir: None,
            submitted: Vec::new(),
            schedule: Schedule::default(),
            mode: RunMode::Idle,
            paused: false,
            state: NetworkState::Idle,
            epoch: 0,
            sample_index: 0,
            costs: Vec::new(),
            failures: Vec::new(),
            resets: 0,
        };

        Self {
            state: Mutex::new(state),
            train_samples,
            test_samples,
            samples_per_read: samples_per_read.max(1),
            steps_per_read: 1,
        }
    }

    /// Makes every counters read advance the simulation `steps` times, as an
    /// engine sampled less often than it moves between phases.
    pub fn with_steps_per_read(mut self, steps: usize) -> Self {
        self.steps_per_read = steps.max(1);
        self
    }

    /// Makes every subsequent call of `op` fail.
    pub fn fail_on(&self, op: MockOp) {
        self.state.lock().failures.push(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every rate segment received so far, in order.
    pub fn submitted(&self) -> Vec<Submitted> {
        self.state.lock().submitted.clone()
    }

    pub fn strategy_count(&self) -> usize {
        self.state.lock().schedule.strategies.len()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().mode != RunMode::Idle
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }

    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.state.lock().storage_dir.clone()
    }

    fn check(st: &MockState, op: MockOp) -> Result<(), EngineErr> {
        if st.failures.contains(&op) {
            Err(EngineErr::new(format!("injected failure: {op:?}")))
        } else {
            Ok(())
        }
    }

    fn ready(st: &MockState) -> Result<(), EngineErr> {
        if st.model.is_none() {
            return Err(EngineErr::new("no definition loaded"));
        }
        if !st.dataset_loaded {
            return Err(EngineErr::new("no dataset loaded"));
        }
        Ok(())
    }

    fn batch_size(st: &MockState) -> usize {
        st.schedule
            .effective_segment(st.epoch.max(1))
            .map(|s| s.batch.n)
            .unwrap_or(1)
    }

    /// Advances the simulation by one read window.
    fn advance(&self, st: &mut MockState) {
        if st.mode == RunMode::Idle || st.paused {
            return;
        }

        let batch = Self::batch_size(st);
        match (st.mode, st.state) {
            (RunMode::Training, NetworkState::Training) => {
                let end = adjusted_sample_count(self.train_samples, batch);
                st.sample_index = (st.sample_index + self.samples_per_read).min(end);
                if st.sample_index == end {
                    st.state = NetworkState::Testing;
                    st.sample_index = 0;
                }
            }
            (RunMode::Training, NetworkState::Testing) => {
                let end = adjusted_sample_count(self.test_samples, batch);
                st.sample_index = (st.sample_index + self.samples_per_read).min(end);
                if st.sample_index == end {
                    self.finish_epoch(st);
                    st.state = NetworkState::NewEpoch;
                }
            }
            (RunMode::Training, NetworkState::NewEpoch) => {
                if st.epoch >= st.schedule.total_epochs() {
                    st.state = NetworkState::Completed;
                    st.mode = RunMode::Idle;
                } else {
                    st.epoch += 1;
                    st.sample_index = 0;
                    st.state = NetworkState::Training;
                }
            }
            (RunMode::Testing, NetworkState::Testing) => {
                let end = adjusted_sample_count(self.test_samples, batch);
                st.sample_index = (st.sample_index + self.samples_per_read).min(end);
                if st.sample_index == end {
                    st.state = NetworkState::Completed;
                    st.mode = RunMode::Idle;
                }
            }
            _ => {}
        }
    }

    /// Updates the cost heads at the end of an epoch. Error counts accumulate
    /// over the run while the per-epoch error percentage falls.
    fn finish_epoch(&self, st: &mut MockState) {
        let epoch = st.epoch.max(1) as f32;
        for (head, cost) in st.costs.iter_mut().enumerate() {
            let train_pct = 60.0 / (epoch + 1.0) + head as f32 * 2.0;
            let test_pct = train_pct + 3.0;
            cost.train_error_percentage = train_pct;
            cost.train_errors += (self.train_samples as f32 * train_pct / 100.0).round() as usize;
            cost.train_loss = train_pct / 40.0;
            cost.test_error_percentage = test_pct;
            cost.test_errors = (self.test_samples as f32 * test_pct / 100.0).round() as usize;
            cost.test_loss = test_pct / 40.0;
        }
    }

    fn counters(&self, testing: bool) -> EngineCounters {
        let mut st = self.state.lock();
        for _ in 0..self.steps_per_read {
            self.advance(&mut st);
        }

        let epoch = st.epoch;
        let entry = st.schedule.segment_for_epoch(epoch.max(1)).map(|(s, c)| (*s, c));
        let batch_size = Self::batch_size(&st);
        let end = if st.state == NetworkState::Training {
            adjusted_sample_count(self.train_samples, batch_size)
        } else {
            adjusted_sample_count(self.test_samples, batch_size)
        };
        let progress = if end == 0 { 0.0 } else { st.sample_index as f32 / end as f32 };
        let rate = entry
            .map(|(s, _)| s.maximum_rate - (s.maximum_rate - s.minimum_rate) * progress)
            .unwrap_or(0.0);

        let head = st.model.as_ref().map(|m| m.cost_index).unwrap_or(0);
        let (avg_loss, errors, error_percentage) = match st.costs.get(head) {
            Some(c) if testing || st.state == NetworkState::Testing => {
                (c.test_loss, c.test_errors, c.test_error_percentage)
            }
            Some(c) => (c.train_loss, c.train_errors, c.train_error_percentage),
            None => (0.0, 0, 0.0),
        };

        EngineCounters {
            state: st.state,
            cycle: entry.map(|(_, c)| c).unwrap_or(1),
            total_cycles: st.schedule.total_cycles().max(1),
            epoch,
            total_epochs: st.schedule.total_epochs(),
            group_index: 0,
            cost_index: head,
            sample_index: st.sample_index,
            batch_size,
            rate,
            avg_loss,
            errors,
            error_percentage,
        }
    }

    fn push_entry(&self, submitted: Submitted) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::AddSegment)?;

        if submitted.clear {
            st.schedule.entries.clear();
        }
        st.schedule.entries.push(ScheduleEntry {
            segment: submitted.segment,
            cycles: submitted.cycles.unwrap_or(1),
            cyclic: submitted.cycles.is_some(),
            goto_epoch: submitted.goto_epoch,
            goto_cycle: submitted.goto_cycle,
        });
        st.submitted.push(submitted);
        Ok(())
    }
}

fn parse_definition(text: &str) -> Result<String, DefinitionError> {
    let Some((row, line)) = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .find(|(_, l)| !l.trim().is_empty())
    else {
        return Err(DefinitionError {
            row: 1,
            column: 1,
            message: "definition is empty".into(),
        });
    };

    let trimmed = line.trim();
    let column = line.len() - line.trim_start().len() + 1;
    match trimmed.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
        Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => Err(DefinitionError {
            row,
            column,
            message: "expected a [model name] header".into(),
        }),
    }
}

fn mock_layers() -> Vec<LayerDescriptor> {
    let layer = |index, name: &str, kind| LayerDescriptor::new(index, name, kind);
    vec![
        layer(0, "input", LayerKind::Input),
        LayerDescriptor {
            channels_in: 3,
            channels_out: 8,
            kernel_h: 3,
            kernel_w: 3,
            has_bias: true,
            lockable: true,
            weight_count: 216,
            bias_count: 8,
            ..layer(1, "conv1", LayerKind::Convolution)
        },
        LayerDescriptor {
            channels_in: 8,
            channels_out: 8,
            scaling_enabled: true,
            lockable: true,
            weight_count: 16,
            bias_count: 8,
            ..layer(2, "bn1", LayerKind::BatchNorm)
        },
        LayerDescriptor {
            channels_in: 8,
            channels_out: 8,
            weight_count: 8,
            ..layer(3, "prelu1", LayerKind::PRelu)
        },
        LayerDescriptor {
            channels_in: 8,
            channels_out: 8,
            kernel_h: 3,
            kernel_w: 3,
            lockable: true,
            weight_count: 72,
            ..layer(4, "dw2", LayerKind::DepthwiseConvolution)
        },
        LayerDescriptor {
            channels_in: 8,
            channels_out: 16,
            kernel_h: 1,
            kernel_w: 1,
            lockable: true,
            weight_count: 128,
            ..layer(5, "pw2", LayerKind::Convolution)
        },
        LayerDescriptor {
            channels_in: 16,
            channels_out: 16,
            ..layer(6, "gap", LayerKind::GlobalAvgPooling)
        },
        LayerDescriptor {
            channels_in: 16,
            channels_out: 3,
            has_bias: true,
            lockable: true,
            weight_count: 48,
            bias_count: 3,
            ..layer(7, "fc", LayerKind::Dense)
        },
        layer(8, "cost_class", LayerKind::Cost),
        LayerDescriptor {
            channels_in: 16,
            channels_out: 2,
            has_bias: true,
            lockable: true,
            weight_count: 32,
            bias_count: 2,
            ..layer(9, "fc_coarse", LayerKind::Dense)
        },
        layer(10, "cost_coarse", LayerKind::Cost),
    ]
}

fn mock_inputs(layers: &[LayerDescriptor], index: usize) -> Vec<String> {
    match index {
        0 => Vec::new(),
        9 => vec![layers[6].name.clone()],
        i => vec![layers[i - 1].name.clone()],
    }
}

impl Engine for MockEngine {
    fn configure(&self, storage_dir: &Path) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::Configure)?;
        st.storage_dir = Some(storage_dir.to_path_buf());
        Ok(())
    }

    fn load_definition(&self, text: &str) -> Result<(), DefinitionError> {
        let name = parse_definition(text)?;
        let layers = mock_layers();
        let label_names = vec![
            vec!["cat".to_string(), "dog".to_string(), "bird".to_string()],
            vec!["pet".to_string(), "wild".to_string()],
        ];
        let costs = vec![
            CostStats {
                name: layers[8].name.clone(),
                group_index: 0,
                label_index: 0,
                class_count: 3,
                train_loss: 0.0,
                train_errors: 0,
                train_error_percentage: 0.0,
                test_loss: 0.0,
                test_errors: 0,
                test_error_percentage: 0.0,
            },
            CostStats {
                name: layers[10].name.clone(),
                group_index: 0,
                label_index: 1,
                class_count: 2,
                train_loss: 0.0,
                train_errors: 0,
                train_error_percentage: 0.0,
                test_loss: 0.0,
                test_errors: 0,
                test_error_percentage: 0.0,
            },
        ];

        let mut st = self.state.lock();
        st.model = Some(ModelInfo {
            name,
            dataset: "mock".into(),
            layer_count: layers.len(),
            cost_count: costs.len(),
            cost_index: 0,
            train_samples: self.train_samples,
            test_samples: self.test_samples,
            input: InputShape {
                channels: 3,
                height: 8,
                width: 8,
            },
            mean_std_normalization: true,
            mean: [125.3, 123.0, 113.9],
            std_dev: [63.0, 62.1, 66.7],
            label_names,
        });
        st.layers = layers;
        st.costs = costs;
        st.dataset_loaded = false;
        st.state = NetworkState::Idle;
        Ok(())
    }

    fn load_dataset(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::LoadDataset)?;
        if st.model.is_none() {
            return Err(EngineErr::new("no definition loaded"));
        }
        st.dataset_loaded = true;
        Ok(())
    }

    fn dispose(&self) {
        let mut st = self.state.lock();
        st.model = None;
        st.layers.clear();
        st.costs.clear();
        st.dataset_loaded = false;
        st.mode = RunMode::Idle;
        st.paused = false;
        st.state = NetworkState::Idle;
    }

    fn start_training(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::StartTraining)?;
        Self::ready(&st)?;
        if st.schedule.is_empty() {
            return Err(EngineErr::new("no training rates submitted"));
        }

        st.epoch = st.schedule.resume_epoch();
        st.sample_index = 0;
        st.mode = RunMode::Training;
        st.paused = false;
        st.state = NetworkState::Training;
        Ok(())
    }

    fn start_testing(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::StartTesting)?;
        Self::ready(&st)?;
        st.sample_index = 0;
        st.mode = RunMode::Testing;
        st.paused = false;
        st.state = NetworkState::Testing;
        Ok(())
    }

    fn pause(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::Pause)?;
        if st.mode == RunMode::Idle {
            return Err(EngineErr::new("nothing is running"));
        }
        st.paused = true;
        Ok(())
    }

    fn resume(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::Resume)?;
        if st.mode == RunMode::Idle {
            return Err(EngineErr::new("nothing is running"));
        }
        st.paused = false;
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineErr> {
        let mut st = self.state.lock();
        Self::check(&st, MockOp::Stop)?;
        st.mode = RunMode::Idle;
        st.paused = false;
        st.state = NetworkState::Completed;
        Ok(())
    }

    fn add_rate_segment(
        &self,
        segment: &RateSegment,
        clear: bool,
        goto_epoch: usize,
        train_samples: usize,
    ) -> Result<(), EngineErr> {
        self.push_entry(Submitted {
            segment: *segment,
            cycles: None,
            clear,
            goto_epoch,
            goto_cycle: 1,
            train_samples,
        })
    }

    fn add_cyclic_rate_segment(
        &self,
        segment: &RateSegment,
        cycles: usize,
        clear: bool,
        goto_epoch: usize,
        goto_cycle: usize,
        train_samples: usize,
    ) -> Result<(), EngineErr> {
        self.push_entry(Submitted {
            segment: *segment,
            cycles: Some(cycles),
            clear,
            goto_epoch,
            goto_cycle,
            train_samples,
        })
    }

    fn clear_strategies(&self) {
        self.state.lock().schedule.strategies.clear();
    }

    fn add_strategy(&self, strategy: &TrainingStrategy) {
        self.state.lock().schedule.strategies.push(*strategy);
    }

    fn training_counters(&self) -> EngineCounters {
        self.counters(false)
    }

    fn testing_counters(&self) -> EngineCounters {
        self.counters(true)
    }

    fn model_info(&self) -> Option<ModelInfo> {
        self.state.lock().model.clone()
    }

    fn layer_info(&self, index: usize) -> Option<LayerDescriptor> {
        self.state.lock().layers.get(index).cloned()
    }

    fn layer_inputs(&self, index: usize) -> Vec<String> {
        let st = self.state.lock();
        if index >= st.layers.len() {
            return Vec::new();
        }
        mock_inputs(&st.layers, index)
    }

    fn refresh_layer_statistics(&self, index: usize) -> Option<LayerStats> {
        let st = self.state.lock();
        let layer = st.layers.get(index)?;
        let spread = 1.0 / (layer.weight_count.max(1) as f32).sqrt();

        Some(LayerStats {
            neurons: TensorStats {
                mean: 0.1 * index as f32,
                std_dev: 1.0,
                min: -3.0,
                max: 3.0,
            },
            weights: TensorStats {
                mean: 0.0,
                std_dev: spread,
                min: -2.0 * spread,
                max: 2.0 * spread,
            },
            biases: TensorStats::default(),
            fprop_millis: 0.5 * (index + 1) as f32,
            bprop_millis: 1.0 * (index + 1) as f32,
        })
    }

    fn input_snapshot(&self, buf: &mut [f32], labels: &mut [usize]) -> bool {
        let st = self.state.lock();
        let Some(model) = st.model.as_ref() else {
            return false;
        };

        for (i, v) in buf.iter_mut().enumerate() {
            *v = (i % 17) as f32 / 4.0 - 2.0;
        }
        for (i, label) in labels.iter_mut().enumerate() {
            let classes = model.label_names.get(i).map(Vec::len).unwrap_or(1).max(1);
            *label = st.sample_index % classes;
        }
        true
    }

    fn layer_image(&self, index: usize, fill: u8, buf: &mut [u8]) -> bool {
        let st = self.state.lock();
        if index >= st.layers.len() {
            return false;
        }

        for (i, px) in buf.iter_mut().enumerate() {
            *px = if i % 5 == 0 {
                fill
            } else {
                ((i * 31 + index * 7) % 256) as u8
            };
        }
        true
    }

    fn confusion_matrix(&self, cost_index: usize, buf: &mut [u64]) -> Result<(), EngineErr> {
        let st = self.state.lock();
        Self::check(&st, MockOp::ConfusionMatrix)?;
        let cost = st
            .costs
            .get(cost_index)
            .ok_or_else(|| EngineErr::new(format!("no cost head {cost_index}")))?;

        let k = cost.class_count;
        if buf.len() != k * k {
            return Err(EngineErr::new(format!(
                "confusion buffer holds {} counts, expected {}",
                buf.len(),
                k * k
            )));
        }

        buf.fill(0);
        for row in 0..k {
            let samples = (self.test_samples / k + usize::from(row < self.test_samples % k)) as u64;
            let wrong = if k > 1 {
                (samples as f32 * cost.test_error_percentage / 100.0).round() as u64
            } else {
                0
            }
            .min(samples);

            buf[row * k + row] = samples - wrong;
            buf[row * k + (row + 1) % k] += wrong;
        }
        Ok(())
    }

    fn cost_info(&self, index: usize) -> Option<CostStats> {
        self.state.lock().costs.get(index).cloned()
    }

    fn load_weights(&self, path: &Path, _persist_optimizer: bool) -> io::Result<()> {
        let mut file = fs::File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != WEIGHTS_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a weights file", path.display()),
            ));
        }
        Ok(())
    }

    fn save_weights(&self, path: &Path, persist_optimizer: bool) -> io::Result<()> {
        let layers = self.state.lock().layers.len();
        let mut blob = WEIGHTS_MAGIC.to_vec();
        blob.extend_from_slice(&(layers as u64).to_le_bytes());
        blob.push(u8::from(persist_optimizer));
        fs::write(path, blob)
    }

    fn load_layer_weights(&self, path: &Path, index: usize) -> io::Result<()> {
        if index >= self.state.lock().layers.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no such layer"));
        }
        self.load_weights(path, false)
    }

    fn save_layer_weights(&self, path: &Path, index: usize) -> io::Result<()> {
        if index >= self.state.lock().layers.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no such layer"));
        }
        self.save_weights(path, false)
    }

    fn reset_weights(&self, _index: Option<usize>) {
        self.state.lock().resets += 1;
    }

    fn set_locked(&self, locked: bool) {
        for layer in self.state.lock().layers.iter_mut().filter(|l| l.lockable) {
            layer.locked = locked;
        }
    }

    fn set_layer_locked(&self, index: usize, locked: bool) {
        if let Some(layer) = self.state.lock().layers.get_mut(index) {
            if layer.lockable {
                layer.locked = locked;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(train: usize, test: usize, step: usize) -> MockEngine {
        let engine = MockEngine::with_samples(train, test, step);
        engine.load_definition("[tiny]\n").unwrap();
        engine.load_dataset().unwrap();
        engine
    }

    #[test]
    fn definition_errors_are_located() {
        let engine = MockEngine::new();
        let err = engine.load_definition("\n\n  Type=Input\n").unwrap_err();
        assert_eq!((err.row, err.column), (3, 3));

        let err = engine.load_definition("   ").unwrap_err();
        assert_eq!((err.row, err.column), (1, 1));

        assert!(engine.load_definition("[resnet]\nType=Input").is_ok());
        assert_eq!(engine.model_info().unwrap().name, "resnet");
    }

    #[test]
    fn run_walks_train_test_and_new_epoch() {
        let engine = loaded(100, 50, 100);
        let segment = RateSegment {
            epochs: 2,
            batch: crate::schedule::BatchGeometry {
                n: 50,
                ..Default::default()
            },
            ..RateSegment::default()
        };
        engine.add_rate_segment(&segment, true, 1, 100).unwrap();
        engine.start_training().unwrap();

        let states: Vec<_> = (0..7).map(|_| engine.training_counters().state).collect();
        assert_eq!(
            states,
            [
                NetworkState::Testing,
                NetworkState::NewEpoch,
                NetworkState::Training,
                NetworkState::Testing,
                NetworkState::NewEpoch,
                NetworkState::Completed,
                NetworkState::Completed,
            ]
        );
        assert!(!engine.is_running());
    }

    #[test]
    fn paused_engine_does_not_advance() {
        let engine = loaded(1000, 100, 10);
        engine.add_rate_segment(&RateSegment::default(), true, 1, 1000).unwrap();
        engine.start_training().unwrap();

        let before = engine.training_counters().sample_index;
        engine.pause().unwrap();
        assert_eq!(engine.training_counters().sample_index, before);
        engine.resume().unwrap();
        assert!(engine.training_counters().sample_index > before);
    }

    #[test]
    fn weights_blob_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let engine = loaded(10, 10, 10);

        engine.save_weights(&path, true).unwrap();
        engine.load_weights(&path, true).unwrap();

        std::fs::write(&path, b"garbage!").unwrap();
        assert_eq!(
            engine.load_weights(&path, true).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
