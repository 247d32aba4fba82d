use std::{io, path::Path, sync::Arc, time::Duration};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{RunKind, SessionState, SharedState, TaskState};
use crate::{
    Result,
    aggregator::{self, ConfusionMatrix, CostHeadResult},
    config::{self, SessionConfig},
    engine::{Engine, EngineErr, LayerStats, ModelInfo, NetworkState},
    error::WorkbenchErr,
    layout::LayerDescriptor,
    poller::{PollContext, ProgressEvent, ProgressPoller, SessionEvent},
    schedule::{Optimizer, Schedule, ScheduleBuilder},
    snapshot::{BACKGROUND_FILL, Snapshot, SnapshotRenderer},
    training_log::TrainingLog,
};

const EVENT_CAPACITY: usize = 256;

/// Drives one engine through load, run and teardown.
///
/// Control calls made from a state that does not allow them return `Ok(false)`
/// without reaching the engine. A control call the engine fails rolls the
/// session back to `Stopped` before the error is returned.
pub struct SessionController {
    engine: Arc<dyn Engine>,
    config: SessionConfig,
    state: SharedState,
    layers: Vec<LayerDescriptor>,
    schedule: ScheduleBuilder,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionController {
    /// Creates a new `SessionController`.
    ///
    /// # Args
    /// * `engine` - The engine this session drives.
    /// * `config` - User preferences for this session.
    ///
    /// # Returns
    /// The controller and the receiving end of its event channel.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidConfig` if `config` is out of range.
    pub fn new(
        engine: Arc<dyn Engine>,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let state = Arc::new(Mutex::new(SessionState::new(config.log_delimiter)));

        let controller = Self {
            engine,
            config,
            state,
            layers: Vec::new(),
            schedule: ScheduleBuilder::new(),
            events: tx,
        };
        Ok((controller, rx))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Creates the storage directory and hands it to the engine.
    pub fn configure(&self) -> Result<()> {
        let dir = &self.config.storage_dir;
        std::fs::create_dir_all(dir).map_err(|e| with_path(e, dir))?;
        self.engine.configure(dir)?;
        info!("engine configured with storage at {}", dir.display());
        Ok(())
    }

    /// Loads a network definition, stopping any run first.
    ///
    /// # Returns
    /// The model the engine built from the definition.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::Definition` with the offending row and column if
    /// the engine rejects the text.
    pub fn load_definition(&mut self, text: &str) -> Result<ModelInfo> {
        if self.task_state() != TaskState::Stopped {
            self.stop()?;
        }

        self.engine.load_definition(text)?;
        let model = self.engine.model_info().ok_or(WorkbenchErr::NoModel)?;
        self.layers = self.catalogue(model.layer_count);

        {
            let mut st = self.state.lock();
            st.model = Some(model.clone());
            st.dataset = Some(model.dataset.clone());
            st.network = NetworkState::Idle;
            st.last_progress = None;
            st.last_logged_epoch = 0;
            st.costs.clear();
            st.confusion = None;
            st.log.clear();
        }

        info!(
            "model '{}' loaded: {} layer(s), {} cost head(s)",
            model.name,
            self.layers.len(),
            model.cost_count
        );
        Ok(model)
    }

    /// Loads the dataset of the current definition.
    ///
    /// # Returns
    /// The model info, refreshed with the dataset's sample counts.
    pub fn load_dataset(&mut self) -> Result<ModelInfo> {
        if self.state.lock().model.is_none() {
            return Err(WorkbenchErr::NoModel);
        }

        self.engine.load_dataset()?;
        let model = self.engine.model_info().ok_or(WorkbenchErr::NoModel)?;

        let mut st = self.state.lock();
        st.dataset = Some(model.dataset.clone());
        st.model = Some(model.clone());
        info!(
            "dataset '{}' loaded: {} train / {} test samples",
            model.dataset, model.train_samples, model.test_samples
        );
        Ok(model)
    }

    /// Stops any run and releases the engine's model.
    pub fn dispose(&mut self) {
        if self.task_state() != TaskState::Stopped {
            if let Err(e) = self.stop() {
                warn!("stop during dispose failed: {e}");
            }
        }

        self.release_poller();
        self.engine.dispose();
        self.layers.clear();

        let mut st = self.state.lock();
        st.model = None;
        st.dataset = None;
        st.finish();
        info!("session disposed");
    }

    fn catalogue(&self, layer_count: usize) -> Vec<LayerDescriptor> {
        let layers: Vec<_> = (0..layer_count)
            .map_while(|i| self.engine.layer_info(i))
            .map(|mut layer| {
                layer.inputs = self.engine.layer_inputs(layer.index);
                layer
            })
            .collect();

        if layers.len() != layer_count {
            warn!(
                "engine described {} of {layer_count} layer(s)",
                layers.len()
            );
        }
        layers
    }

    /// Starts a training or evaluation run.
    ///
    /// Training runs submit the pending schedule first.
    ///
    /// # Returns
    /// `Ok(false)` unless the session was `Stopped`.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::NoModel` without a loaded model,
    /// `WorkbenchErr::InvalidSchedule` if the schedule cannot be submitted and
    /// `WorkbenchErr::Engine` if the engine refuses to start.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start(&mut self, training: bool) -> Result<bool> {
        if self.task_state() != TaskState::Stopped {
            debug!("start ignored while {:?}", self.task_state());
            return Ok(false);
        }

        let model = self.state.lock().model.clone().ok_or(WorkbenchErr::NoModel)?;
        let schedule = if training {
            Some(self.schedule.submit(self.engine.as_ref(), model.train_samples)?)
        } else {
            None
        };

        let started = if training {
            self.engine.start_training()
        } else {
            self.engine.start_testing()
        };
        if let Err(e) = started {
            return self.rollback(e);
        }

        {
            let mut st = self.state.lock();
            st.task = TaskState::Running;
            st.run = if training {
                RunKind::Training
            } else {
                RunKind::Testing
            };
            st.network = if training {
                NetworkState::Training
            } else {
                NetworkState::Testing
            };
            st.stopwatch.restart();
            st.sample_rate = 0.0;
            st.last_progress = None;
            st.confusion = None;

            if let Some(schedule) = schedule {
                let goto = schedule.resume_epoch();
                st.log.truncate_from_epoch(goto);
                st.last_logged_epoch = goto.saturating_sub(1);
                st.active_optimizer = schedule.effective_segment(goto).map(|s| s.optimizer);
                st.schedule = schedule;
            }
        }

        self.spawn_poller();
        self.notify(TaskState::Running);
        info!(
            "{} run started on '{}'",
            if training { "training" } else { "testing" },
            model.name
        );
        Ok(true)
    }

    /// Pauses a running session. The last progress reading is kept.
    pub fn pause(&mut self) -> Result<bool> {
        if self.task_state() != TaskState::Running {
            debug!("pause ignored while {:?}", self.task_state());
            return Ok(false);
        }

        self.release_poller();
        if let Err(e) = self.engine.pause() {
            return self.rollback(e);
        }

        {
            let mut st = self.state.lock();
            st.task = TaskState::Paused;
            st.stopwatch.pause();
            st.sample_rate = 0.0;
        }

        self.notify(TaskState::Paused);
        info!("session paused");
        Ok(true)
    }

    pub fn resume(&mut self) -> Result<bool> {
        if self.task_state() != TaskState::Paused {
            debug!("resume ignored while {:?}", self.task_state());
            return Ok(false);
        }

        if let Err(e) = self.engine.resume() {
            return self.rollback(e);
        }

        {
            let mut st = self.state.lock();
            st.task = TaskState::Running;
            st.stopwatch.resume();
        }

        self.spawn_poller();
        self.notify(TaskState::Running);
        info!("session resumed");
        Ok(true)
    }

    /// Stops a running or paused session.
    ///
    /// The poller is released and the session ends `Stopped` even when the
    /// engine call fails; the failure is returned afterwards.
    pub fn stop(&mut self) -> Result<bool> {
        if self.task_state() == TaskState::Stopped {
            debug!("stop ignored, session already stopped");
            return Ok(false);
        }

        self.release_poller();
        let stopped = self.engine.stop();
        self.state.lock().finish();
        self.notify(TaskState::Stopped);

        match stopped {
            Ok(()) => {
                info!("session stopped");
                Ok(true)
            }
            Err(e) => {
                warn!("engine failed to stop cleanly: {e}");
                Err(e.into())
            }
        }
    }

    fn rollback(&mut self, err: EngineErr) -> Result<bool> {
        self.release_poller();
        if let Err(e) = self.engine.stop() {
            debug!("stop after failed call also failed: {e}");
        }
        self.state.lock().finish();
        self.notify(TaskState::Stopped);

        warn!("engine call failed, session rolled back to stopped: {err}");
        Err(WorkbenchErr::Engine(err))
    }

    fn spawn_poller(&self) {
        let ctx = PollContext {
            engine: Arc::clone(&self.engine),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        };

        // the first tick waits for this lock, so a run that completes at once
        // still finds its poller to release
        let mut st = self.state.lock();
        st.poller = Some(ProgressPoller::spawn(ctx, self.config.refresh_interval));
    }

    fn release_poller(&self) {
        self.state.lock().poller = None;
    }

    /// Whether a poller task is attached to the session.
    pub fn is_polling(&self) -> bool {
        self.state.lock().poller.is_some()
    }

    fn notify(&self, task: TaskState) {
        if let Err(TrySendError::Full(_)) = self.events.try_send(SessionEvent::StateChanged(task)) {
            debug!("event channel full, state change to {task:?} not published");
        }
    }

    /// Changes the poller cadence, restarting the poller of a running session.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::InvalidConfig` outside `1..=300` seconds.
    pub fn set_refresh_interval(&mut self, interval: Duration) -> Result<()> {
        config::validate_refresh_interval(interval)?;
        self.config.refresh_interval = interval;

        if self.task_state() == TaskState::Running {
            self.spawn_poller();
        }
        debug!("refresh interval set to {interval:?}");
        Ok(())
    }

    /// # Errors
    /// Returns `WorkbenchErr::InvalidConfig` outside `1..=8`.
    pub fn set_zoom_block(&mut self, zoom_block: usize) -> Result<()> {
        config::validate_zoom_block(zoom_block)?;
        self.config.zoom_block = zoom_block;
        Ok(())
    }

    pub fn schedule(&self) -> &ScheduleBuilder {
        &self.schedule
    }

    /// The builder the next training start submits.
    pub fn schedule_mut(&mut self) -> &mut ScheduleBuilder {
        &mut self.schedule
    }

    /// The schedule submitted by the last training start.
    pub fn submitted_schedule(&self) -> Schedule {
        self.state.lock().schedule.clone()
    }

    pub fn task_state(&self) -> TaskState {
        self.state.lock().task
    }

    pub fn network_state(&self) -> NetworkState {
        self.state.lock().network
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().stopwatch.elapsed()
    }

    pub fn sample_rate(&self) -> f32 {
        self.state.lock().sample_rate
    }

    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.state.lock().last_progress
    }

    pub fn active_optimizer(&self) -> Option<Optimizer> {
        self.state.lock().active_optimizer
    }

    pub fn dataset(&self) -> Option<String> {
        self.state.lock().dataset.clone()
    }

    pub fn model(&self) -> Option<ModelInfo> {
        self.state.lock().model.clone()
    }

    pub fn cost_results(&self) -> Vec<CostHeadResult> {
        self.state.lock().costs.results().to_vec()
    }

    pub fn active_cost_head(&self) -> usize {
        self.state.lock().costs.active()
    }

    /// The confusion matrix built last, on request or at run completion.
    pub fn confusion(&self) -> Option<ConfusionMatrix> {
        self.state.lock().confusion.clone()
    }

    pub fn training_log(&self) -> TrainingLog {
        self.state.lock().log.clone()
    }

    pub fn write_training_log(&self, path: impl AsRef<Path>) -> Result<()> {
        let log = self.training_log();
        log.write_to(path.as_ref())?;
        info!("{} log row(s) written to {}", log.len(), path.as_ref().display());
        Ok(())
    }

    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// # Errors
    /// Returns `WorkbenchErr::LayerOutOfRange` past the last layer.
    pub fn layer(&self, index: usize) -> Result<&LayerDescriptor> {
        self.layers.get(index).ok_or(WorkbenchErr::LayerOutOfRange {
            index,
            count: self.layers.len(),
        })
    }

    pub fn layer_statistics(&self, index: usize) -> Result<Option<LayerStats>> {
        self.layer(index)?;
        Ok(self.engine.refresh_layer_statistics(index))
    }

    /// Re-reads every cost head.
    pub fn refresh_costs(&self) -> Result<Vec<CostHeadResult>> {
        let cost_count = {
            let st = self.state.lock();
            st.model.as_ref().ok_or(WorkbenchErr::NoModel)?.cost_count
        };

        let results = aggregator::fetch_results(self.engine.as_ref(), cost_count);
        self.state.lock().costs.replace(results.clone());
        Ok(results)
    }

    /// Rebuilds the confusion matrix of the active cost head.
    pub fn refresh_confusion(&self) -> Result<ConfusionMatrix> {
        self.select_cost_head(self.active_cost_head())
    }

    /// Makes `cost_index` the active cost head and rebuilds its confusion matrix.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::NoModel` without a model and
    /// `WorkbenchErr::Engine` if the head does not exist.
    pub fn select_cost_head(&self, cost_index: usize) -> Result<ConfusionMatrix> {
        let model = self.model().ok_or(WorkbenchErr::NoModel)?;
        if cost_index >= model.cost_count {
            return Err(EngineErr::new(format!(
                "cost head {cost_index} out of range, model has {}",
                model.cost_count
            ))
            .into());
        }

        let matrix = ConfusionMatrix::fetch(self.engine.as_ref(), &model, cost_index)?;

        let mut st = self.state.lock();
        st.costs.set_active(cost_index);
        st.confusion = Some(matrix.clone());
        Ok(matrix)
    }

    /// Renders the engine's current input sample.
    pub fn input_snapshot(&self) -> Result<Snapshot> {
        let model = self.model().ok_or(WorkbenchErr::NoModel)?;
        Ok(self.renderer().render_input(&model))
    }

    /// Renders a layer's parameters, or the input sample for input layers.
    pub fn layer_snapshot(&self, index: usize) -> Result<Snapshot> {
        let model = self.model().ok_or(WorkbenchErr::NoModel)?;
        let layer = self.layer(index)?;
        Ok(self.renderer().render_layer(layer, &model, BACKGROUND_FILL))
    }

    fn renderer(&self) -> SnapshotRenderer<'_> {
        SnapshotRenderer::new(self.engine.as_ref(), self.config.zoom_block)
    }

    /// Locks or unlocks every lockable layer.
    ///
    /// # Returns
    /// `false` when locking is disabled by configuration.
    pub fn set_locked(&mut self, locked: bool) -> bool {
        if self.config.disable_locking {
            debug!("locking disabled, set_locked ignored");
            return false;
        }

        self.engine.set_locked(locked);
        for layer in self.layers.iter_mut().filter(|l| l.lockable) {
            layer.locked = locked;
        }
        true
    }

    /// Locks or unlocks one layer.
    ///
    /// # Returns
    /// `false` when locking is disabled or the layer is not lockable.
    pub fn set_layer_locked(&mut self, index: usize, locked: bool) -> Result<bool> {
        let disabled = self.config.disable_locking;
        let count = self.layers.len();
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(WorkbenchErr::LayerOutOfRange { index, count })?;

        if disabled || !layer.lockable {
            return Ok(false);
        }

        self.engine.set_layer_locked(index, locked);
        layer.locked = locked;
        Ok(true)
    }

    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.engine
            .save_weights(path, self.config.persist_optimizer)
            .map_err(|e| with_path(e, path))?;
        info!("weights saved to {}", path.display());
        Ok(())
    }

    pub fn load_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.engine
            .load_weights(path, self.config.persist_optimizer)
            .map_err(|e| with_path(e, path))?;
        info!("weights loaded from {}", path.display());
        Ok(())
    }

    pub fn save_layer_weights(&self, path: impl AsRef<Path>, index: usize) -> Result<()> {
        self.layer(index)?;
        let path = path.as_ref();
        self.engine
            .save_layer_weights(path, index)
            .map_err(|e| with_path(e, path))
    }

    pub fn load_layer_weights(&self, path: impl AsRef<Path>, index: usize) -> Result<()> {
        self.layer(index)?;
        let path = path.as_ref();
        self.engine
            .load_layer_weights(path, index)
            .map_err(|e| with_path(e, path))
    }

    /// Re-initializes one layer's weights, or every layer's when `index` is `None`.
    pub fn reset_weights(&self, index: Option<usize>) -> Result<()> {
        if let Some(index) = index {
            self.layer(index)?;
        } else if self.layers.is_empty() {
            return Err(WorkbenchErr::NoModel);
        }

        self.engine.reset_weights(index);
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release_poller();
    }
}

fn with_path(e: io::Error, path: &Path) -> WorkbenchErr {
    WorkbenchErr::Io(io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}
