//! The timer task that samples engine progress.
//!
//! One tick is one non-blocking read of the engine counters, republished as a
//! [`ProgressEvent`]. Epoch boundaries and run completion are detected from the
//! same read; the poller then refreshes the cost heads, appends the training
//! log and, on completion, stops the session itself.

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::{self, ConfusionMatrix, CostHeadResult},
    engine::{Engine, EngineCounters, NetworkState},
    session::{RunKind, SharedState, TaskState},
    training_log::{EpochRecord, LogRow},
};

/// Rounds `samples` up to a whole number of batches.
///
/// A partial last batch is still processed as a full batch by the engine, so
/// progress is measured against this count.
pub fn adjusted_sample_count(samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 || samples % batch_size == 0 {
        samples
    } else {
        (samples / batch_size + 1) * batch_size
    }
}

/// One sampled reading of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub counters: EngineCounters,
    /// Adjusted sample count of the current phase.
    pub samples: usize,
    /// `sample_index / samples`, in `[0, 1]`.
    pub fraction: f32,
    /// Samples per second since the previous tick.
    pub sample_rate: f32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    Train(Progress),
    Test(Progress),
}

impl ProgressEvent {
    pub fn progress(&self) -> &Progress {
        match self {
            Self::Train(p) | Self::Test(p) => p,
        }
    }
}

/// Everything a session publishes on its event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    EpochCompleted {
        epoch: usize,
        cycle: usize,
        results: Vec<CostHeadResult>,
    },
    Completed {
        results: Vec<CostHeadResult>,
        confusion: Option<ConfusionMatrix>,
    },
    StateChanged(TaskState),
}

/// What the poller task needs to reach.
#[derive(Clone)]
pub(crate) struct PollContext {
    pub engine: Arc<dyn Engine>,
    pub state: SharedState,
    pub events: mpsc::Sender<SessionEvent>,
}

/// Sample-rate estimate between two ticks of the same phase.
#[derive(Debug, Default)]
struct Sampler {
    previous: Option<(NetworkState, usize, Instant)>,
}

impl Sampler {
    fn rate(&mut self, state: NetworkState, sample_index: usize, now: Instant) -> f32 {
        let rate = match self.previous {
            Some((prev, index, at)) if prev == state => {
                let secs = now.duration_since(at).as_secs_f32();
                if secs > 0.0 {
                    sample_index.saturating_sub(index) as f32 / secs
                } else {
                    0.0
                }
            }
            // a phase change restarts the estimate
            _ => 0.0,
        };

        self.previous = Some((state, sample_index, now));
        rate
    }
}

#[derive(Debug, Default)]
struct Tick {
    events: Vec<SessionEvent>,
    finished: bool,
}

/// Handle to a running poller task.
///
/// Dropping the handle cancels the task; no tick runs after the drop returns
/// control to the runtime. A detached handle leaves its task to finish alone.
#[derive(Debug)]
pub struct ProgressPoller {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressPoller {
    /// Spawns a poller ticking every `period`, starting immediately.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub(crate) fn spawn(ctx: PollContext, period: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(ctx.run(period, token.clone()));
        debug!("poller started, period {period:?}");

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Releases the handle of a task that ended its own run, without cancelling
    /// the events it is still publishing.
    pub(crate) fn detach(mut self) {
        self.handle.take();
        debug!("poller detached after completion");
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.cancel();
            handle.abort();
            debug!("poller released");
        }
    }
}

impl PollContext {
    async fn run(self, period: Duration, token: CancellationToken) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sampler = Sampler::default();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick = self.tick(&mut sampler);
            for event in tick.events {
                if !self.publish(event, &token).await {
                    return;
                }
            }
            if tick.finished {
                debug!("poller finished with the run");
                break;
            }
        }
    }

    /// Sends one event. Returns `false` once cancelled.
    async fn publish(&self, event: SessionEvent, token: &CancellationToken) -> bool {
        if let SessionEvent::Progress(_) = event {
            match self.events.try_send(event) {
                Err(TrySendError::Full(_)) => debug!("event channel full, progress tick dropped"),
                Err(TrySendError::Closed(_)) | Ok(()) => {}
            }
            return true;
        }

        tokio::select! {
            _ = token.cancelled() => false,
            _ = self.events.send(event) => true,
        }
    }

    fn tick(&self, sampler: &mut Sampler) -> Tick {
        let (run, train_samples, test_samples, cost_count) = {
            let st = self.state.lock();
            if st.task != TaskState::Running {
                return Tick::default();
            }
            let (train, test) = st
                .model
                .as_ref()
                .map(|m| (m.train_samples, m.test_samples))
                .unwrap_or_default();
            (st.run, train, test, st.cost_count())
        };

        let counters = match run {
            RunKind::Training => self.engine.training_counters(),
            RunKind::Testing => self.engine.testing_counters(),
        };
        let sample_rate = sampler.rate(counters.state, counters.sample_index, Instant::now());

        let phase_samples = if counters.state == NetworkState::Training {
            train_samples
        } else {
            test_samples
        };
        let samples = adjusted_sample_count(phase_samples, counters.batch_size);
        let fraction = if samples == 0 {
            0.0
        } else {
            (counters.sample_index as f32 / samples as f32).min(1.0)
        };

        let mut tick = Tick::default();
        let elapsed = {
            let mut st = self.state.lock();
            // a stop may have raced the read
            if st.task != TaskState::Running {
                return tick;
            }

            let elapsed = st.stopwatch.elapsed();
            let progress = Progress {
                counters,
                samples,
                fraction,
                sample_rate,
                elapsed,
            };
            let event = match run {
                RunKind::Training => ProgressEvent::Train(progress),
                RunKind::Testing => ProgressEvent::Test(progress),
            };

            if st.network != counters.state {
                debug!("network state {:?} -> {:?}", st.network, counters.state);
            }
            st.network = counters.state;
            st.sample_rate = sample_rate;
            st.last_progress = Some(event);
            tick.events.push(SessionEvent::Progress(event));
            elapsed
        };

        if run == RunKind::Training {
            tick.events.extend(self.log_epochs(&counters, cost_count, elapsed));
        }

        if counters.state == NetworkState::Completed {
            tick.events.extend(self.complete(cost_count));
            tick.finished = true;
        }

        tick
    }

    /// Logs every epoch completed since the last logged one, refreshing every
    /// cost head first.
    ///
    /// When one tick spans several epochs, the skipped epochs get rows built
    /// from their own schedule segment and the engine's latest cost results,
    /// the only ones it still holds.
    fn log_epochs(
        &self,
        counters: &EngineCounters,
        cost_count: usize,
        elapsed: Duration,
    ) -> Vec<SessionEvent> {
        let completed = match counters.state {
            NetworkState::NewEpoch | NetworkState::Completed => counters.epoch,
            _ => counters.epoch.saturating_sub(1),
        };
        if completed <= self.state.lock().last_logged_epoch {
            return Vec::new();
        }

        let results = aggregator::fetch_results(self.engine.as_ref(), cost_count);

        let mut st = self.state.lock();
        let first = st.last_logged_epoch + 1;
        if completed < first {
            return Vec::new();
        }
        if completed > first {
            warn!(
                "epochs {first}..={completed} completed within one tick,                  earlier rows carry the latest cost results"
            );
        }
        st.costs.replace(results.clone());
        st.last_logged_epoch = completed;

        let mut events = Vec::with_capacity(completed - first + 1);
        for epoch in first..=completed {
            let cycle = if epoch == completed {
                counters.cycle
            } else {
                st.schedule
                    .segment_for_epoch(epoch)
                    .map_or(counters.cycle, |(_, cycle)| cycle)
            };

            match st.schedule.effective_segment(epoch) {
                Some(segment) => {
                    let record = EpochRecord {
                        cycle,
                        epoch,
                        rate: counters.rate,
                        elapsed,
                    };
                    for (i, result) in results.iter().enumerate() {
                        st.log.push(LogRow::new(&record, &segment, i, result));
                    }
                }
                None => warn!("epoch {epoch} lies outside the submitted schedule, not logged"),
            }

            info!("epoch {epoch}/{} completed (cycle {cycle})", counters.total_epochs);
            events.push(SessionEvent::EpochCompleted {
                epoch,
                cycle,
                results: results.clone(),
            });
        }
        events
    }

    /// Performs the stop cleanup after the engine reported completion.
    fn complete(&self, cost_count: usize) -> [SessionEvent; 2] {
        let results = aggregator::fetch_results(self.engine.as_ref(), cost_count);
        let (model, active) = {
            let st = self.state.lock();
            (st.model.clone(), st.costs.active())
        };

        let confusion = model.and_then(|model| {
            ConfusionMatrix::fetch(self.engine.as_ref(), &model, active)
                .inspect_err(|e| warn!("confusion matrix unavailable: {e}"))
                .ok()
        });

        {
            let mut st = self.state.lock();
            st.costs.replace(results.clone());
            st.confusion = confusion.clone();
            if let Some(poller) = st.poller.take() {
                poller.detach();
            }
            st.finish();
        }

        info!("run completed, session stopped");
        [
            SessionEvent::StateChanged(TaskState::Stopped),
            SessionEvent::Completed { results, confusion },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusted_count_rounds_up_to_whole_batches() {
        assert_eq!(adjusted_sample_count(1000, 100), 1000);
        assert_eq!(adjusted_sample_count(1000, 128), 1024);
        assert_eq!(adjusted_sample_count(1, 128), 128);
        assert_eq!(adjusted_sample_count(0, 128), 0);
        assert_eq!(adjusted_sample_count(50_000, 1), 50_000);
    }

    #[test]
    fn adjusted_count_is_never_below_samples() {
        for batch in 1..=64 {
            for samples in 0..300 {
                let adjusted = adjusted_sample_count(samples, batch);
                assert!(adjusted >= samples);
                assert_eq!(adjusted % batch, 0);
                assert!(adjusted - samples < batch);
            }
        }
    }

    #[test]
    fn zero_batch_leaves_count_unchanged() {
        assert_eq!(adjusted_sample_count(77, 0), 77);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_resets_on_phase_change() {
        let mut sampler = Sampler::default();
        let t0 = Instant::now();

        assert_eq!(sampler.rate(NetworkState::Training, 0, t0), 0.0);
        let rate = sampler.rate(NetworkState::Training, 500, t0 + Duration::from_secs(2));
        assert_eq!(rate, 250.0);

        let rate = sampler.rate(NetworkState::Testing, 10_000, t0 + Duration::from_secs(3));
        assert_eq!(rate, 0.0);

        let rate = sampler.rate(NetworkState::Testing, 10_100, t0 + Duration::from_secs(4));
        assert_eq!(rate, 100.0);
    }
}
