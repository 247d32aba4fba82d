#![cfg(test)]

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, time};

use super::{SessionController, TaskState};
use crate::{
    SessionConfig, WorkbenchErr,
    engine::{Engine, MockEngine, MockOp, NetworkState},
    poller::SessionEvent,
    schedule::{BatchGeometry, Optimizer, RateSegment},
};

fn segment(epochs: usize) -> RateSegment {
    RateSegment {
        epochs,
        batch: BatchGeometry {
            n: 50,
            ..BatchGeometry::default()
        },
        ..RateSegment::default()
    }
}

fn session_with(
    config: SessionConfig,
) -> (SessionController, Arc<MockEngine>, mpsc::Receiver<SessionEvent>) {
    let engine = Arc::new(MockEngine::with_samples(200, 100, 100));
    let (mut ctl, rx) = SessionController::new(engine.clone(), config).unwrap();
    ctl.load_definition("[session-test]").unwrap();
    ctl.load_dataset().unwrap();
    ctl.schedule_mut().flat(segment(2), true, 1).unwrap();
    (ctl, engine, rx)
}

fn session() -> (SessionController, Arc<MockEngine>, mpsc::Receiver<SessionEvent>) {
    session_with(SessionConfig::default())
}

fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn run_until_stopped(ctl: &SessionController) {
    for _ in 0..30 {
        if ctl.task_state() == TaskState::Stopped {
            return;
        }
        time::sleep(Duration::from_secs(1)).await;
    }
    panic!("run did not complete");
}

#[tokio::test(start_paused = true)]
async fn only_allowed_transitions_take_effect() {
    let (mut ctl, engine, _rx) = session();

    assert!(!ctl.pause().unwrap());
    assert!(!ctl.resume().unwrap());
    assert!(!ctl.stop().unwrap());
    assert_eq!(ctl.task_state(), TaskState::Stopped);

    assert!(ctl.start(true).unwrap());
    assert_eq!(ctl.task_state(), TaskState::Running);
    assert!(ctl.is_polling());
    assert!(!ctl.start(true).unwrap());
    assert!(!ctl.resume().unwrap());

    assert!(ctl.pause().unwrap());
    assert_eq!(ctl.task_state(), TaskState::Paused);
    assert!(engine.is_paused());
    assert!(!ctl.pause().unwrap());
    assert!(!ctl.start(false).unwrap());

    assert!(ctl.resume().unwrap());
    assert_eq!(ctl.task_state(), TaskState::Running);
    assert!(!engine.is_paused());

    assert!(ctl.stop().unwrap());
    assert_eq!(ctl.task_state(), TaskState::Stopped);
    assert_eq!(ctl.network_state(), NetworkState::Completed);
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn stop_twice_ends_in_the_same_state() {
    let (mut ctl, _engine, _rx) = session();
    ctl.start(true).unwrap();
    time::sleep(Duration::from_millis(2500)).await;

    assert!(ctl.stop().unwrap());
    let first = (ctl.task_state(), ctl.network_state(), ctl.elapsed());

    assert!(!ctl.stop().unwrap());
    let second = (ctl.task_state(), ctl.network_state(), ctl.elapsed());
    assert_eq!(first, second);
    assert_eq!(first.2, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_progress_and_duration() {
    let (mut ctl, _engine, mut rx) = session();
    ctl.start(true).unwrap();
    time::sleep(Duration::from_millis(1500)).await;

    assert!(ctl.pause().unwrap());
    let progress = ctl.last_progress();
    let elapsed = ctl.elapsed();
    assert!(progress.is_some());
    assert_eq!(elapsed, Duration::from_millis(1500));
    drain(&mut rx);

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(ctl.last_progress(), progress);
    assert_eq!(ctl.elapsed(), elapsed);
    assert!(drain(&mut rx).is_empty());

    ctl.resume().unwrap();
    run_until_stopped(&ctl).await;
    assert_eq!(ctl.training_log().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn completed_run_stops_itself() {
    let (mut ctl, _engine, mut rx) = session();
    ctl.start(true).unwrap();
    assert_eq!(ctl.active_optimizer(), Some(Optimizer::Adam));
    run_until_stopped(&ctl).await;

    assert_eq!(ctl.network_state(), NetworkState::Completed);
    assert_eq!(ctl.elapsed(), Duration::ZERO);
    assert!(ctl.confusion().is_some());
    assert_eq!(ctl.cost_results().len(), 2);

    let events = drain(&mut rx);
    let epochs: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::EpochCompleted { epoch, .. } => Some(*epoch),
            _ => None,
        })
        .collect();
    assert_eq!(epochs, [1, 2]);
    assert!(matches!(events.last(), Some(SessionEvent::Completed { .. })));
    assert!(events.contains(&SessionEvent::StateChanged(TaskState::Stopped)));

    let log = ctl.training_log();
    let rows: Vec<_> = log.rows().iter().map(|r| (r.epoch, r.cost_index)).collect();
    assert_eq!(rows, [(1, 0), (1, 1), (2, 0), (2, 1)]);
    assert!(log.rows().iter().all(|r| r.n == 50));
    assert!(!ctl.is_polling());
}

#[tokio::test(start_paused = true)]
async fn epochs_passed_between_ticks_are_all_logged() {
    let engine = Arc::new(MockEngine::with_samples(200, 100, 100).with_steps_per_read(5));
    let (mut ctl, mut rx) = SessionController::new(engine, SessionConfig::default()).unwrap();
    ctl.load_definition("[fast-engine]").unwrap();
    ctl.load_dataset().unwrap();
    ctl.schedule_mut().flat(segment(6), true, 1).unwrap();

    ctl.start(true).unwrap();
    run_until_stopped(&ctl).await;

    let epochs: Vec<_> = drain(&mut rx)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::EpochCompleted { epoch, .. } => Some(*epoch),
            _ => None,
        })
        .collect();
    assert_eq!(epochs, [1, 2, 3, 4, 5, 6]);

    let rows: Vec<_> = ctl
        .training_log()
        .rows()
        .iter()
        .filter(|r| r.cost_index == 0)
        .map(|r| (r.epoch, r.cycle))
        .collect();
    assert_eq!(rows, [(1, 1), (2, 1), (3, 1), (4, 1), (5, 1), (6, 1)]);
}

#[tokio::test(start_paused = true)]
async fn resumed_schedule_logs_from_goto_epoch() {
    let (mut ctl, _engine, _rx) = session();
    ctl.schedule_mut().flat(segment(3), true, 2).unwrap();
    ctl.start(true).unwrap();
    run_until_stopped(&ctl).await;

    let epochs: Vec<_> = ctl.training_log().rows().iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, [2, 2, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn testing_run_builds_confusion_without_logging() {
    let (mut ctl, _engine, mut rx) = session();
    assert!(ctl.start(false).unwrap());
    run_until_stopped(&ctl).await;

    assert!(ctl.training_log().is_empty());
    let confusion = ctl.confusion().unwrap();
    assert_eq!(confusion.total(), 100);
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::Progress(crate::ProgressEvent::Test(_))))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_start_rolls_back() {
    let (mut ctl, engine, _rx) = session();
    engine.fail_on(MockOp::StartTraining);

    let err = ctl.start(true).unwrap_err();
    assert!(matches!(err, WorkbenchErr::Engine(_)));
    assert_eq!(ctl.task_state(), TaskState::Stopped);
    assert_eq!(ctl.network_state(), NetworkState::Completed);

    engine.clear_failures();
    assert!(ctl.start(true).unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_pause_releases_the_poller() {
    let (mut ctl, engine, mut rx) = session();
    ctl.start(true).unwrap();
    time::sleep(Duration::from_millis(500)).await;

    engine.fail_on(MockOp::Pause);
    assert!(ctl.pause().is_err());
    assert_eq!(ctl.task_state(), TaskState::Stopped);
    assert_eq!(ctl.network_state(), NetworkState::Completed);
    assert!(!ctl.is_polling());

    drain(&mut rx);
    time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_stop_still_stops() {
    let (mut ctl, engine, mut rx) = session();
    ctl.start(true).unwrap();
    engine.fail_on(MockOp::Stop);

    assert!(ctl.stop().is_err());
    assert_eq!(ctl.task_state(), TaskState::Stopped);
    assert_eq!(ctl.network_state(), NetworkState::Completed);

    drain(&mut rx);
    time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());
    assert!(!ctl.stop().unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_resume_rolls_back() {
    let (mut ctl, engine, _rx) = session();
    ctl.start(true).unwrap();
    ctl.pause().unwrap();
    engine.fail_on(MockOp::Resume);

    assert!(ctl.resume().is_err());
    assert_eq!(ctl.task_state(), TaskState::Stopped);
}

#[test]
fn start_needs_a_model_and_a_schedule() {
    let engine = Arc::new(MockEngine::new());
    let (mut ctl, _rx) = SessionController::new(engine, SessionConfig::default()).unwrap();
    assert!(matches!(ctl.start(true), Err(WorkbenchErr::NoModel)));

    ctl.load_definition("[empty-schedule]").unwrap();
    ctl.load_dataset().unwrap();
    assert!(matches!(ctl.start(true), Err(WorkbenchErr::InvalidSchedule(_))));
    assert_eq!(ctl.task_state(), TaskState::Stopped);
}

#[test]
fn rejected_definition_reports_its_location() {
    let engine = Arc::new(MockEngine::new());
    let (mut ctl, _rx) = SessionController::new(engine, SessionConfig::default()).unwrap();

    match ctl.load_definition("\nType=Input") {
        Err(WorkbenchErr::Definition(e)) => assert_eq!((e.row, e.column), (2, 1)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(ctl.model().is_none());
    assert!(ctl.layers().is_empty());
}

#[test]
fn catalogue_carries_layer_inputs() {
    let (ctl, _engine, _rx) = session();
    assert_eq!(ctl.layers().len(), 11);
    assert!(ctl.layers()[0].inputs.is_empty());
    assert_eq!(ctl.layers()[1].inputs, ["input"]);
    assert_eq!(ctl.layer(9).unwrap().inputs, ["gap"]);
    assert!(matches!(
        ctl.layer(11),
        Err(WorkbenchErr::LayerOutOfRange { index: 11, count: 11 })
    ));
}

#[tokio::test(start_paused = true)]
async fn refresh_interval_is_validated_and_applied() {
    let (mut ctl, _engine, mut rx) = session();
    assert!(ctl.set_refresh_interval(Duration::ZERO).is_err());
    assert!(ctl.set_refresh_interval(Duration::from_secs(301)).is_err());
    assert!(ctl.set_zoom_block(9).is_err());
    ctl.set_zoom_block(2).unwrap();

    ctl.set_refresh_interval(Duration::from_secs(10)).unwrap();
    ctl.start(true).unwrap();
    time::sleep(Duration::from_secs(5)).await;
    let progress = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Progress(_)))
        .count();
    assert_eq!(progress, 1);
}

#[test]
fn locking_respects_configuration_and_lockability() {
    let (mut ctl, _engine, _rx) = session();
    assert!(ctl.set_locked(true));
    assert!(ctl.layers().iter().filter(|l| l.lockable).all(|l| l.locked));
    assert!(!ctl.layers()[3].locked);

    assert!(!ctl.set_layer_locked(3, true).unwrap());
    assert!(ctl.set_layer_locked(1, false).unwrap());
    assert!(!ctl.layers()[1].locked);
    assert!(ctl.set_layer_locked(42, true).is_err());

    let config = SessionConfig {
        disable_locking: true,
        ..SessionConfig::default()
    };
    let (mut ctl, _engine, _rx) = session_with(config);
    assert!(!ctl.set_locked(true));
    assert!(!ctl.set_layer_locked(1, true).unwrap());
    assert!(ctl.layers().iter().all(|l| !l.locked));
}

#[test]
fn weights_errors_name_the_path() {
    let (ctl, engine, _rx) = session();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.bin");

    let err = ctl.load_weights(&path).unwrap_err();
    assert!(matches!(err, WorkbenchErr::Io(_)));
    assert!(err.to_string().contains("missing.bin"));

    ctl.save_weights(&path).unwrap();
    ctl.load_weights(&path).unwrap();
    ctl.save_layer_weights(&path, 1).unwrap();
    assert!(ctl.save_layer_weights(&path, 99).is_err());

    ctl.reset_weights(Some(2)).unwrap();
    ctl.reset_weights(None).unwrap();
    assert_eq!(engine.reset_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_and_forgets_the_model() {
    let (mut ctl, engine, _rx) = session();
    ctl.start(true).unwrap();

    ctl.dispose();
    assert_eq!(ctl.task_state(), TaskState::Stopped);
    assert_eq!(ctl.network_state(), NetworkState::Completed);
    assert!(ctl.model().is_none());
    assert!(engine.model_info().is_none());
    assert!(matches!(ctl.start(true), Err(WorkbenchErr::NoModel)));
}
