use std::{sync::Arc, time::Duration};

use tokio::time;
use tokio_test::{assert_err, assert_ok, assert_pending, task};

use convnet_workbench::{
    CostHeadResult, MockEngine, RateSegment, SessionConfig, SessionController, SessionEvent,
    SessionMonitor, TaskState,
    engine::{MockOp, NetworkState},
    schedule::BatchGeometry,
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

fn session(epochs: usize) -> (SessionController, Arc<MockEngine>, SessionMonitor) {
    let engine = Arc::new(MockEngine::with_samples(500, 100, 250));
    let (mut session, events) = SessionController::new(engine.clone(), SessionConfig::default())
        .expect("default config is valid");

    session.load_definition("[scenario]").unwrap();
    session.load_dataset().unwrap();
    session.schedule_mut().flat(segment(epochs), true, 1).unwrap();
    (session, engine, SessionMonitor::new(events))
}

async fn run_to_completion(monitor: &mut SessionMonitor) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = time::timeout(Duration::from_secs(300), monitor.next())
            .await
            .expect("run timed out")
            .expect("event channel closed");

        let done = matches!(event, SessionEvent::Completed { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

fn epoch_results(events: &[SessionEvent]) -> Vec<(usize, Vec<CostHeadResult>)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::EpochCompleted { epoch, results, .. } => Some((*epoch, results.clone())),
            _ => None,
        })
        .collect()
}

fn assert_accuracy_complements_error(r: &CostHeadResult) {
    assert!((r.test_accuracy - (100.0 - r.test_error_percentage)).abs() < 1e-4);
    assert!((r.train_accuracy - (100.0 - r.train_error_percentage)).abs() < 1e-4);
}

#[tokio::test(start_paused = true)]
async fn single_epoch_run_reports_consistent_cost_heads() {
    let (mut session, _engine, mut monitor) = session(1);
    assert_ok!(session.start(true));

    let events = run_to_completion(&mut monitor).await;
    let epochs = epoch_results(&events);
    assert_eq!(epochs.len(), 1);
    assert_eq!(epochs[0].0, 1);

    for r in &epochs[0].1 {
        assert_accuracy_complements_error(r);
    }
    for r in &session.cost_results() {
        assert_accuracy_complements_error(r);
    }

    assert_eq!(session.task_state(), TaskState::Stopped);
    assert_eq!(monitor.view().task, TaskState::Stopped);
    assert!(monitor.view().completed);
}

#[tokio::test(start_paused = true)]
async fn train_errors_never_decrease_within_a_run() {
    let (mut session, _engine, mut monitor) = session(4);
    assert_ok!(session.start(true));

    let events = run_to_completion(&mut monitor).await;
    let epochs = epoch_results(&events);
    assert_eq!(epochs.iter().map(|(e, _)| *e).collect::<Vec<_>>(), [1, 2, 3, 4]);

    let errors: Vec<usize> = epochs.iter().map(|(_, r)| r[0].train_errors).collect();
    assert!(errors.windows(2).all(|w| w[0] <= w[1]), "{errors:?}");
    assert!(epochs.iter().flat_map(|(_, r)| r).all(|r| {
        (r.test_accuracy - (100.0 - r.test_error_percentage)).abs() < 1e-4
    }));

    // every head is refreshed, not only the displayed one
    assert!(epochs.iter().all(|(_, r)| r.len() == 2));
}

#[tokio::test(start_paused = true)]
async fn progress_fraction_is_monotonic_within_a_phase() {
    let (mut session, _engine, mut monitor) = session(2);
    assert_ok!(session.start(true));

    let events = run_to_completion(&mut monitor).await;
    let mut last: Option<(usize, NetworkState, f32)> = None;
    for event in &events {
        let SessionEvent::Progress(p) = event else {
            continue;
        };
        let p = p.progress();
        assert!((0.0..=1.0).contains(&p.fraction));
        assert_eq!(p.samples % p.counters.batch_size.max(1), 0);

        if let Some((epoch, state, fraction)) = last {
            if epoch == p.counters.epoch && state == p.counters.state {
                assert!(p.fraction >= fraction);
            }
        }
        last = Some((p.counters.epoch, p.counters.state, p.fraction));
    }
}

#[tokio::test(start_paused = true)]
async fn monitor_waits_while_paused() {
    let (mut session, _engine, mut monitor) = session(3);
    assert_ok!(session.start(true));
    time::sleep(Duration::from_millis(1500)).await;
    assert_ok!(session.pause());
    monitor.tick();
    assert_eq!(monitor.view().task, TaskState::Paused);

    let mut next = task::spawn(monitor.next());
    assert_pending!(next.poll());
    drop(next);

    assert_ok!(session.resume());
    let events = run_to_completion(&mut monitor).await;
    assert_eq!(epoch_results(&events).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn engine_fault_mid_run_leaves_session_stopped() {
    let (mut session, engine, mut monitor) = session(3);
    assert_ok!(session.start(true));
    time::sleep(Duration::from_millis(500)).await;

    engine.fail_on(MockOp::Pause);
    assert_err!(session.pause());
    monitor.tick();
    assert_eq!(monitor.view().task, TaskState::Stopped);
    assert_eq!(session.network_state(), NetworkState::Completed);
    assert!(!engine.is_running());

    engine.clear_failures();
    assert_ok!(session.start(true));
    let events = run_to_completion(&mut monitor).await;
    assert_eq!(epoch_results(&events).len(), 3);
}
