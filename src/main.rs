use std::{env, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};

use convnet_workbench::{
    CyclicSchedule, MockEngine, RateSegment, SessionConfig, SessionController, SessionEvent,
    SessionMonitor, Snapshot,
    schedule::{BatchGeometry, Optimizer},
};

const DEFINITION: &str = "[mock-resnet]\nType=Input\n";
const LOG_FILE: &str = "training-log.csv";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => SessionConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => SessionConfig::default(),
    };
    let storage_dir = config.storage_dir.clone();

    let engine = Arc::new(MockEngine::with_samples(2000, 400, 500));
    let (mut session, events) = SessionController::new(engine, config)?;
    let mut monitor = SessionMonitor::new(events);

    session.configure()?;
    let model = session.load_definition(DEFINITION)?;
    session.load_dataset()?;

    for layer in session.layers() {
        match session.layer_snapshot(layer.index)? {
            Snapshot::Image(img) => info!(
                "layer {} '{}' ({:?}): {}x{} px, shown at {}x{}",
                layer.index,
                layer.name,
                layer.kind,
                img.width,
                img.height,
                img.display_width(),
                img.display_height()
            ),
            Snapshot::NotRenderable => info!(
                "layer {} '{}' ({:?}): nothing to render",
                layer.index, layer.name, layer.kind
            ),
        }
    }

    let warmup = RateSegment {
        optimizer: Optimizer::SGDMomentum,
        epochs: 1,
        batch: BatchGeometry {
            n: 64,
            ..BatchGeometry::default()
        },
        ..RateSegment::default()
    };
    let restarts = CyclicSchedule::new(
        vec![RateSegment {
            epochs: 1,
            epoch_multiplier: 2,
            ..warmup
        }],
        2,
    );
    session.schedule_mut().flat(warmup, true, 1)?;
    session.schedule_mut().cyclic(restarts, false)?;
    session.set_refresh_interval(Duration::from_secs(1))?;

    info!(
        "training '{}' on '{}' for {} epoch(s)",
        model.name,
        model.dataset,
        session.schedule().schedule().total_epochs()
    );
    session.start(true)?;

    while let Some(event) = monitor.next().await {
        match event {
            SessionEvent::Progress(p) => {
                let p = p.progress();
                info!(
                    "epoch {}/{} {:?} {:.0}% ({:.0} samples/s)",
                    p.counters.epoch,
                    p.counters.total_epochs,
                    p.counters.state,
                    p.fraction * 100.0,
                    p.sample_rate
                );
            }
            SessionEvent::EpochCompleted { .. } => {
                if let Some(line) = monitor.view().logs.last() {
                    info!("{}", line.message);
                }
            }
            SessionEvent::Completed { confusion, .. } => {
                match confusion {
                    Some(cm) => info!("test accuracy {:.2}% over {} samples", cm.accuracy(), cm.total()),
                    None => warn!("no confusion matrix available"),
                }
                break;
            }
            SessionEvent::StateChanged(_) => {}
        }
    }

    let log_path = storage_dir.join(LOG_FILE);
    session.write_training_log(&log_path)?;
    session.save_weights(storage_dir.join("weights.bin"))?;
    session.dispose();

    info!("done, training log at {}", log_path.display());
    Ok(())
}
