use std::sync::Arc;

use convnet_workbench::{
    LayerDescriptor, LayerKind, MockEngine, SessionConfig, SessionController, Snapshot,
    SnapshotRenderer, WorkbenchErr,
    engine::Engine,
    snapshot::BACKGROUND_FILL,
};

fn loaded_session(zoom_block: usize) -> SessionController {
    let engine = Arc::new(MockEngine::new());
    let config = SessionConfig {
        zoom_block,
        ..SessionConfig::default()
    };
    let (mut session, _events) = SessionController::new(engine, config).unwrap();
    session.load_definition("[snapshots]").unwrap();
    session.load_dataset().unwrap();
    session
}

fn dims(snapshot: &Snapshot) -> Option<(usize, usize)> {
    snapshot.image().map(|img| (img.width, img.height))
}

#[test]
fn every_layer_kind_follows_its_rule() {
    let session = loaded_session(1);

    let expected = [
        ("input", Some((8, 8))),
        ("conv1", Some((33, 7))),
        ("bn1", Some((8, 5))),
        ("prelu1", Some((8, 4))),
        ("dw2", Some((33, 5))),
        ("pw2", Some((16, 8))),
        ("gap", None),
        ("fc", Some((3, 19))),
        ("cost_class", None),
        ("fc_coarse", Some((2, 19))),
        ("cost_coarse", None),
    ];

    for (layer, (name, size)) in session.layers().iter().zip(expected) {
        assert_eq!(layer.name, name);
        let snapshot = session.layer_snapshot(layer.index).unwrap();
        assert_eq!(dims(&snapshot), size, "layer {name}");

        if let Some(img) = snapshot.image() {
            assert_eq!(img.pixels.len(), img.width * img.height * 4);
            assert!(img.pixels.chunks_exact(4).all(|px| px[3] == 255));
        }
    }
}

#[test]
fn gray_mosaics_replicate_the_raw_byte() {
    let session = loaded_session(1);
    let snapshot = session.layer_snapshot(2).unwrap();
    let img = snapshot.image().unwrap();

    assert!(
        img.pixels
            .chunks_exact(4)
            .all(|px| px[0] == px[1] && px[1] == px[2])
    );
}

#[test]
fn color_input_uses_three_planes() {
    let session = loaded_session(3);
    let snapshot = session.input_snapshot().unwrap();
    let img = snapshot.image().unwrap();

    assert_eq!((img.width, img.height), (8, 8));
    assert_eq!((img.display_width(), img.display_height()), (24, 24));
    assert_eq!(img.labels.len(), 2);
    assert!(img.pixels.chunks_exact(4).any(|px| px[0] != px[1]));
}

#[test]
fn zoom_changes_display_size_only() {
    let small = loaded_session(1).layer_snapshot(1).unwrap();
    let large = loaded_session(8).layer_snapshot(1).unwrap();
    let (small, large) = (small.image().unwrap(), large.image().unwrap());

    assert_eq!(small.pixels, large.pixels);
    assert_eq!(large.display_width(), small.width * 8);
    assert_eq!(large.display_height(), small.height * 8);
}

#[test]
fn layer_without_parameters_is_not_renderable() {
    let engine = MockEngine::new();
    engine.load_definition("[bare]").unwrap();
    let model = engine.model_info().unwrap();

    let layer = LayerDescriptor {
        channels_in: 16,
        channels_out: 32,
        kernel_h: 3,
        kernel_w: 3,
        ..LayerDescriptor::new(4, "empty", LayerKind::Convolution)
    };
    assert_eq!(layer.weight_count, 0);
    assert_eq!(layer.bias_count, 0);

    let renderer = SnapshotRenderer::new(&engine, 1);
    assert_eq!(
        renderer.render_layer(&layer, &model, BACKGROUND_FILL),
        Snapshot::NotRenderable
    );
}

#[test]
fn engine_refusal_is_not_renderable() {
    let engine = MockEngine::new();
    engine.load_definition("[refusal]").unwrap();
    let model = engine.model_info().unwrap();

    let ghost = LayerDescriptor {
        weight_count: 8,
        ..LayerDescriptor::new(99, "ghost", LayerKind::PRelu)
    };
    let renderer = SnapshotRenderer::new(&engine, 1);
    assert!(!renderer.render_layer(&ghost, &model, 0).is_renderable());
}

#[test]
fn snapshots_need_a_model() {
    let engine = Arc::new(MockEngine::new());
    let (session, _events) = SessionController::new(engine, SessionConfig::default()).unwrap();

    assert!(matches!(session.input_snapshot(), Err(WorkbenchErr::NoModel)));
    assert!(matches!(session.layer_snapshot(0), Err(WorkbenchErr::NoModel)));
}
