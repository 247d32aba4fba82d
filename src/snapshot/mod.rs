//! Renders engine buffers into RGBA pixel mosaics.
//!
//! Every render call copies a bounded buffer out of the engine, expands it and
//! drops it. Nothing is cached: the selected layer, and with it the geometry, may
//! differ on the next call.

use log::{debug, warn};

use crate::{
    engine::{Engine, ModelInfo},
    layout::{Geometry, LayerDescriptor, LayerKind, RGBA, RenderRule},
};

pub const MIN_ZOOM_BLOCK: usize = 1;
pub const MAX_ZOOM_BLOCK: usize = 8;

/// Intensity the engine paints between mosaic tiles.
pub const BACKGROUND_FILL: u8 = 255;

const OPAQUE: u8 = 255;

/// How raw input values map back to pixel intensities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// The dataset was normalized with per-channel mean and standard deviation.
    MeanStd { mean: [f32; 3], std_dev: [f32; 3] },
    /// Values were scaled to roughly `[-2, 2]`.
    Fixed,
}

impl Normalization {
    pub fn from_model(model: &ModelInfo) -> Self {
        if model.mean_std_normalization {
            Self::MeanStd {
                mean: model.mean,
                std_dev: model.std_dev,
            }
        } else {
            Self::Fixed
        }
    }

    /// Reconstructs the pixel intensity of a raw value of channel `c`.
    #[inline]
    pub fn pixel(&self, raw: f32, c: usize) -> u8 {
        let value = match self {
            Self::MeanStd { mean, std_dev } => raw * std_dev[c] + mean[c],
            Self::Fixed => (raw + 2.0) * 64.0,
        };
        value.clamp(0.0, 255.0) as u8
    }
}

/// A rendered RGBA mosaic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotImage {
    pub width: usize,
    pub height: usize,
    pub zoom_block: usize,
    /// Interleaved RGBA bytes, `width * 4` per row.
    pub pixels: Vec<u8>,
    /// Labels of the rendered sample, empty for layer mosaics.
    pub labels: Vec<usize>,
}

impl SnapshotImage {
    pub fn stride(&self) -> usize {
        self.width * RGBA
    }

    pub fn display_width(&self) -> usize {
        self.width * self.zoom_block
    }

    pub fn display_height(&self) -> usize {
        self.height * self.zoom_block
    }
}

/// The result of a render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Image(SnapshotImage),
    NotRenderable,
}

impl Snapshot {
    pub fn image(&self) -> Option<&SnapshotImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::NotRenderable => None,
        }
    }

    pub fn is_renderable(&self) -> bool {
        matches!(self, Self::Image(_))
    }
}

/// Renders input samples and layer weights fetched from an engine.
pub struct SnapshotRenderer<'a> {
    engine: &'a dyn Engine,
    zoom_block: usize,
}

impl<'a> SnapshotRenderer<'a> {
    /// Creates a new `SnapshotRenderer`.
    ///
    /// # Args
    /// * `engine` - The engine to copy buffers from.
    /// * `zoom_block` - Display scale, clamped to `1..=8`.
    ///
    /// # Returns
    /// A new renderer.
    pub fn new(engine: &'a dyn Engine, zoom_block: usize) -> Self {
        Self {
            engine,
            zoom_block: zoom_block.clamp(MIN_ZOOM_BLOCK, MAX_ZOOM_BLOCK),
        }
    }

    /// Renders the engine's current input sample.
    ///
    /// # Args
    /// * `model` - The loaded model, for the input shape and normalization.
    ///
    /// # Returns
    /// The rendered sample or `Snapshot::NotRenderable`.
    pub fn render_input(&self, model: &ModelInfo) -> Snapshot {
        let Some(geometry) = RenderRule::input(model.input).geometry() else {
            warn!("input shape {:?} is not renderable", model.input);
            return Snapshot::NotRenderable;
        };

        let mut raw = vec![0.0f32; geometry.source_len];
        let mut labels = vec![0usize; model.label_names.len().max(1)];
        if !self.engine.input_snapshot(&mut raw, &mut labels) {
            debug!("engine has no input sample available");
            return Snapshot::NotRenderable;
        }

        let pixels = expand_planar_f32(&raw, &geometry, Normalization::from_model(model));
        Snapshot::Image(self.image(geometry, pixels, labels))
    }

    /// Renders the parameters of a layer.
    ///
    /// Input layers render the current sample instead.
    ///
    /// # Args
    /// * `layer` - The layer to render.
    /// * `model` - The loaded model.
    /// * `fill` - Background intensity the engine uses between mosaic tiles.
    ///
    /// # Returns
    /// The rendered mosaic or `Snapshot::NotRenderable`.
    pub fn render_layer(&self, layer: &LayerDescriptor, model: &ModelInfo, fill: u8) -> Snapshot {
        if layer.kind == LayerKind::Input {
            return self.render_input(model);
        }

        let Some(geometry) = RenderRule::for_layer(layer).and_then(|rule| rule.geometry()) else {
            debug!("layer {} ({:?}) is not renderable", layer.index, layer.kind);
            return Snapshot::NotRenderable;
        };

        let mut raw = vec![fill; geometry.source_len];
        if !self.engine.layer_image(layer.index, fill, &mut raw) {
            warn!("engine refused the image of layer {}", layer.index);
            return Snapshot::NotRenderable;
        }

        let pixels = expand_planar_u8(&raw, &geometry);
        Snapshot::Image(self.image(geometry, pixels, Vec::new()))
    }

    fn image(&self, geometry: Geometry, pixels: Vec<u8>, labels: Vec<usize>) -> SnapshotImage {
        SnapshotImage {
            width: geometry.width,
            height: geometry.height,
            zoom_block: self.zoom_block,
            pixels,
            labels,
        }
    }
}

/// Expands a channel-planar float buffer into interleaved RGBA.
///
/// Single-channel sources are replicated across R, G and B. Only the first
/// `area` values of each plane are read.
pub fn expand_planar_f32(src: &[f32], geometry: &Geometry, norm: Normalization) -> Vec<u8> {
    let area = geometry.area();
    let mut dest = vec![OPAQUE; geometry.output_len()];

    for (hw, px) in dest.chunks_exact_mut(RGBA).enumerate() {
        if geometry.color {
            for c in 0..3 {
                px[c] = norm.pixel(src[hw + c * area], c);
            }
        } else {
            let v = norm.pixel(src[hw], 0);
            px[..3].fill(v);
        }
    }

    dest
}

/// Expands a channel-planar byte buffer into interleaved RGBA.
pub fn expand_planar_u8(src: &[u8], geometry: &Geometry) -> Vec<u8> {
    let area = geometry.area();
    let mut dest = vec![OPAQUE; geometry.output_len()];

    for (hw, px) in dest.chunks_exact_mut(RGBA).enumerate() {
        if geometry.color {
            px[0] = src[hw];
            px[1] = src[hw + area];
            px[2] = src[hw + 2 * area];
        } else {
            px[..3].fill(src[hw]);
        }
    }

    dest
}
