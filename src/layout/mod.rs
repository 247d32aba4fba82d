//! Pixel geometry of layer snapshots.
//!
//! Pure functions only: a [`LayerDescriptor`] (or the model's input shape) maps to a
//! [`RenderRule`], and the rule maps to the [`Geometry`] of the mosaic the engine
//! fills and the renderer expands to RGBA.

use crate::engine::InputShape;

/// Largest buffer, in bytes, the platform can allocate.
pub const MAX_BUFFER_SIZE: usize = isize::MAX as usize;

/// Bytes per output pixel.
pub const RGBA: usize = 4;

/// The kind of a layer as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Input,
    Convolution,
    ConvolutionTranspose,
    DepthwiseConvolution,
    PartialDepthwiseConvolution,
    BatchNorm,
    Dense,
    GroupNorm,
    LayerNorm,
    PRelu,
    Activation,
    Add,
    Concat,
    Dropout,
    AvgPooling,
    MaxPooling,
    GlobalAvgPooling,
    Cost,
}

impl LayerKind {
    pub fn is_depthwise(self) -> bool {
        matches!(
            self,
            Self::DepthwiseConvolution | Self::PartialDepthwiseConvolution
        )
    }

    pub fn is_convolution(self) -> bool {
        matches!(
            self,
            Self::Convolution
                | Self::ConvolutionTranspose
                | Self::DepthwiseConvolution
                | Self::PartialDepthwiseConvolution
        )
    }

    pub fn is_norm_family(self) -> bool {
        matches!(
            self,
            Self::BatchNorm | Self::Dense | Self::GroupNorm | Self::LayerNorm
        )
    }
}

/// Immutable description of one loaded layer. Only `locked` changes after load.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    pub index: usize,
    pub name: String,
    pub kind: LayerKind,
    pub channels_in: usize,
    pub channels_out: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub groups: usize,
    pub multiplier: usize,
    pub has_bias: bool,
    pub is_norm_layer: bool,
    pub scaling_enabled: bool,
    pub lockable: bool,
    pub locked: bool,
    pub weight_count: usize,
    pub bias_count: usize,
    pub inputs: Vec<String>,
}

impl LayerDescriptor {
    /// Creates a descriptor of the given kind with every count zeroed.
    ///
    /// # Args
    /// * `index` - The layer's position in the model.
    /// * `name` - The layer's name in the definition.
    /// * `kind` - The layer's kind.
    ///
    /// # Returns
    /// A new descriptor, to be completed with struct update syntax.
    pub fn new(index: usize, name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            channels_in: 0,
            channels_out: 0,
            kernel_h: 0,
            kernel_w: 0,
            groups: 1,
            multiplier: 1,
            has_bias: false,
            is_norm_layer: kind.is_norm_family() && kind != LayerKind::Dense,
            scaling_enabled: false,
            lockable: false,
            locked: false,
            weight_count: 0,
            bias_count: 0,
            inputs: Vec::new(),
        }
    }
}

/// Computed pixel geometry of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    /// Whether the source holds three color planes.
    pub color: bool,
    /// Number of source elements the engine writes.
    pub source_len: usize,
}

impl Geometry {
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Row stride of the RGBA output, in bytes.
    pub fn stride(&self) -> usize {
        self.width * RGBA
    }

    /// Size of the RGBA output, in bytes.
    pub fn output_len(&self) -> usize {
        self.area() * RGBA
    }

    /// Builds a geometry, rejecting empty or unaddressable buffers.
    fn checked(width: usize, height: usize, color: bool, source_len: Option<usize>) -> Option<Self> {
        let area = width.checked_mul(height)?;
        let output_len = area.checked_mul(RGBA)?;
        let source_len = source_len?;

        if area == 0 || source_len == 0 || output_len > MAX_BUFFER_SIZE || source_len > MAX_BUFFER_SIZE {
            return None;
        }

        Some(Self {
            width,
            height,
            color,
            source_len,
        })
    }
}

/// One rendering rule per renderable layer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRule {
    /// A planar input sample.
    Input { shape: InputShape },
    /// A convolution-family weight mosaic.
    Weights {
        depthwise: bool,
        channels_in: usize,
        channels_out: usize,
        kernel_h: usize,
        kernel_w: usize,
        groups: usize,
    },
    /// Scale and shift parameters of a norm or dense layer.
    Norm { weight_count: usize, bias_count: usize },
    /// Per-channel slopes of a PRelu layer.
    PRelu { weight_count: usize },
}

impl RenderRule {
    /// Selects the rule for a layer, if its kind has one.
    ///
    /// Input layers are rendered from the model's input shape, see
    /// [`RenderRule::input`]. Layers without weights and biases have no rule.
    pub fn for_layer(layer: &LayerDescriptor) -> Option<Self> {
        if layer.kind != LayerKind::Input && layer.weight_count == 0 && layer.bias_count == 0 {
            return None;
        }

        match layer.kind {
            kind if kind.is_convolution() => Some(Self::Weights {
                depthwise: kind.is_depthwise(),
                channels_in: layer.channels_in,
                channels_out: layer.channels_out,
                kernel_h: layer.kernel_h,
                kernel_w: layer.kernel_w,
                groups: layer.groups,
            }),
            kind if kind.is_norm_family() && layer.bias_count > 0 => Some(Self::Norm {
                weight_count: layer.weight_count,
                bias_count: layer.bias_count,
            }),
            LayerKind::PRelu => Some(Self::PRelu {
                weight_count: layer.weight_count,
            }),
            _ => None,
        }
    }

    pub fn input(shape: InputShape) -> Self {
        Self::Input { shape }
    }

    /// Computes the geometry of this rule, or `None` when it is not renderable.
    pub fn geometry(&self) -> Option<Geometry> {
        match *self {
            Self::Input { shape } => input_geometry(shape),
            Self::Weights {
                depthwise,
                channels_in,
                channels_out,
                kernel_h,
                kernel_w,
                groups,
            } => weights_geometry(depthwise, channels_in, channels_out, kernel_h, kernel_w, groups),
            Self::Norm {
                weight_count,
                bias_count,
            } => {
                let width = bias_count;
                let height = weight_count.checked_div(width)?.checked_add(3)?;
                Geometry::checked(width, height, false, width.checked_mul(height))
            }
            Self::PRelu { weight_count } => {
                Geometry::checked(weight_count, 4, false, weight_count.checked_mul(4))
            }
        }
    }
}

fn input_geometry(shape: InputShape) -> Option<Geometry> {
    let InputShape {
        channels,
        height,
        width,
    } = shape;
    let color = channels == 3;
    let area = width.checked_mul(height)?;

    // single-channel samples carry one extra row in the engine's buffer
    let source_len = if color {
        area.checked_mul(3)
    } else {
        area.checked_add(width)
    };

    Geometry::checked(width, height, color, source_len)
}

fn weights_geometry(
    depthwise: bool,
    channels_in: usize,
    channels_out: usize,
    kernel_h: usize,
    kernel_w: usize,
    groups: usize,
) -> Option<Geometry> {
    if groups == 0 {
        return None;
    }

    let color = !depthwise && channels_in == 3;
    let border = if channels_in != 3 && kernel_h == 1 && kernel_w == 1 {
        0
    } else {
        1
    };
    let pitch_h = kernel_h.checked_add(border)?;
    let pitch_w = kernel_w.checked_add(border)?;

    let width = channels_out.checked_mul(pitch_h)?.checked_add(border)?;
    let height = if channels_in == 3 {
        pitch_w.checked_add(3 * border)?
    } else if depthwise {
        pitch_w.checked_add(border)?
    } else {
        (channels_in / groups).checked_mul(pitch_w)?.checked_add(border)?
    };

    let area = width.checked_mul(height);
    let source_len = if color { area.and_then(|a| a.checked_mul(3)) } else { area };

    Geometry::checked(width, height, color, source_len)
}
