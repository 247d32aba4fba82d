use std::{error::Error, fmt, io};

use crate::engine::{DefinitionError, EngineErr};

/// The result type used across the workbench core.
pub type Result<T> = std::result::Result<T, WorkbenchErr>;

/// All errors that can occur in the workbench core.
///
/// Calls made from a disallowed session state are not errors, they are
/// reported as `Ok(false)` by the controller. Geometry that cannot be rendered
/// is reported as `Snapshot::NotRenderable`.
#[derive(Debug)]
pub enum WorkbenchErr {
    /// The engine rejected a network definition.
    Definition(DefinitionError),
    /// A weights or log file could not be read or written.
    Io(io::Error),
    /// A gateway call failed.
    Engine(EngineErr),
    /// A rate schedule or strategy list failed validation, caught before submission.
    InvalidSchedule(String),
    /// The session configuration is out of range.
    InvalidConfig(String),
    /// The operation needs a loaded model.
    NoModel,
    /// A layer index past the end of the loaded model.
    LayerOutOfRange { index: usize, count: usize },
    /// The training log could not be encoded or decoded.
    Log(csv::Error),
}

impl fmt::Display for WorkbenchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Definition(e) => write!(f, "definition error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Engine(e) => write!(f, "engine error: {e}"),
            Self::InvalidSchedule(msg) => write!(f, "invalid schedule: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::NoModel => write!(f, "no model definition has been loaded"),
            Self::LayerOutOfRange { index, count } => {
                write!(f, "layer {index} out of range, model has {count} layers")
            }
            Self::Log(e) => write!(f, "training log error: {e}"),
        }
    }
}

impl Error for WorkbenchErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Definition(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::Log(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkbenchErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EngineErr> for WorkbenchErr {
    fn from(e: EngineErr) -> Self {
        Self::Engine(e)
    }
}

impl From<DefinitionError> for WorkbenchErr {
    fn from(e: DefinitionError) -> Self {
        Self::Definition(e)
    }
}

impl From<csv::Error> for WorkbenchErr {
    fn from(e: csv::Error) -> Self {
        Self::Log(e)
    }
}

impl From<serde_json::Error> for WorkbenchErr {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}
