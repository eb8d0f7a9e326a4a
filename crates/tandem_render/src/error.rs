use std::path::PathBuf;
use tandem_asset::AssetError;
use thiserror::Error;

/// Fatal renderer errors. Stale surfaces and unfinished queries are not
/// errors; they come back as outcome values.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(String),

    #[error("{call} failed: {reason}")]
    Gpu { call: &'static str, reason: String },

    #[error("no GPU satisfies the renderer requirements: {0}")]
    NoSuitableDevice(String),

    #[error("required capability missing: {0}")]
    MissingCapability(String),

    #[error("failed to read shader '{path}': {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window handle unavailable: {0}")]
    Window(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("stage '{found}' recorded out of order (expected '{expected}')")]
    StageOrder {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid renderer state: {0}")]
    InvalidState(String),
}
