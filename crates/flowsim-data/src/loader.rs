//! Layout file loading with format detection (RON/JSON/TOML).

use flowsim_core::config::EngineConfig;
use flowsim_core::engine::Engine;
use flowsim_core::layout::{LayoutError, NameIndex, PlantLayout};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The layout parsed but does not describe a valid plant.
    #[error("invalid layout in {file}: {source}")]
    Layout {
        file: PathBuf,
        #[source]
        source: LayoutError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `path` is only used for errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Layout loading
// ===========================================================================

/// Parse a plant layout file.
pub fn load_layout(path: &Path) -> Result<PlantLayout, DataLoadError> {
    let layout: PlantLayout = deserialize_file(path)?;
    debug!(
        file = %path.display(),
        steps = layout.process_steps.len(),
        transports = layout.transport_systems.len(),
        "layout parsed"
    );
    Ok(layout)
}

/// Parse a layout file and build an engine from it. The layout's embedded
/// engine table is used unless `config` is given.
pub fn load_engine(
    path: &Path,
    config: Option<EngineConfig>,
) -> Result<(Engine, NameIndex, PlantLayout), DataLoadError> {
    let layout = load_layout(path)?;
    let config = config.or_else(|| layout.engine.clone()).unwrap_or_default();
    let (engine, names) =
        Engine::from_layout(&layout, config).map_err(|source| DataLoadError::Layout {
            file: path.to_path_buf(),
            source,
        })?;
    Ok((engine, names, layout))
}

// ===========================================================================
// Tests
// ===========================================================================
