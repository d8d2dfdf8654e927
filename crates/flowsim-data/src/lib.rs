//! File-backed persistence for flowsim: layout loading in RON, JSON or TOML,
//! and JSON-lines output of tick reports and telemetry.

pub mod loader;
pub mod store;

pub use loader::{DataLoadError, Format, load_layout};
pub use store::FileStore;
