//! Configuration loading and validation for the autodelete workspace.
//!
//! Config files: `autodelete.toml`, `autodelete.yaml`, or `autodelete.json`
//! Searched in `./` then `~/.config/autodelete/`.

pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config},
    schema::{AutodeleteConfig, ReaperConfig, RetentionTuning, StorageConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
