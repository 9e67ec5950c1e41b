//! # herald-settings
//!
//! Static configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `~/.herald/settings.json` or `--config` (deep-merged)
//! 3. **Environment variables**: `HERALD_*` overrides (highest priority)
//!
//! Settings are read once at process start into an immutable value that is
//! passed explicitly to the pipeline. There is no global instance and no
//! hot reload: a new routing table needs a new process generation.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, herald_home, load_settings, load_settings_from_path, resolve_path, settings_path,
};
pub use types::*;
