//! # freqdash-settings
//!
//! Configuration for the dashboard sync layer, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`DashSettings::default()`]
//! 2. **Settings file**: `~/.freqdash/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FREQDASH_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
