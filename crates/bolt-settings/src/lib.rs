//! # bolt-settings
//!
//! Process settings loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BoltSettings::default()`]
//! 2. **User file**: `~/.bolt/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BOLT_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{BoltSettings, BridgeSettings, LoggingSettings, SupervisorSettings};
