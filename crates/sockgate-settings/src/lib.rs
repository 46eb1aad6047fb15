//! # sockgate-settings
//!
//! Configuration for the sockgate gateway, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`SockgateSettings::default()`]
//! 2. **User file**: `~/.sockgate/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `SOCKGATE_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
