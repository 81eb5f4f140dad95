//! # roomcast-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RoomcastSettings::default()`]
//! 2. **User file**: `~/.roomcast/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROOMCAST_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = RoomcastSettings::default();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.path, "/socket.io");
        assert_eq!(settings.transport.path, "/socket.io");
        assert_eq!(settings.transport.reconnect.reconnection_attempts, 10);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn settings_path_is_under_home_dir() {
        let path = settings_path();
        assert!(path.ends_with(".roomcast/settings.json"));
    }

    #[test]
    fn each_load_is_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, r#"{"server": {"port": 4100}}"#).unwrap();
        std::fs::write(&b, r#"{"server": {"port": 4200}}"#).unwrap();

        let first = load_settings_from_path(&a).unwrap();
        let second = load_settings_from_path(&b).unwrap();
        assert_eq!(first.server.port, 4100);
        assert_eq!(second.server.port, 4200);
    }
}
