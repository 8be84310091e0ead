//! Durable conversation memory over SQLite.

mod sqlite;

pub use sqlite::SqliteMemoryStore;

/// Setting keys persisted in the `settings` table.
pub const SETTING_AUTO_CAPTURE: &str = "auto_capture_enabled";
pub const SETTING_CAPTURE_INTERVAL_SECS: &str = "capture_interval_secs";
pub const SETTING_CAPTURE_QUALITY: &str = "capture_quality";
pub const SETTING_MAX_MEMORY_ENTRIES: &str = "max_memory_entries";

/// Seeded defaults for the settings table; written once, then owned by the
/// settings panel.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (SETTING_AUTO_CAPTURE, "true"),
    (SETTING_CAPTURE_INTERVAL_SECS, "15"),
    (SETTING_CAPTURE_QUALITY, "0.7"),
    (SETTING_MAX_MEMORY_ENTRIES, "1000"),
];

use tracing::warn;

use crate::traits::MemoryStore;

/// Read a boolean setting, treating "true" and "1" as on. A missing key,
/// an unreadable store, or junk falls back to `default`.
pub async fn bool_setting(store: &dyn MemoryStore, key: &str, default: bool) -> bool {
    match store.get_setting(key).await {
        Ok(Some(value)) => value == "true" || value == "1",
        Ok(None) => default,
        Err(e) => {
            warn!(key, "cannot read setting: {}", e);
            default
        }
    }
}

/// Read a numeric setting with the same fallback rules as [`bool_setting`].
pub async fn u64_setting(store: &dyn MemoryStore, key: &str, default: u64) -> u64 {
    match store.get_setting(key).await {
        Ok(Some(value)) => value.parse().unwrap_or(default),
        Ok(None) => default,
        Err(e) => {
            warn!(key, "cannot read setting: {}", e);
            default
        }
    }
}
