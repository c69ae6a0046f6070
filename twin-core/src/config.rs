//! # Configuration
//!
//! TwinRS keeps a minimal, framework-agnostic configuration system:
//! a string key/value store plus a cloneable snapshot with typed
//! getters. Typed option structs (engine, auth) layer on top of this
//! and on environment variables; the env names in `twin-engine` and
//! `twin-auth` are the stable contracts.
//!
//! Higher-level loaders (TOML, Consul, Vault, ...) are intentionally
//! kept out of the core so each application remains free to choose its
//! own configuration strategy.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TwinConfig {
    values: HashMap<String, String>,
}

impl TwinConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Load every environment variable carrying the given prefix.
    ///
    /// `TWIN__SERVER__PORT=8080` becomes `server.port` under prefix
    /// `TWIN__`.
    pub fn from_env(prefix: &str) -> Self {
        let mut config = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                config.set(normalized, value);
            }
        }
        config
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn snapshot(&self) -> TwinConfigSnapshot {
        TwinConfigSnapshot::new(self.values.clone())
    }
}

/// An immutable, cloneable view over the config store, handed to
/// components and request handlers.
#[derive(Debug, Clone, Default)]
pub struct TwinConfigSnapshot {
    map: HashMap<String, String>,
}

impl TwinConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get(key).and_then(|v| v.parse::<u16>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }

    /// Seconds-valued keys become Durations.
    pub fn get_duration_secs(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Truthiness for env flags: "1", "true", "yes", "on" (any case).
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut config = TwinConfig::new();
        config.set("server.port", "8080");
        assert_eq!(config.get("server.port"), Some("8080"));
        assert!(!config.has("server.host"));
    }

    #[test]
    fn snapshot_typed_getters() {
        let mut config = TwinConfig::new();
        config.set("server.port", "8080");
        config.set("compression", "true");
        config.set("shutdown.secs", "30");

        let snap = config.snapshot();
        assert_eq!(snap.get_u16("server.port"), Some(8080));
        assert_eq!(snap.get_bool("compression"), Some(true));
        assert_eq!(
            snap.get_duration_secs("shutdown.secs"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(snap.get_usize("missing"), None);
    }
}
