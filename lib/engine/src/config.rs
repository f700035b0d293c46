//! Hierarchical configuration loaded from `config.json`, deep-filled with
//! defaults, and persisted atomically with a `.bu` backup copy.
//!
//! Mirrors the reference implementation's `CONFIG`/`CONFIG_DIR`/
//! `IN_NODE_TEST` module globals, but as an explicit value type owned by a
//! [`crate::runtime::Runtime`] instead of process-wide state.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Advisory worker-manager connection info, consumed externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerManagerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WorkerManagerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9380,
        }
    }
}

/// Advisory frontend connection info, consumed externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendConfig {
    pub host: String,
    pub port: u16,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
        }
    }
}

/// The engine's persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub env_dir: String,
    pub worker_manager: WorkerManagerConfig,
    pub frontend: FrontendConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_config_dir: Option<String>,
    /// Keys this crate doesn't interpret but preserves verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl Configuration {
    /// The built-in defaults, rooted under `base_dir`.
    #[must_use]
    pub fn defaults(base_dir: &Path) -> Self {
        Self {
            env_dir: base_dir.join("env").to_string_lossy().into_owned(),
            worker_manager: WorkerManagerConfig::default(),
            frontend: FrontendConfig::default(),
            custom_config_dir: None,
            extra: serde_json::Map::new(),
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".bu");
    PathBuf::from(os_string)
}

/// Returns the default base config directory: `$FUNCNODES_CONFIG_DIR`, or
/// `~/.funcnodes`.
#[must_use]
pub fn base_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FUNCNODES_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".funcnodes")
}

/// Deep-fills `config`: keys present in `defaults` but missing in `config`
/// are copied over; keys already present in `config` are left untouched.
/// This is intentionally a fill, not a merge that prefers defaults.
fn deep_fill(config: &mut JsonValue, defaults: &JsonValue) {
    let (JsonValue::Object(config_map), JsonValue::Object(default_map)) = (config, defaults)
    else {
        return;
    };
    for (key, default_value) in default_map {
        match config_map.get_mut(key) {
            Some(existing) => deep_fill(existing, default_value),
            None => {
                config_map.insert(key.clone(), default_value.clone());
            }
        }
    }
}

/// Atomically writes `config` to `path`, then writes an identical `.bu`
/// backup copy.
fn write_config_secure(path: &Path, config: &Configuration) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    std::fs::write(backup_path(path), &json)?;
    Ok(())
}

fn read_json_file(path: &Path) -> Option<JsonValue> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Loads, deep-fills, and re-persists the configuration file at
/// `dir/config.json`. Falls back to the `.bu` backup on parse failure, then
/// to built-in defaults, always logging the degradation.
pub fn load_config(dir: &Path) -> Configuration {
    let path = dir.join("config.json");
    let defaults = serde_json::to_value(Configuration::defaults(dir)).expect("defaults serialize");

    let mut loaded = read_json_file(&path).unwrap_or_else(|| {
        let bu = backup_path(&path);
        read_json_file(&bu).unwrap_or_else(|| {
            warn!(path = %path.display(), "config unreadable, falling back to defaults");
            defaults.clone()
        })
    });

    deep_fill(&mut loaded, &defaults);
    let config: Configuration = serde_json::from_value(loaded).unwrap_or_else(|err| {
        warn!(%err, "config did not match expected shape, using defaults");
        Configuration::defaults(dir)
    });

    if let Err(err) = write_config_secure(&path, &config) {
        warn!(%err, path = %path.display(), "failed to persist config");
    }

    config
}

/// Rebases the config directory under the OS temp dir for the duration of a
/// test process, clearing any pre-existing directory first.
#[must_use]
pub fn test_config_dir(add_pid: bool) -> PathBuf {
    let mut name = "funcnodes_test".to_string();
    if add_pid {
        name.push('_');
        name.push_str(&std::process::id().to_string());
    }
    let dir = std::env::temp_dir().join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_fill_preserves_present_keys() {
        let mut config = serde_json::json!({ "env_dir": "/custom" });
        let defaults = serde_json::json!({ "env_dir": "/default", "frontend": { "port": 8000 } });
        deep_fill(&mut config, &defaults);
        assert_eq!(config["env_dir"], "/custom");
        assert_eq!(config["frontend"]["port"], 8000);
    }

    #[test]
    fn load_missing_config_falls_back_to_defaults_and_persists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = load_config(tmp.path());
        assert_eq!(config.frontend.port, 8000);
        assert!(tmp.path().join("config.json").exists());
        assert!(tmp.path().join("config.json.bu").exists());
    }

    #[test]
    fn load_preserves_unknown_top_level_keys() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("config.json"),
            serde_json::json!({ "env_dir": "/x", "a_future_field": 42 }).to_string(),
        )
        .unwrap();
        let config = load_config(tmp.path());
        assert_eq!(config.extra.get("a_future_field"), Some(&JsonValue::from(42)));
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("config.json"), "not json").unwrap();
        std::fs::write(
            tmp.path().join("config.json.bu"),
            serde_json::json!({ "env_dir": "/from-backup" }).to_string(),
        )
        .unwrap();
        let config = load_config(tmp.path());
        assert_eq!(config.env_dir, "/from-backup");
    }

    #[test]
    fn test_config_dir_is_rooted_under_tempdir() {
        let dir = test_config_dir(true);
        assert!(dir.starts_with(std::env::temp_dir()));
    }
}
