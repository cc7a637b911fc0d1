use super::{ConfigError, Configuration};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the configuration document lives. Owned by the application; the
/// guard only ever loads from it.
pub trait ConfigStore: Send {
    fn load(&self) -> Result<Configuration, ConfigError>;
    fn save(&self, config: &Configuration) -> Result<(), ConfigError>;
}

/// Configuration document stored as a JSON file. Hand edited files may use
/// JSON5 syntax; saving always writes plain pretty-printed JSON.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<Configuration, ConfigError> {
        if !self.path.exists() {
            info!(
                "📄 No configuration at {:?}, writing defaults",
                self.path
            );
            let config = Configuration::default();
            self.save(&config)?;
            return Ok(config);
        }

        let text = fs::read_to_string(&self.path)?;
        let config = Configuration::from_json5_str(&text)?;
        info!(
            "📄 Loaded configuration from {:?}: {} rule(s)",
            self.path,
            config.rules.len()
        );
        Ok(config)
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, config.to_json_pretty()?)?;
        Ok(())
    }
}

/// In-memory store, handy for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    config: Mutex<Configuration>,
}

impl MemoryStore {
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Configuration, ConfigError> {
        Ok(self.config.lock().clone())
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        *self.config.lock() = config.clone();
        Ok(())
    }
}

/// Immutable configuration snapshots shared between the capture worker and
/// the rule engine. Readers never observe a half-updated document.
#[derive(Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Configuration>>>,
}

impl SharedConfig {
    pub fn new(config: Configuration) -> Self {
        let issues = config.validate();
        for issue in &issues {
            warn!("⚠️ Configuration issue: {}", issue);
        }
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<Configuration> {
        Arc::clone(&self.inner.read())
    }

    pub fn replace(&self, config: Configuration) {
        for issue in config.validate() {
            warn!("⚠️ Configuration issue: {}", issue);
        }
        *self.inner.write() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::Rule;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("guard.json"));

        let config = store.load().unwrap();
        assert_eq!(config, Configuration::default());
        assert!(store.path().exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("guard.json"));

        let mut config = Configuration::default();
        config.triggers.motion.camera_id = "1".into();
        config.rules.push(Rule {
            id: "r1".into(),
            trigger: "motion".into(),
            action: "HTTP:x".into(),
            cooldown_ms: 5000,
            ..Default::default()
        });
        store.save(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guard.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(JsonFileStore::new(path).load().is_err());
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedConfig::new(Configuration::default());
        let before = shared.snapshot();

        let mut next = Configuration::default();
        next.triggers.motion.camera_id = "2".into();
        shared.replace(next);

        assert_eq!(before.triggers.motion.camera_id, "");
        assert_eq!(shared.snapshot().triggers.motion.camera_id, "2");
    }
}
