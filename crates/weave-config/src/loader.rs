//! Layered configuration loading.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. Global file: `~/.weave/config.toml`
//! 3. Local file: `<root>/.weave/config.toml`
//! 4. [`ConfigOverrides`]
//!
//! Files are merged as TOML tables before deserializing, so a key present in a
//! later file always wins, even when it sets a value back to its default, and
//! keys a file leaves out fall through to the layer below.

use crate::error::{ConfigError, FileOp};
use crate::{ConfigOverrides, WeaveConfig};
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, trace};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory holding config files, both under `$HOME` and the knowledge base root
const CONFIG_DIR: &str = ".weave";

/// Locates, merges and writes Weave configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// `~/.weave`, or `None` without a home directory
    global_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
        }
    }

    /// Loader with a custom global directory (for testing)
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: Some(global_dir.into()),
        }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_dir.as_ref().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    pub fn local_config_path(&self, root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Merge every layer for the knowledge base at `root` and validate.
    pub fn load(
        &self,
        root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<WeaveConfig, ConfigError> {
        let mut merged = Table::new();
        let layers = self
            .global_config_path()
            .into_iter()
            .chain(std::iter::once(self.local_config_path(root)));

        for path in layers {
            match read_table(&path)? {
                Some(table) => {
                    debug!("Applying config layer {}", path.display());
                    merge_tables(&mut merged, table);
                }
                None => trace!("No config at {}", path.display()),
            }
        }

        let mut config: WeaveConfig = Value::Table(merged)
            .try_into()
            .map_err(ConfigError::Merge)?;
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Read one config file on its own, without merging or validation
    pub fn load_file(&self, path: &Path) -> Result<Option<WeaveConfig>, ConfigError> {
        let Some(table) = read_table(path)? else {
            return Ok(None);
        };
        let config = Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::parse(path, e))?;
        Ok(Some(config))
    }

    pub fn save_global(&self, config: &WeaveConfig) -> Result<PathBuf, ConfigError> {
        let path = self.global_config_path().ok_or(ConfigError::NoHomeDir)?;
        write_config(&path, config)?;
        Ok(path)
    }

    pub fn save_local(&self, root: &Path, config: &WeaveConfig) -> Result<PathBuf, ConfigError> {
        let path = self.local_config_path(root);
        write_config(&path, config)?;
        Ok(path)
    }

    /// Write a default local config unless one exists; returns its path
    pub fn init_local(&self, root: &Path) -> Result<PathBuf, ConfigError> {
        let path = self.local_config_path(root);
        if path.exists() {
            return Ok(path);
        }
        self.save_local(root, &WeaveConfig::default())
    }
}

/// Parse `path` as a TOML table, checking it against the config schema.
///
/// A missing file is `Ok(None)`.
fn read_table(path: &Path) -> Result<Option<Table>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::file(FileOp::Read, path, e)),
    };

    let table: Table = content
        .parse()
        .map_err(|e| ConfigError::parse(path, e))?;
    // Type errors are reported against the file that caused them
    let _: WeaveConfig = Value::Table(table.clone())
        .try_into()
        .map_err(|e| ConfigError::parse(path, e))?;
    Ok(Some(table))
}

fn write_config(path: &Path, config: &WeaveConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::file(FileOp::CreateDir, parent, e))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::file(FileOp::Write, path, e))?;
    debug!("Wrote config to {}", path.display());
    Ok(())
}

/// Deep-merge `overlay` into `base`; nested tables merge, anything else replaces
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => {
                if let Some(Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, Value::Table(incoming));
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvictionPolicy, OptimizerSettings};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_local(root: &Path, content: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_global(global_dir: &Path, content: &str) {
        std::fs::create_dir_all(global_dir).unwrap();
        std::fs::write(global_dir.join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[test]
    fn test_defaults_without_files() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from(".weave"));
        assert_eq!(config.optimizer, OptimizerSettings::default());
        assert_eq!(config.cache.policy, EvictionPolicy::Lru);
    }

    #[test]
    fn test_partial_local_file() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        write_local(
            temp.path(),
            r#"
            [storage]
            database_file = "notes.db"

            [cache]
            policy = "fifo"
            max_entries = 16
            "#,
        );

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.storage.database_file, "notes.db");
        assert_eq!(config.cache.policy, EvictionPolicy::Fifo);
        assert_eq!(config.cache.max_entries, 16);
        assert_eq!(config.cache.default_ttl_secs, 300);
    }

    #[test]
    fn test_local_layer_over_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(
            &global_dir,
            r#"
            [logging]
            level = "debug"

            [optimizer]
            damping_factor = 0.5
            max_iterations = 20
            "#,
        );
        write_local(
            temp.path(),
            r#"
            [optimizer]
            max_iterations = 50
            "#,
        );

        let config = ConfigLoader::with_global_dir(&global_dir)
            .load(temp.path(), None)
            .unwrap();

        assert_eq!(config.optimizer.max_iterations, 50);
        assert_eq!(config.optimizer.damping_factor, 0.5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_local_can_restore_a_default() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[cache]\npolicy = \"lfu\"\n");
        write_local(temp.path(), "[cache]\npolicy = \"lru\"\n");

        let config = ConfigLoader::with_global_dir(&global_dir)
            .load(temp.path(), None)
            .unwrap();
        assert_eq!(config.cache.policy, EvictionPolicy::Lru);
    }

    #[test]
    fn test_overrides_win() {
        let temp = TempDir::new().unwrap();
        write_local(temp.path(), "[cache]\npolicy = \"lfu\"\n");
        let overrides = ConfigOverrides {
            cache_policy: Some(EvictionPolicy::Ttl),
            max_iterations: Some(7),
            ..Default::default()
        };

        let config = ConfigLoader::with_global_dir(temp.path().join("global"))
            .load(temp.path(), Some(&overrides))
            .unwrap();

        assert_eq!(config.cache.policy, EvictionPolicy::Ttl);
        assert_eq!(config.optimizer.max_iterations, 7);
    }

    #[test]
    fn test_out_of_range_value_rejected() {
        let temp = TempDir::new().unwrap();
        write_local(temp.path(), "[optimizer]\ndamping_factor = 2.0\n");

        let err = ConfigLoader::with_global_dir(temp.path().join("global"))
            .load(temp.path(), None)
            .unwrap_err();
        assert_eq!(err.key(), Some("optimizer.damping_factor"));
    }

    #[test]
    fn test_errors_name_the_file() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let path = write_local(temp.path(), "[cache\npolicy = ");
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&path.display().to_string()));

        // Well-formed TOML with a wrongly typed value
        write_local(temp.path(), "[cache]\nmax_entries = \"many\"\n");
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = WeaveConfig::default();
        config.cache.max_entries = 10;
        config.logging.level = "warn".to_string();
        let path = loader.save_local(temp.path(), &config).unwrap();

        let loaded = loader.load(temp.path(), None).unwrap();
        assert_eq!(loaded.cache.max_entries, 10);
        assert_eq!(loaded.logging.level, "warn");
        assert_eq!(
            loader.load_file(&path).unwrap().unwrap().cache.max_entries,
            10
        );
    }

    #[test]
    fn test_save_global() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = WeaveConfig::default();
        config.optimizer.max_iterations = 12;
        let path = loader.save_global(&config).unwrap();
        assert_eq!(Some(path), loader.global_config_path());

        let loaded = loader.load(&temp.path().join("kb"), None).unwrap();
        assert_eq!(loaded.optimizer.max_iterations, 12);
    }

    #[test]
    fn test_init_local_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let path = loader.init_local(temp.path()).unwrap();
        assert!(path.ends_with(".weave/config.toml"));
        std::fs::write(&path, "[cache]\nmax_entries = 3\n").unwrap();

        assert_eq!(loader.init_local(temp.path()).unwrap(), path);
        assert_eq!(loader.load(temp.path(), None).unwrap().cache.max_entries, 3);
    }

    #[test]
    fn test_load_file_missing() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        assert!(loader
            .load_file(&temp.path().join("absent.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: Table = "[a]\nx = 1\ny = 2\n[b]\nz = 3\n".parse().unwrap();
        let overlay: Table = "[a]\ny = 20\n[c]\nw = 4\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let expected: Table = "[a]\nx = 1\ny = 20\n[b]\nz = 3\n[c]\nw = 4\n"
            .parse()
            .unwrap();
        assert_eq!(base, expected);
    }
}
