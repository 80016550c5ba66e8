use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::identity::IdentityPolicy;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Flatnotes";
const APP_NAME: &str = "flatnotes";

pub const CONFIG_ENV: &str = "FLATNOTES_CONFIG";
pub const DATA_ENV: &str = "FLATNOTES_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            self.write_default_config(&default_cfg)?;
            default_cfg.post_load(&self.paths);
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub notes_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_dir = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::from_dirs(config_dir, config_file, data_dir))
    }

    pub fn from_dirs(config_dir: PathBuf, config_file: PathBuf, data_dir: PathBuf) -> Self {
        let notes_dir = data_dir.join("notes");
        Self {
            config_dir,
            config_file,
            data_dir,
            notes_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Column width used when printing note titles.
    pub list_title_width: usize,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            list_title_width: crate::storage::TITLE_DISPLAY_LEN,
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.storage.resolve(paths);
        if self.storage.max_entry_bytes == 0 {
            tracing::warn!("max_entry_bytes of 0 would reject every import, using default");
            self.storage.max_entry_bytes = DEFAULT_MAX_ENTRY_BYTES;
        }
    }
}

pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Directory holding one `<key>.txt` per note. Empty means `<data_dir>/notes`.
    pub notes_dir: PathBuf,
    pub identity: IdentityPolicy,
    /// Saving a blank body removes the note instead of writing an empty file.
    pub delete_on_empty_save: bool,
    /// Archive entries larger than this are skipped on import.
    pub max_entry_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            notes_dir: PathBuf::new(),
            identity: IdentityPolicy::OpaqueId,
            delete_on_empty_save: true,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.notes_dir.as_os_str().is_empty() {
            self.notes_dir = paths.notes_dir.clone();
        } else if self.notes_dir.is_relative() {
            self.notes_dir = paths.data_dir.join(&self.notes_dir);
        }
    }
}
