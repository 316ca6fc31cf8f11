// Installer settings
//
// Operational knobs of the installer itself (paths, binaries, timeouts). The install fields
// (database names, passwords, server identity) are NOT read from here; they come from the
// field source of the front end.
//
// Sources, lowest priority first:
// - built-in defaults
// - optional TOML file at $FROXLOR_INSTALLER_CONFIG (default `installer.toml`)
// - FROXLOR_INSTALLER_* environment variables (e.g. FROXLOR_INSTALLER_DUMP_TIMEOUT_SECS=900)

use anyhow::{Context, Result};
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "FROXLOR_INSTALLER_CONFIG";
pub const ENV_PREFIX: &str = "FROXLOR_INSTALLER";
const DEFAULT_CONFIG_FILE: &str = "installer.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Panel installation root. Resolved from the working directory when unset.
    pub basepath: Option<PathBuf>,
    /// Schema dump, relative to `basepath` unless absolute.
    pub schema_file: PathBuf,
    /// PHP CLI used to probe the runtime. Looked up on PATH when bare.
    pub php_binary: String,
    /// Candidate locations of the dump helper, first existing wins.
    pub dump_binaries: Vec<PathBuf>,
    pub backup_dir: PathBuf,
    pub dump_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Directory for the credentials file when `<basepath>/lib` is not writable.
    /// Defaults to the system temp directory.
    pub userdata_fallback_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// PHP versions at or below this one cannot run the panel.
    pub php_min_version: String,
    /// PHP versions at or below this one work but are discouraged.
    pub php_preferred_version: String,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            basepath: None,
            schema_file: PathBuf::from("install/froxlor.sql"),
            php_binary: "php".to_string(),
            dump_binaries: vec![
                PathBuf::from("/usr/bin/mysqldump"),
                PathBuf::from("/usr/local/bin/mysqldump"),
            ],
            backup_dir: PathBuf::from("/tmp"),
            dump_timeout_secs: 600,
            probe_timeout_secs: 15,
            connect_timeout_secs: 20,
            userdata_fallback_dir: None,
            log_dir: None,
            php_min_version: "5.3.0".to_string(),
            php_preferred_version: "5.6.0".to_string(),
        }
    }
}

impl InstallerSettings {
    /// Load settings from the default file location and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("dump_binaries"),
            )
            .build()
            .with_context(|| format!("Failed to read installer settings from {}", path))?;

        settings
            .try_deserialize::<InstallerSettings>()
            .context("Invalid installer settings")
    }

    /// Absolute schema path for a resolved basepath.
    pub fn schema_path(&self, basepath: &std::path::Path) -> PathBuf {
        if self.schema_file.is_absolute() {
            self.schema_file.clone()
        } else {
            basepath.join(&self.schema_file)
        }
    }

    pub fn userdata_fallback_dir(&self) -> PathBuf {
        self.userdata_fallback_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
