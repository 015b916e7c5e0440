use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Starter config written by `ebk init-config`. Everything is commented out
/// so the defaults stay authoritative until the user opts in.
const CONFIG_TEMPLATE: &str = r#"# ebk configuration

# Tree to back up. Defaults to your home directory.
#source_directory = "/home/you"

# Back up only these folders under source_directory; empty means everything.
#folders = ["Documents", "Pictures", "Videos", "Music", "Downloads", "Desktop"]

# Extra exclusion patterns (regular expressions matched against full paths).
#exclude_patterns = ["\\.iso$"]

# Free space to keep in reserve on the destination, in MiB.
#space_margin_mb = 100

# fsync every copied file before moving on. Slower, safer on removable media.
#sync_files = true

# Seconds between drive scans in watch mode.
#poll_interval_secs = 2

# Back up onto drives that have never been used with ebk before.
#adopt_new_drives = false
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source_directory: PathBuf,
    /// Top-level folders to back up; empty backs up the whole tree.
    pub folders: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub space_margin_mb: u64,
    pub sync_files: bool,
    pub poll_interval_secs: u64,
    pub adopt_new_drives: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_directory: home_dir(),
            folders: Vec::new(),
            exclude_patterns: Vec::new(),
            space_margin_mb: 100,
            sync_files: true,
            poll_interval_secs: 2,
            adopt_new_drives: false,
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Layered configuration: defaults, then the user's config file, then
    /// `EBK_*` environment variables, then CLI overrides.
    pub fn new<A: Serialize>(cli: Option<&A>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = config_path() {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("EBK_"));

        if let Some(cli) = cli {
            figment = figment.merge(Serialized::defaults(cli));
        }

        figment.extract()
    }
}

pub fn config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/ebk/config.toml"))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Write the starter config file, refusing to clobber an existing one.
pub fn write_starter_config() -> Result<PathBuf> {
    let path = config_path().context("HOME is not set")?;
    if path.exists() {
        bail!("config already exists at {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
