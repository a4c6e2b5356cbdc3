//! Configuration loading, merging and persistence for `guardpkg`.
//!
//! Global config and project-local config are merged with project values taking precedence.

mod overlay;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use guardpkg_core::AnalysisError;
use guardpkg_detect::{
    DEFAULT_FILE_EXTENSIONS, DEFAULT_MALICIOUS_FILENAMES, DEFAULT_TRUSTED_DOMAINS,
};
use serde::{Deserialize, Serialize};

use self::overlay::ConfigOverlay;

/// Default minimum score a package needs before installation is allowed.
pub const DEFAULT_SCORE_THRESHOLD: u8 = 50;
/// Default maximum depth of the dependency walk.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 3;
/// Default timeout for each registry or advisory request.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Default number of dependency assessments in flight at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardPkgConfig {
    /// Minimum score (0..=100) a package must reach to be installed.
    pub score_threshold: u8,
    /// Whether the pre-install hook blocks packages under the threshold.
    pub block_install: bool,
    /// Whether packages are checked automatically before install.
    pub auto_check: bool,
    pub analysis: AnalysisConfig,
    pub inspection: InspectionConfig,
    pub malware: MalwareConfig,
    pub advisories: AdvisoriesConfig,
}

/// Limits for network fetches and the dependency walk.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_dependency_depth: usize,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
    /// Download and inspect dependency tarballs, not just their metadata.
    pub inspect_dependency_files: bool,
}

/// Extra inputs for the file inspector. Lists extend the built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectionConfig {
    pub file_extensions: Vec<String>,
    pub trusted_domains: Vec<String>,
    pub malicious_filenames: Vec<String>,
}

/// Known-malware SHA-256 fingerprints seeded into the hash registry at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MalwareConfig {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdvisoriesConfig {
    pub osv: bool,
}

/// Settings the `config` subcommand may persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub auto_check: Option<bool>,
    pub score_threshold: Option<u8>,
    pub block_install: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.auto_check.is_none() && self.score_threshold.is_none() && self.block_install.is_none()
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            inspect_dependency_files: true,
        }
    }
}

impl AnalysisConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            file_extensions: to_owned_list(DEFAULT_FILE_EXTENSIONS),
            trusted_domains: to_owned_list(DEFAULT_TRUSTED_DOMAINS),
            malicious_filenames: to_owned_list(DEFAULT_MALICIOUS_FILENAMES),
        }
    }
}

impl Default for AdvisoriesConfig {
    fn default() -> Self {
        Self { osv: true }
    }
}

impl Default for GuardPkgConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            block_install: true,
            auto_check: false,
            analysis: AnalysisConfig::default(),
            inspection: InspectionConfig::default(),
            malware: MalwareConfig::default(),
            advisories: AdvisoriesConfig::default(),
        }
    }
}

impl GuardPkgConfig {
    /// Loads and merges global + project configuration from default paths.
    ///
    /// # Errors
    ///
    /// Returns an error if any discovered config file cannot be read or parsed, or holds an
    /// out-of-range value.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_paths(global_config_path(), project_config_path())
    }

    pub(crate) fn load_with_paths(
        global: Option<PathBuf>,
        project: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = global {
            config.merge_from_path(&path)?;
        }
        if let Some(path) = project {
            config.merge_from_path(&path)?;
        }
        Ok(config)
    }

    /// Writes `update` into the global config file, keeping unrelated keys intact.
    pub fn save(update: ConfigUpdate) -> anyhow::Result<PathBuf> {
        let path = global_config_path().ok_or_else(|| {
            anyhow::Error::new(AnalysisError::InvalidConfiguration {
                message: "unable to determine the global config path".to_string(),
            })
        })?;
        save_to_path(&path, update)?;
        Ok(path)
    }

    fn merge_from_path(&mut self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let overlay: ConfigOverlay = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        self.apply_overlay(overlay)
            .with_context(|| format!("invalid config file at {}", path.display()))
    }

    fn apply_overlay(&mut self, overlay: ConfigOverlay) -> anyhow::Result<()> {
        if let Some(value) = overlay.score_threshold {
            self.score_threshold = validate_score_threshold(value)?;
        }
        if let Some(value) = overlay.block_install {
            self.block_install = value;
        }
        if let Some(value) = overlay.auto_check {
            self.auto_check = value;
        }
        if let Some(value) = overlay.analysis {
            if let Some(depth) = value.max_dependency_depth {
                self.analysis.max_dependency_depth = depth;
            }
            if let Some(timeout) = value.fetch_timeout_secs {
                self.analysis.fetch_timeout_secs =
                    sanitize_positive_u64(timeout, DEFAULT_FETCH_TIMEOUT_SECS);
            }
            if let Some(concurrency) = value.max_concurrent_fetches {
                self.analysis.max_concurrent_fetches =
                    sanitize_positive_usize(concurrency, DEFAULT_MAX_CONCURRENT_FETCHES);
            }
            if let Some(inspect) = value.inspect_dependency_files {
                self.analysis.inspect_dependency_files = inspect;
            }
        }
        if let Some(value) = overlay.inspection {
            append_unique(
                &mut self.inspection.file_extensions,
                normalize_list(value.file_extensions.unwrap_or_default()),
            );
            append_unique(
                &mut self.inspection.trusted_domains,
                normalize_list(value.trusted_domains.unwrap_or_default()),
            );
            append_unique(
                &mut self.inspection.malicious_filenames,
                normalize_list(value.malicious_filenames.unwrap_or_default()),
            );
        }
        if let Some(value) = overlay.malware {
            append_unique(
                &mut self.malware.hashes,
                normalize_list(value.hashes.unwrap_or_default()),
            );
        }
        if let Some(value) = overlay.advisories
            && let Some(osv) = value.osv
        {
            self.advisories.osv = osv;
        }
        Ok(())
    }
}

/// Accepts thresholds in 0..=100.
pub fn validate_score_threshold(value: i64) -> Result<u8, AnalysisError> {
    u8::try_from(value)
        .ok()
        .filter(|threshold| *threshold <= 100)
        .ok_or_else(|| AnalysisError::InvalidConfiguration {
            message: format!("score threshold must be between 0 and 100, got {value}"),
        })
}

fn save_to_path(path: &Path, update: ConfigUpdate) -> anyhow::Result<()> {
    if let Some(threshold) = update.score_threshold {
        validate_score_threshold(i64::from(threshold))?;
    }

    let mut table = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        raw.parse::<toml::Table>()
            .with_context(|| format!("failed to parse config file at {}", path.display()))?
    } else {
        toml::Table::new()
    };

    if let Some(value) = update.auto_check {
        table.insert("auto_check".to_string(), toml::Value::Boolean(value));
    }
    if let Some(value) = update.score_threshold {
        table.insert(
            "score_threshold".to_string(),
            toml::Value::Integer(i64::from(value)),
        );
    }
    if let Some(value) = update.block_install {
        table.insert("block_install".to_string(), toml::Value::Boolean(value));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let rendered = toml::to_string_pretty(&table).context("failed to serialize config")?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write config file at {}", path.display()))
}

fn global_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("GUARDPKG_CONFIG_GLOBAL_PATH") {
        return Some(PathBuf::from(explicit));
    }

    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)?;

    Some(home.join(".config").join("guardpkg").join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os("GUARDPKG_CONFIG_PROJECT_PATH") {
        return Some(PathBuf::from(explicit));
    }

    let cwd = env::current_dir().ok()?;
    Some(cwd.join(".guardpkg.toml"))
}

fn append_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.iter().any(|existing| existing == &value) {
            target.push(value);
        }
    }
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn sanitize_positive_u64(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}

fn sanitize_positive_usize(value: usize, fallback: usize) -> usize {
    if value == 0 { fallback } else { value }
}

#[cfg(test)]
#[path = "../tests/config.rs"]
mod tests;
