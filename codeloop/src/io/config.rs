//! Loop configuration stored in `codeloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "codeloop.toml";
pub const CONFIG_TEMPLATE: &str = include_str!("config.template.toml");

/// Loop configuration (TOML).
///
/// Sections other than `[run]` may be omitted. `run.objective` and
/// `run.max_iterations` have no defaults: a run must state what it is for and
/// how long it may go on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token, if the provider needs one.
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: None,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub temperature: f32,
    /// Context window in tokens; drives prompt truncation.
    pub context_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "llama3".to_string(),
            temperature: 0.2,
            context_length: 8192,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierBackend {
    VerdictMarker,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    /// Text-classification endpoint for the `http` backend.
    pub url: Option<String>,
    /// Class index at or above which an analysis is positive.
    pub threshold: usize,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::VerdictMarker,
            url: None,
            threshold: 3,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    pub objective: String,
    #[serde(default = "default_runtime_path")]
    pub runtime_path: PathBuf,
    /// Maximum wall-clock seconds per code execution.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_memories_to_recall")]
    pub memories_to_recall: usize,
    #[serde(default)]
    pub manual_analysis: bool,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run_secs: Option<u64>,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    /// Bytes of stdout/stderr kept per execution.
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

fn default_runtime_path() -> PathBuf {
    PathBuf::from("python3")
}

fn default_timeout_secs() -> u64 {
    360
}

fn default_memories_to_recall() -> usize {
    5
}

fn default_database_path() -> PathBuf {
    PathBuf::from("codeloop.db")
}

fn default_output_limit_bytes() -> usize {
    crate::io::sandbox::DEFAULT_OUTPUT_LIMIT_BYTES
}

impl RunConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_run(&self) -> Option<Duration> {
        self.max_run_secs.map(Duration::from_secs)
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub objective: Option<String>,
    pub max_iterations: Option<u32>,
    pub manual_analysis: bool,
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(anyhow!("api.base_url must not be empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(anyhow!("api.request_timeout_secs must be > 0"));
        }
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must not be empty"));
        }
        if self.model.context_length == 0 {
            return Err(anyhow!("model.context_length must be > 0"));
        }
        if self.classifier.backend == ClassifierBackend::Http
            && self
                .classifier
                .url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            return Err(anyhow!("classifier.url is required for the http backend"));
        }
        if self.run.objective.trim().is_empty() {
            return Err(anyhow!("run.objective must not be empty"));
        }
        if self.run.runtime_path.as_os_str().is_empty() {
            return Err(anyhow!("run.runtime_path must not be empty"));
        }
        if self.run.timeout_secs == 0 {
            return Err(anyhow!("run.timeout_secs must be > 0"));
        }
        if self.run.max_iterations == 0 {
            return Err(anyhow!("run.max_iterations must be > 0"));
        }
        if self.run.max_run_secs == Some(0) {
            return Err(anyhow!("run.max_run_secs must be > 0 when set"));
        }
        if self.run.output_limit_bytes == 0 {
            return Err(anyhow!("run.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(objective) = &overrides.objective {
            self.run.objective = objective.clone();
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.run.max_iterations = max_iterations;
        }
        if overrides.manual_analysis {
            self.run.manual_analysis = true;
        }
    }
}

/// Parse and validate config text.
pub fn parse_config(contents: &str) -> Result<LoopConfig> {
    let cfg: LoopConfig = toml::from_str(contents).context("parse config toml")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file, applying command-line overrides before validation.
pub fn load_config(path: &Path, overrides: &Overrides) -> Result<LoopConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "missing config {} (run `codeloop init` to create one)",
            path.display()
        ));
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.apply(overrides);
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Write the commented config template unless a file exists and `force` is false.
///
/// Returns whether the file was written.
pub fn write_template(path: &Path, force: bool) -> Result<bool> {
    if !force && path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, CONFIG_TEMPLATE)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(true)
}
