//! YAML configuration loading.
//!
//! PaperRoute reads a single `config.yaml` describing the watched and output
//! directories, the DeepFellow service endpoints, and the list of recipients
//! documents can be routed to.
//!
//! # Loading pipeline
//!
//! ```text
//! .env ──▶ locate config.yaml ──▶ read ──▶ parse YAML ──▶ ${VAR} substitution
//!                                                               │
//!        cache ◀── watch dir exists ◀── resolve paths ◀── schema + field checks
//! ```
//!
//! # Example
//!
//! ```yaml
//! directories:
//!   watch: ./inbox
//!   output: ./output
//! deepfellow:
//!   base_url: http://localhost:8000
//!   responses_endpoint: /v1/responses
//!   ocr_endpoint: /v1/ocr
//!   api_key: ${DEEPFELLOW_API_KEY}
//!   vision_model: gpt-4-vision
//!   llm_model: deepseek
//!   rag_collection: documents
//! recipients:
//!   - name: Alice
//!     tags: [invoices, utilities]
//! ```
//!
//! Relative directories are resolved against the directory holding the
//! config file. [`ConfigLoader`] owns the loaded value and hands out shared
//! [`Arc<Config>`] handles, so callers load once at startup and pass the
//! config down explicitly.

use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex"));

/// Errors raised while locating, reading, or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find config.yaml in {} or any parent directory", .start.display())]
    NotFound { start: PathBuf },

    #[error("Configuration file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file: {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Configuration file is empty or invalid (expected a mapping): {}", .path.display())]
    NotAMapping { path: PathBuf },

    #[error("Environment variable '{name}' is not set")]
    MissingEnvVar { name: String },

    #[error("Invalid configuration in {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Watch directory does not exist: {}", .path.display())]
    WatchDirMissing { path: PathBuf },

    #[error(
        "Configuration already loaded; reset the loader before loading {}",
        .path.display()
    )]
    AlreadyLoaded { path: PathBuf },

    #[error("Could not determine the current directory")]
    CurrentDir(#[source] std::io::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub directories: DirectoriesConfig,
    pub deepfellow: DeepfellowConfig,
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DirectoriesConfig {
    pub watch: PathBuf,
    pub output: PathBuf,
}

/// Connection settings for the DeepFellow OCR / vision / LLM service.
#[derive(Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeepfellowConfig {
    pub base_url: String,
    pub responses_endpoint: String,
    pub ocr_endpoint: String,
    pub api_key: String,
    pub vision_model: String,
    pub llm_model: String,
    pub rag_collection: String,
}

impl fmt::Debug for DeepfellowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepfellowConfig")
            .field("base_url", &self.base_url)
            .field("responses_endpoint", &self.responses_endpoint)
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("api_key", &"<redacted>")
            .field("vision_model", &self.vision_model)
            .field("llm_model", &self.llm_model)
            .field("rag_collection", &self.rag_collection)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Recipient {
    pub name: String,
    pub tags: Vec<String>,
}

impl Recipient {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

impl Config {
    /// Looks up a recipient by exact name.
    pub fn recipient(&self, name: &str) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.name == name)
    }

    /// Checks field-level constraints that the YAML schema cannot express.
    fn validate(&self) -> Result<(), String> {
        let df = &self.deepfellow;
        for (field, value) in [
            ("base_url", &df.base_url),
            ("responses_endpoint", &df.responses_endpoint),
            ("ocr_endpoint", &df.ocr_endpoint),
            ("vision_model", &df.vision_model),
            ("llm_model", &df.llm_model),
            ("rag_collection", &df.rag_collection),
        ] {
            if value.is_empty() {
                return Err(format!("deepfellow.{} must not be empty", field));
            }
        }
        if df.api_key.trim().is_empty() {
            return Err("deepfellow.api_key must not be blank".to_string());
        }

        if self.recipients.is_empty() {
            return Err("recipients must not be empty".to_string());
        }
        for (i, recipient) in self.recipients.iter().enumerate() {
            if recipient.name.trim().is_empty() {
                return Err(format!("recipients[{}].name must not be blank", i));
            }
            if recipient.tags.is_empty() {
                return Err(format!("recipients[{}].tags must not be empty", i));
            }
            if let Some(j) = recipient.tags.iter().position(|t| t.trim().is_empty()) {
                return Err(format!("recipients[{}].tags[{}] must not be blank", i, j));
            }
        }

        Ok(())
    }
}

/// Replaces every `${NAME}` in `value` with `lookup(NAME)`.
///
/// Fails with [`ConfigError::MissingEnvVar`] on the first name `lookup`
/// cannot resolve.
pub fn substitute_env_vars<F>(value: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut last = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(value) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let name = &caps[1];
        let replacement = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar {
            name: name.to_string(),
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&replacement);
        last = whole.end();
    }
    out.push_str(&value[last..]);

    Ok(out)
}

/// Walks a parsed YAML tree and substitutes env vars in every string value.
///
/// Mapping keys and non-string scalars are left untouched.
pub fn process_env_vars<F>(value: Value, lookup: &F) -> Result<Value, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => Ok(Value::String(substitute_env_vars(&s, lookup)?)),
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, process_env_vars(v, lookup)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| process_env_vars(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Tagged(mut tagged) => {
            let inner = std::mem::replace(&mut tagged.value, Value::Null);
            tagged.value = process_env_vars(inner, lookup)?;
            Ok(Value::Tagged(tagged))
        }
        other => Ok(other),
    }
}

/// Walks up from `start` to the first directory containing `config.yaml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = absolutize(start)?;
    let mut current = start.as_path();
    loop {
        if current.join(CONFIG_FILE_NAME).is_file() {
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Err(ConfigError::NotFound { start })
}

/// Reads, substitutes, validates and resolves a config file without caching.
///
/// Environment references are resolved from the process environment.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    load_config_file_with(path, &|name| std::env::var(name).ok())
}

/// Like [`load_config_file`], resolving `${VAR}` references through `lookup`.
pub fn load_config_file_with<F>(path: &Path, lookup: &F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = absolutize(path)?;

    let content = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound { path: path.clone() }
        } else {
            ConfigError::Read {
                path: path.clone(),
                source,
            }
        }
    })?;

    if content.trim().is_empty() {
        return Err(ConfigError::NotAMapping { path });
    }

    let raw: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    if !raw.is_mapping() {
        return Err(ConfigError::NotAMapping { path });
    }

    let processed = process_env_vars(raw, lookup)?;

    let mut config: Config =
        serde_yaml::from_value(processed).map_err(|e| ConfigError::Invalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.clone(),
        reason,
    })?;

    // `path` is absolute, so it always has a parent.
    let root = path.parent().unwrap_or(Path::new("/"));
    config.directories.watch = resolve_against(root, &config.directories.watch);
    config.directories.output = resolve_against(root, &config.directories.output);

    if !config.directories.watch.is_dir() {
        return Err(ConfigError::WatchDirMissing {
            path: config.directories.watch,
        });
    }

    Ok(config)
}

/// Caller-owned configuration cache.
///
/// The first successful [`load`](ConfigLoader::load) wins; later calls
/// without a path return the same [`Arc`]. Loading from a different
/// explicit path requires [`reset`](ConfigLoader::reset) first.
pub struct ConfigLoader {
    search_start: Option<PathBuf>,
    dotenv: bool,
    cached: Mutex<Option<Arc<Config>>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader that searches for `config.yaml` from the current directory.
    pub fn new() -> Self {
        Self {
            search_start: None,
            dotenv: true,
            cached: Mutex::new(None),
        }
    }

    /// A loader that searches for `config.yaml` upward from `dir`.
    pub fn with_search_start(dir: impl Into<PathBuf>) -> Self {
        Self {
            search_start: Some(dir.into()),
            ..Self::new()
        }
    }

    /// Skip populating the environment from a `.env` file.
    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = false;
        self
    }

    pub fn load(&self, path: Option<&Path>) -> Result<Arc<Config>, ConfigError> {
        let mut cached = self.lock();
        self.load_locked(&mut cached, path)
    }

    /// Returns the cached config, loading it by search if necessary.
    pub fn get(&self) -> Result<Arc<Config>, ConfigError> {
        let mut cached = self.lock();
        self.load_locked(&mut cached, None)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// Drops the cached config so the next load reads from disk again.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Config>>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_locked(
        &self,
        cached: &mut Option<Arc<Config>>,
        path: Option<&Path>,
    ) -> Result<Arc<Config>, ConfigError> {
        if let Some(config) = cached.as_ref() {
            return match path {
                None => {
                    debug!("using cached configuration");
                    Ok(Arc::clone(config))
                }
                Some(path) => Err(ConfigError::AlreadyLoaded {
                    path: path.to_path_buf(),
                }),
            };
        }

        if self.dotenv {
            load_dotenv();
        }

        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let start = match &self.search_start {
                    Some(dir) => dir.clone(),
                    None => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
                };
                find_project_root(&start)?.join(CONFIG_FILE_NAME)
            }
        };

        let config = Arc::new(load_config_file(&path)?);
        info!(
            path = %path.display(),
            recipients = config.recipients.len(),
            "configuration loaded"
        );
        *cached = Some(Arc::clone(&config));
        Ok(config)
    }
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load .env file: {}", e),
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
    Ok(normalize(&cwd.join(path)))
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    }
}

/// Lexically folds `.` and `..` components; symlinks are not followed.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
