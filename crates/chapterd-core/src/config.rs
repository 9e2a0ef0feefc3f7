use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Per-request HTTP retry parameters for the remote API (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

/// Request budget shared by the chapter checker and the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub requests_per_sec: f64,
    /// Requests that may be issued back to back before throttling kicks in.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 4.0,
            burst: 4,
        }
    }
}

/// External download tool invocation.
///
/// Each entry of `args` may contain `{url}`, `{dest}` and `{lang}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "mangadex-dl".to_string(),
            args: vec![
                "{url}".to_string(),
                "--folder".to_string(),
                "{dest}".to_string(),
                "--language".to_string(),
                "{lang}".to_string(),
                "--save-as".to_string(),
                "cbz".to_string(),
                "--progress-json".to_string(),
            ],
        }
    }
}

/// Remote content API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub api_base_url: String,
    /// Base used to build per-chapter URLs handed to the download tool.
    pub site_base_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mangadex.org".to_string(),
            site_base_url: "https://mangadex.org".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Global configuration loaded from `~/.config/chapterd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterdConfig {
    /// Root under which `{library}/{title}` directories are materialized.
    pub library_dir: PathBuf,
    /// Preferred chapter language (ISO code).
    pub language: String,
    /// Default automatic retry ceiling for new jobs.
    pub max_retries: u32,
    /// Base of the linear cooldown `(retry_count + 1) * base` before an automatic retry.
    pub retry_base_interval_secs: u64,
    /// Scheduler tick interval.
    pub tick_interval_secs: u64,
    /// Interval between follow-list checks.
    pub check_interval_secs: u64,
    /// Titles checked concurrently by the chapter checker.
    pub check_concurrency: usize,
    /// Maximum bytes of subprocess stderr kept as a job's error message.
    pub stderr_limit: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Optional per-request retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ChapterdConfig {
    fn default() -> Self {
        Self {
            library_dir: default_library_dir(),
            language: "en".to_string(),
            max_retries: 3,
            retry_base_interval_secs: 300,
            tick_interval_secs: 5,
            check_interval_secs: 6 * 60 * 60,
            check_concurrency: 5,
            stderr_limit: 2000,
            rate_limit: RateLimitConfig::default(),
            tool: ToolConfig::default(),
            remote: RemoteConfig::default(),
            retry: None,
        }
    }
}

impl ChapterdConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(60))
    }

    pub fn retry_base_interval(&self) -> Duration {
        Duration::from_secs(self.retry_base_interval_secs)
    }

    /// Destination directory for one title: `{library_dir}/{library}/{sanitized title}`.
    pub fn title_dir(&self, library: &str, title: &str) -> PathBuf {
        let mut dir = self.library_dir.clone();
        let library = crate::sanitize::sanitize_component(library);
        if !library.is_empty() {
            dir.push(library);
        }
        dir.push(crate::sanitize::sanitize_component(title));
        dir
    }
}

fn default_library_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Manga")
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("chapterd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ChapterdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ChapterdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ChapterdConfig = toml::from_str(&data)?;
    Ok(cfg)
}
