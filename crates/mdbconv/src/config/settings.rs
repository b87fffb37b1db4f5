use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Upper bound for an uploaded database, in bytes.
    pub max_upload_size: u64,
    /// Lowercase extensions including the leading dot.
    pub allowed_extensions: Vec<String>,
    pub upload_dir: PathBuf,
    pub export_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    /// 0 disables the per-job timeout.
    pub job_timeout_minutes: u64,
    pub cleanup_interval_minutes: u64,
    pub max_job_age_hours: u64,
    pub max_tables_per_db: usize,
    /// Directory holding the mdbtools binaries; `PATH` lookup when unset.
    pub mdbtools_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_size: 100 * 1024 * 1024,
            allowed_extensions: vec![".mdb".to_string(), ".accdb".to_string()],
            upload_dir: PathBuf::from("./data/uploads"),
            export_dir: PathBuf::from("./data/exports"),
            max_concurrent_jobs: 3,
            job_timeout_minutes: 30,
            cleanup_interval_minutes: 60,
            max_job_age_hours: 24,
            max_tables_per_db: 100,
            mdbtools_path: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Build settings from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`Settings::from_env`], but hands back the fallback warnings
    /// instead of logging them, for callers that set up logging from the
    /// result.
    pub fn from_env_with_warnings() -> (Self, Vec<String>) {
        Self::from_lookup_with_warnings(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (settings, warnings) = Self::from_lookup_with_warnings(lookup);
        for warning in &warnings {
            log::warn!("{}", warning);
        }
        settings
    }

    /// Build settings and collect one warning per value that fell back to
    /// its default.
    pub fn from_lookup_with_warnings<F>(lookup: F) -> (Self, Vec<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let w = &mut warnings;
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let allowed_extensions = get("ALLOWED_EXTENSIONS")
            .map(|raw| parse_extensions(&raw))
            .filter(|exts| !exts.is_empty())
            .unwrap_or(defaults.allowed_extensions);

        let settings = Self {
            host: get("MDBCONV_HOST").unwrap_or(defaults.host),
            port: parse_or(w, "MDBCONV_PORT", get("MDBCONV_PORT"), defaults.port),
            max_upload_size: parse_or(
                w,
                "MAX_UPLOAD_SIZE",
                get("MAX_UPLOAD_SIZE"),
                defaults.max_upload_size,
            ),
            allowed_extensions,
            upload_dir: get("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            export_dir: get("EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            max_concurrent_jobs: parse_or(
                w,
                "MAX_CONCURRENT_JOBS",
                get("MAX_CONCURRENT_JOBS"),
                defaults.max_concurrent_jobs,
            )
            .max(1),
            job_timeout_minutes: parse_or(
                w,
                "JOB_TIMEOUT_MINUTES",
                get("JOB_TIMEOUT_MINUTES"),
                defaults.job_timeout_minutes,
            ),
            cleanup_interval_minutes: parse_or(
                w,
                "CLEANUP_INTERVAL_MINUTES",
                get("CLEANUP_INTERVAL_MINUTES"),
                defaults.cleanup_interval_minutes,
            )
            .max(1),
            max_job_age_hours: parse_or(
                w,
                "MAX_JOB_AGE_HOURS",
                get("MAX_JOB_AGE_HOURS"),
                defaults.max_job_age_hours,
            ),
            max_tables_per_db: parse_or(
                w,
                "MAX_TABLES_PER_DB",
                get("MAX_TABLES_PER_DB"),
                defaults.max_tables_per_db,
            ),
            mdbtools_path: get("MDBTOOLS_PATH").map(PathBuf::from),
            log_level: get("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
            log_json: get("LOG_JSON")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.log_json),
        };
        (settings, warnings)
    }

    /// Settings rooted at a single data directory (`uploads/` and `exports/`).
    pub fn with_data_dir(mut self, base: &Path) -> Self {
        self.upload_dir = base.join("uploads");
        self.export_dir = base.join("exports");
        self
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        match self.job_timeout_minutes {
            0 => None,
            minutes => Some(capped_secs(minutes, 60)),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        capped_secs(self.cleanup_interval_minutes.max(1), 60)
    }

    /// How long a job may stay untouched before the sweeper acts on it.
    pub fn retention(&self) -> Duration {
        capped_secs(self.max_job_age_hours, 3600)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Settings loaded:");
        tracing::info!("  server:    {}", self.bind_address());
        tracing::info!(
            "  uploads:   dir={}, max_size={} bytes, extensions={}",
            self.upload_dir.display(),
            self.max_upload_size,
            self.allowed_extensions.join(",")
        );
        tracing::info!("  exports:   dir={}", self.export_dir.display());
        tracing::info!(
            "  jobs:      workers={}, timeout={}m, retention={}h, sweep_every={}m",
            self.max_concurrent_jobs,
            self.job_timeout_minutes,
            self.max_job_age_hours,
            self.cleanup_interval_minutes
        );
        tracing::info!(
            "  mdbtools:  {}",
            self.mdbtools_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(PATH)".to_string())
        );
    }
}

/// Longest duration handed to timers; `Instant` arithmetic panics past it.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

fn capped_secs(count: u64, unit_secs: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(unit_secs)).min(MAX_DURATION)
}

fn parse_or<T>(warnings: &mut Vec<String>, key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warnings.push(format!(
                    "Invalid value '{}' for {}, using default {}",
                    value, key, default
                ));
                default
            }
        },
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}
