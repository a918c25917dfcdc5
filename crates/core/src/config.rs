use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PCAD_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PCAD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            model: ModelConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            runtime: RuntimeConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  model:    k={}, input={}, label={}, score={}",
            self.model.k,
            self.model.input_col,
            self.model.label_col.as_deref().unwrap_or("(none)"),
            self.model.score_col
        );
        tracing::info!(
            "  storage:  data_dir={}, model_path={}",
            self.storage.data_dir.display(),
            self.storage.model_path.display()
        );
        tracing::info!("  runtime:  worker_threads={}", self.runtime.worker_threads);
    }

    /// Return a JSON view of the effective configuration.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "model": {
                "k": self.model.k,
                "input_col": self.model.input_col,
                "label_col": self.model.label_col,
                "projection_col": self.model.projection_col,
                "score_col": self.model.score_col,
                "error_col": self.model.error_col,
                "center": self.model.center,
            },
            "storage": {
                "data_dir": self.storage.data_dir,
                "model_path": self.storage.model_path,
            },
            "runtime": { "worker_threads": self.runtime.worker_threads },
        })
    }
}

// ── Model ─────────────────────────────────────────────────────

/// Default estimator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub k: usize,
    pub input_col: String,
    /// `None` trains on every row.
    pub label_col: Option<String>,
    pub projection_col: String,
    pub score_col: String,
    pub error_col: Option<String>,
    pub center: bool,
}

impl ModelConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            k: profiled_env_usize(p, "PCA_K", 3),
            input_col: profiled_env_or(p, "INPUT_COL", "features"),
            label_col: Some(profiled_env_or(p, "LABEL_COL", "label")).filter(|s| s != "-"),
            projection_col: profiled_env_or(p, "PROJECTION_COL", "pca_features"),
            score_col: profiled_env_or(p, "SCORE_COL", "anomaly_score"),
            error_col: profiled_env_opt(p, "ERROR_COL"),
            center: profiled_env_bool(p, "PCA_CENTER", false),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub model_path: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let model_path = profiled_env_opt(p, "MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("model.json"));
        Self {
            data_dir,
            model_path,
        }
    }
}

// ── Runtime ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of scoring threads. 0 = all cores.
    pub worker_threads: usize,
}

impl RuntimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_usize(p, "WORKER_THREADS", 0),
        }
    }
}
