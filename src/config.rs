use std::path::PathBuf;
use std::time::Duration;

/// Process configuration loaded from environment variables.
pub struct Config {
    pub backend_url: String,
    pub token: Option<String>,
    pub state_dir: PathBuf,
    pub clone_timeout: Duration,
    pub cache_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("SHELLEY_URL").ok().as_deref(),
            std::env::var("SHELLEY_TOKEN").ok().as_deref(),
            std::env::var("SHELLEYFS_STATE_DIR").ok().as_deref(),
            std::env::var("SHELLEYFS_CLONE_TIMEOUT_SECS").ok().as_deref(),
            std::env::var("SHELLEYFS_CACHE_CAP").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        backend_url: Option<&str>,
        token: Option<&str>,
        state_dir: Option<&str>,
        clone_timeout_secs: Option<&str>,
        cache_capacity: Option<&str>,
    ) -> Self {
        let backend_url = backend_url
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "http://localhost:8420".to_string());

        let token = token.filter(|s| !s.is_empty()).map(String::from);

        let state_dir = state_dir
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".shelleyfs")
            });

        let clone_timeout = clone_timeout_secs
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        let cache_capacity = cache_capacity.and_then(|v| v.parse().ok()).unwrap_or(64);

        Config {
            backend_url,
            token,
            state_dir,
            clone_timeout,
            cache_capacity,
        }
    }
}
