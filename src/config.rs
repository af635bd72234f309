//! Configuration file support for taskdash
//!
//! Config is loaded from `~/.taskdash/config.toml` (or `$TASKDASH_HOME/config.toml`)
//! Environment variables override config file settings.

use crate::retry::RetryPolicy;
use crate::storage::taskdash_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global config instance (loaded once on first access)
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::load)
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Hosted backend connection
    pub backend: BackendConfig,

    /// Refresh timing
    pub sync: SyncConfig,

    /// Toast queue
    pub notifications: NotificationsConfig,

    /// Task behavior toggles
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Project URL, e.g. "https://abc.supabase.co"
    pub url: Option<String>,
    /// Public anon key sent as `apikey`
    pub anon_key: Option<String>,
    /// Bearer token of the signed-in user
    pub token: Option<String>,
    /// Id of the signed-in user
    pub user_id: Option<String>,
    /// Per-request timeout for reads (default: 10000)
    pub read_timeout_ms: u64,
    /// Per-request timeout for writes (default: 5000)
    pub write_timeout_ms: u64,
    /// Extra attempts for failed reads (default: 2)
    pub read_retries: u32,
    /// Pause between read attempts (default: 500)
    pub retry_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            token: None,
            user_id: None,
            read_timeout_ms: 10_000,
            write_timeout_ms: 5_000,
            read_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl BackendConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.read_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet window before a burst of changes triggers a refetch (default: 300)
    pub debounce_ms: u64,
    /// Longest the blocking spinner may stay on (default: 15000)
    pub watchdog_ms: u64,
    /// Profile lookups after sign-in (default: 5)
    pub profile_retries: u32,
    pub profile_retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            watchdog_ms: 15_000,
            profile_retries: 5,
            profile_retry_delay_ms: 500,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn profile_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.profile_retries,
            Duration::from_millis(self.profile_retry_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Toasts shown at once; the rest wait in a queue (default: 3)
    pub max_visible: usize,
    /// File under the taskdash dir holding pending notifications
    pub store_file: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            max_visible: crate::notifications::DEFAULT_MAX_VISIBLE,
            store_file: "notifications.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TasksConfig {
    /// Drop the urgent flag when a task is marked done (default: false,
    /// the flag is kept and only its highlight is hidden)
    pub clear_urgent_on_done: bool,
}

impl Config {
    /// Get the config file path
    pub fn path() -> Option<PathBuf> {
        taskdash_dir().ok().map(|d| d.join("config.toml"))
    }

    /// Load config from file, with environment variable overrides
    pub fn load() -> Self {
        let mut config = Self::path()
            .and_then(|p| Self::load_from_file(&p))
            .unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// Load from an explicit path, with environment overrides
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::load_from_file(path).unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// Load config from file only (no env overrides)
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<Self>(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                crate::logging::error(&format!("Failed to parse config file: {}", e));
                None
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Backend
        if let Some(v) = var("TASKDASH_URL") {
            self.backend.url = Some(v);
        }
        if let Some(v) = var("TASKDASH_ANON_KEY") {
            self.backend.anon_key = Some(v);
        }
        if let Some(v) = var("TASKDASH_TOKEN") {
            self.backend.token = Some(v);
        }
        if let Some(v) = var("TASKDASH_USER_ID") {
            self.backend.user_id = Some(v);
        }
        if let Some(ms) = var("TASKDASH_READ_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.backend.read_timeout_ms = ms;
        }
        if let Some(ms) = var("TASKDASH_WRITE_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.backend.write_timeout_ms = ms;
        }

        // Sync
        if let Some(ms) = var("TASKDASH_DEBOUNCE_MS").and_then(|v| v.trim().parse().ok()) {
            self.sync.debounce_ms = ms;
        }
        if let Some(ms) = var("TASKDASH_WATCHDOG_MS").and_then(|v| v.trim().parse().ok()) {
            self.sync.watchdog_ms = ms;
        }

        // Notifications
        if let Some(n) = var("TASKDASH_MAX_VISIBLE").and_then(|v| v.trim().parse::<usize>().ok()) {
            if n > 0 {
                self.notifications.max_visible = n;
            }
        }

        // Tasks
        if let Some(v) = var("TASKDASH_CLEAR_URGENT_ON_DONE") {
            if let Some(parsed) = parse_env_bool(&v) {
                self.tasks.clear_urgent_on_done = parsed;
            }
        }
    }

    /// Create a default config file with comments. An existing file is left alone.
    pub fn create_default_config_file() -> anyhow::Result<PathBuf> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("No config path"))?;
        if path.exists() {
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let default_content = r#"# taskdash configuration file
# Location: ~/.taskdash/config.toml
#
# Environment variables override these settings.

[backend]
# url = "https://your-project.supabase.co"
# anon_key = "..."
# token = "..."      # or TASKDASH_TOKEN
# user_id = "..."    # or TASKDASH_USER_ID
read_timeout_ms = 10000
write_timeout_ms = 5000
read_retries = 2
retry_delay_ms = 500

[sync]
debounce_ms = 300
watchdog_ms = 15000
profile_retries = 5
profile_retry_delay_ms = 500

[notifications]
max_visible = 3
store_file = "notifications.json"

[tasks]
# Clear the urgent flag when a task is completed
clear_urgent_on_done = false
"#;

        std::fs::write(&path, default_content)?;
        Ok(path)
    }

    /// Get config as a formatted string for display
    pub fn display_string(&self) -> String {
        let path = Self::path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            r#"Configuration ({})

Backend:
- URL: {}
- Signed in as: {}
- Read timeout: {}ms ({} retries, {}ms apart)
- Write timeout: {}ms

Sync:
- Debounce: {}ms
- Watchdog: {}ms

Notifications:
- Visible at once: {}
- Store file: {}

Tasks:
- Clear urgent on done: {}"#,
            path,
            self.backend.url.as_deref().unwrap_or("(not set)"),
            self.backend.user_id.as_deref().unwrap_or("(nobody)"),
            self.backend.read_timeout_ms,
            self.backend.read_retries,
            self.backend.retry_delay_ms,
            self.backend.write_timeout_ms,
            self.sync.debounce_ms,
            self.sync.watchdog_ms,
            self.notifications.max_visible,
            self.notifications.store_file,
            self.tasks.clear_urgent_on_done,
        )
    }
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
