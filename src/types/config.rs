//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every key is optional:
//!
//! ```toml
//! max_depth = 50
//! post_retries = 5
//! post_backoff = "50ms"
//! stream_poll_interval = "50ms"
//! continue_after_rejection = false
//! default_policy = "ask"
//!
//! [[policies]]
//! tool = "read_*"
//! policy = "auto"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::permissions::{PolicyRule, ToolPolicy};

/// Default maximum resumption depth.
pub const DEFAULT_MAX_DEPTH: u32 = 50;

/// Default number of `post` delivery attempts.
pub const DEFAULT_POST_RETRIES: u32 = 5;

/// Settings for the orchestration engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use toolflow::permissions::ToolPolicy;
/// use toolflow::types::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_max_depth(10)
///     .with_default_policy(ToolPolicy::Auto)
///     .with_stream_poll_interval(Duration::from_millis(5));
/// assert_eq!(config.max_depth, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum resumption depth before the tool loop halts.
    pub max_depth: u32,

    /// Attempts made by `post` before giving up.
    pub post_retries: u32,

    /// Base delay between `post` attempts, doubled each retry.
    #[serde(with = "duration_str")]
    pub post_backoff: Duration,

    /// How often a stream request polls for new chunks.
    #[serde(with = "duration_str")]
    pub stream_poll_interval: Duration,

    /// Resume the model after the user rejects a tool call.
    pub continue_after_rejection: bool,

    /// Policy for tools with no matching rule and no tool default.
    pub default_policy: ToolPolicy,

    /// Per-tool policy rules, first match wins.
    pub policies: Vec<PolicyRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            post_retries: DEFAULT_POST_RETRIES,
            post_backoff: Duration::from_millis(50),
            stream_poll_interval: Duration::from_millis(50),
            continue_after_rejection: false,
            default_policy: ToolPolicy::Ask,
            policies: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> FlowResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| FlowError::config_io(path.display().to_string(), e.to_string()))?;
        Self::from_toml(&content)
            .map_err(|e| FlowError::config_parse(path.display().to_string(), e.to_string()))
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the text is invalid.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Returns the default config file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn default_path() -> FlowResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "toolflow", "toolflow")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_post_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.post_retries = retries;
        self.post_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_stream_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_continue_after_rejection(mut self, enabled: bool) -> Self {
        self.continue_after_rejection = enabled;
        self
    }

    #[must_use]
    pub fn with_default_policy(mut self, policy: ToolPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Appends a policy rule.
    #[must_use]
    pub fn with_policy(mut self, tool: impl Into<String>, policy: ToolPolicy) -> Self {
        self.policies.push(PolicyRule::new(tool, policy));
        self
    }
}

/// Serializes durations as humantime strings such as `"50ms"`.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
