use crate::error::Result;
use crate::paths;
use crate::retry::RetryPolicy;
use crate::types::Model;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// How the prompt is written to the agent's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// The prompt text as-is.
    #[default]
    Text,
    /// A single stream-json user message.
    StreamJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_model")]
    pub default_model: Model,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub input_format: InputFormat,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Names of caller environment variables forwarded to the agent. Nothing
    /// else from the caller's environment reaches the subprocess.
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
}

fn default_executable() -> String {
    "claude".to_string()
}

fn default_model() -> Model {
    Model::Sonnet
}

fn default_timeout_seconds() -> u64 {
    30 * 60
}

fn default_permission_mode() -> Option<String> {
    Some("bypassPermissions".to_string())
}

fn default_env_allowlist() -> Vec<String> {
    [
        "ANTHROPIC_API_KEY",
        "CLAUDE_CODE_PATH",
        "CLAUDE_BASH_MAINTAIN_PROJECT_WORKING_DIR",
        "GH_TOKEN",
        "HOME",
        "USER",
        "PATH",
        "SHELL",
        "TERM",
        "LANG",
        "LC_ALL",
        "TMPDIR",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            default_model: default_model(),
            timeout_seconds: default_timeout_seconds(),
            input_format: InputFormat::default(),
            permission_mode: default_permission_mode(),
            extra_args: Vec::new(),
            env_allowlist: default_env_allowlist(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// PortsConfig / WorktreeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_backend_base")]
    pub backend_base: u16,
    #[serde(default = "default_frontend_base")]
    pub frontend_base: u16,
    #[serde(default = "default_slots")]
    pub slots: u16,
    /// Bind-test each port before claiming its slot.
    #[serde(default = "default_probe")]
    pub probe: bool,
}

fn default_backend_base() -> u16 {
    9100
}

fn default_frontend_base() -> u16 {
    9200
}

fn default_slots() -> u16 {
    15
}

fn default_probe() -> bool {
    true
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            backend_base: default_backend_base(),
            frontend_base: default_frontend_base(),
            slots: default_slots(),
            probe: default_probe(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Relative to the project root.
    #[serde(default = "default_trees_dir")]
    pub dir: String,
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
}

fn default_trees_dir() -> String {
    ".adw/trees".to_string()
}

fn default_base_ref() -> String {
    "HEAD".to_string()
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            dir: default_trees_dir(),
            base_ref: default_base_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub worktrees: WorktreeConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            ports: PortsConfig::default(),
            worktrees: WorktreeConfig::default(),
        }
    }
}

impl Config {
    /// Load `.adw/config.yaml`, falling back to defaults when it is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        } else if self.retry.max_attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_attempts={} (>10 is unusual)",
                    self.retry.max_attempts
                ),
            });
        }

        if self.retry.multiplier < 1.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.multiplier={} shrinks the delay between attempts",
                    self.retry.multiplier
                ),
            });
        }

        if self.agent.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.ports.slots == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ports.slots must be greater than 0".to_string(),
            });
        }

        let slots = u32::from(self.ports.slots);
        for (name, base) in [
            ("backend_base", self.ports.backend_base),
            ("frontend_base", self.ports.frontend_base),
        ] {
            // Slot i uses base + i, so the highest port is base + slots - 1.
            if slots > 0 && u32::from(base) + slots - 1 > u32::from(u16::MAX) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("ports.{name}={base} + {slots} slots overflows the port range"),
                });
            }
        }

        let (b, f) = (
            u32::from(self.ports.backend_base),
            u32::from(self.ports.frontend_base),
        );
        if b < f + slots && f < b + slots {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ports.backend_base and ports.frontend_base ranges overlap".to_string(),
            });
        }

        if !self.agent.env_allowlist.iter().any(|v| v == "PATH") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "agent.env_allowlist does not include PATH".to_string(),
            });
        }

        warnings
    }

    /// True when any warning is an error.
    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
