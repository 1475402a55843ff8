// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`WorkspaceConfig`] is what a file on disk may contain (every field
//! optional, camelCase). [`ResolvedConfig`] is the merged result with every
//! value set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::tools::DEFAULT_ALLOWED_COMMANDS;

/// How tasks are assigned to backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendMode {
    /// High priority to the CLI process, the rest to the API when available.
    #[default]
    Auto,
    ProcessOnly,
    ApiOnly,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::ProcessOnly => "processOnly",
            Self::ApiOnly => "apiOnly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BackendMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "auto" => Ok(Self::Auto),
            "processonly" | "process" => Ok(Self::ProcessOnly),
            "apionly" | "api" => Ok(Self::ApiOnly),
            _ => Err(ConfigError::invalid(
                "backendMode",
                format!("'{s}' is not one of auto, processOnly, apiOnly"),
            )),
        }
    }
}

/// Fleet configuration as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_mode: Option<BackendMode>,

    /// Concurrency limit, 0 for unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,

    /// Retry budget per task, 0 disables retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,

    /// Agent CLI executable for the process backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_executable: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_args: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_timeout_ms: Option<u64>,

    /// Grace period between the polite and the forced termination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_grace_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_max_turns: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_timeout_ms: Option<u64>,

    /// Replaces the default `run_command` allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub backend_mode: BackendMode,
    pub max_concurrent: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub cli_executable: String,
    pub cli_args: Vec<String>,
    pub process_timeout_ms: u64,
    pub kill_grace_ms: u64,
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_max_turns: u32,
    pub api_timeout_ms: u64,
    pub allowed_commands: Vec<String>,
    pub snapshot_path: PathBuf,
}

/// Platform name of the agent CLI. Windows installs it as a `.cmd` shim.
pub fn default_cli_executable() -> &'static str {
    if cfg!(windows) {
        "claude.cmd"
    } else {
        "claude"
    }
}

/// Non-interactive, tool-scoped, line-delimited JSON output.
pub fn default_cli_args() -> Vec<String> {
    [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--allowedTools",
        "Read,Edit,Write,Glob,Grep,Bash(git:*),Bash(npm:*),Bash(cargo:*)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `~/.fleet/sessions.json`, or a relative fallback without a home directory.
pub fn default_snapshot_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".fleet"))
        .unwrap_or_else(|| PathBuf::from(".fleet"))
        .join("sessions.json")
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            backend_mode: BackendMode::Auto,
            max_concurrent: 3,
            max_retries: 1,
            retry_base_delay_ms: 30_000,
            cli_executable: default_cli_executable().to_string(),
            cli_args: default_cli_args(),
            process_timeout_ms: 600_000,
            kill_grace_ms: 5_000,
            provider: "anthropic".to_string(),
            model: None,
            base_url: None,
            api_max_turns: 30,
            api_timeout_ms: 600_000,
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl ResolvedConfig {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 0 && self.retry_base_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "retryBaseDelayMs",
                "must be positive when retries are enabled",
            ));
        }
        if self.process_timeout_ms == 0 {
            return Err(ConfigError::invalid("processTimeoutMs", "must be positive"));
        }
        if self.api_timeout_ms == 0 {
            return Err(ConfigError::invalid("apiTimeoutMs", "must be positive"));
        }
        if self.api_max_turns == 0 {
            return Err(ConfigError::invalid("apiMaxTurns", "must be positive"));
        }
        if self.cli_executable.trim().is_empty() {
            return Err(ConfigError::invalid("cliExecutable", "must not be empty"));
        }
        if self.allowed_commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::invalid("allowedCommands", "entries must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_camel_case() {
        let json = r#"{"backendMode": "apiOnly", "maxConcurrent": 0, "retryBaseDelayMs": 500}"#;
        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.backend_mode, Some(BackendMode::ApiOnly));
        assert_eq!(config.max_concurrent, Some(0));
        assert_eq!(config.retry_base_delay_ms, Some(500));
        assert!(config.cli_args.is_none());
    }

    #[test]
    fn test_unknown_backend_mode_fails_to_parse() {
        let json = r#"{"backendMode": "sometimes"}"#;
        assert!(serde_json::from_str::<WorkspaceConfig>(json).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = WorkspaceConfig {
            backend_mode: Some(BackendMode::ProcessOnly),
            allowed_commands: Some(vec!["git".to_string()]),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("backendMode: processOnly"));
        let parsed: WorkspaceConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.backend_mode, BackendMode::Auto);
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_base_delay_ms, 30_000);
        assert!(config.snapshot_path.ends_with(".fleet/sessions.json"));
        assert!(config.allowed_commands.contains(&"git".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResolvedConfig::default();
        config.retry_base_delay_ms = 0;
        assert!(config.validate().is_err());
        config.max_retries = 0;
        assert!(config.validate().is_ok());

        let mut config = ResolvedConfig::default();
        config.api_max_turns = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("apiMaxTurns"));

        let mut config = ResolvedConfig::default();
        config.cli_executable = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_mode_from_str() {
        assert_eq!("auto".parse::<BackendMode>().unwrap(), BackendMode::Auto);
        assert_eq!("process-only".parse::<BackendMode>().unwrap(), BackendMode::ProcessOnly);
        assert_eq!("apiOnly".parse::<BackendMode>().unwrap(), BackendMode::ApiOnly);
        assert!("sometimes".parse::<BackendMode>().is_err());
        assert_eq!(BackendMode::ProcessOnly.to_string(), "processOnly");
    }
}
