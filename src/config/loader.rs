// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from JSON and YAML files.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{BackendMode, WorkspaceConfig};

/// Workspace config file names, searched in order.
pub const CONFIG_FILES: &[&str] = &[
    ".fleet.json",
    ".fleet/config.json",
    "fleet.config.json",
    "fleet.config.yaml",
];

/// Per-directory overrides, not meant to be committed.
pub const LOCAL_CONFIG_FILE: &str = ".fleet.local.json";

pub const GLOBAL_CONFIG_DIR: &str = ".fleet";

pub const GLOBAL_CONFIG_FILE: &str = "config.json";

pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load `~/.fleet/config.json` if present.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    match get_global_config_path() {
        Some(path) if path.exists() => load_config_file(&path).map(Some),
        _ => Ok(None),
    }
}

/// Load the first workspace config file found under `workspace_root`.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file, choosing the format by extension.
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Write a workspace config as pretty JSON.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(filename.unwrap_or(CONFIG_FILES[0]));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Create `.fleet.json` from `config` or the example configuration.
///
/// Refuses to overwrite an existing file.
pub fn init_config(workspace_root: &Path, config: Option<WorkspaceConfig>) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(CONFIG_FILES[0]);
    if path.exists() {
        return Err(ConfigError::invalid(
            "path",
            format!("{} already exists", path.display()),
        ));
    }
    save_workspace_config(workspace_root, &config.unwrap_or_else(get_example_config), None)
}

/// Walk up from `start` to the first directory holding a config file.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| CONFIG_FILES.iter().any(|f| dir.join(f).exists()))
        .map(Path::to_path_buf)
}

pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        backend_mode: Some(BackendMode::Auto),
        max_concurrent: Some(3),
        max_retries: Some(1),
        retry_base_delay_ms: Some(30_000),
        process_timeout_ms: Some(600_000),
        api_max_turns: Some(30),
        ..Default::default()
    }
}
