// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Precedence, highest first: CLI options, local file, workspace file,
//! global file, defaults.

use std::path::PathBuf;

use super::types::{BackendMode, ResolvedConfig, WorkspaceConfig};

/// Command-line (and `FLEET_*` environment) overrides.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub backend_mode: Option<BackendMode>,
    pub max_concurrent: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub cli_executable: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub snapshot_path: Option<PathBuf>,
}

pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge every source into one resolved configuration.
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, config);
    }
    apply_cli_options(&mut result, cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: WorkspaceConfig) {
    macro_rules! take {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = config.$field {
                result.$field = value;
            })*
        };
    }

    take!(
        backend_mode,
        max_concurrent,
        max_retries,
        retry_base_delay_ms,
        cli_executable,
        cli_args,
        process_timeout_ms,
        kill_grace_ms,
        provider,
        api_max_turns,
        api_timeout_ms,
        allowed_commands,
        snapshot_path,
    );

    if config.model.is_some() {
        result.model = config.model;
    }
    if config.base_url.is_some() {
        result.base_url = config.base_url;
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: CliOptions) {
    if let Some(mode) = cli.backend_mode {
        result.backend_mode = mode;
    }
    if let Some(n) = cli.max_concurrent {
        result.max_concurrent = n;
    }
    if let Some(n) = cli.max_retries {
        result.max_retries = n;
    }
    if let Some(ms) = cli.retry_base_delay_ms {
        result.retry_base_delay_ms = ms;
    }
    if let Some(exe) = cli.cli_executable {
        result.cli_executable = exe;
    }
    if let Some(provider) = cli.provider {
        result.provider = provider;
    }
    if cli.model.is_some() {
        result.model = cli.model;
    }
    if cli.base_url.is_some() {
        result.base_url = cli.base_url;
    }
    if let Some(path) = cli.snapshot_path {
        result.snapshot_path = path;
    }
}
