// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for the fleet.
//!
//! Sources, merged with precedence CLI > local > workspace > global > defaults:
//! - Global config: ~/.fleet/config.json
//! - Workspace config: .fleet.json, .fleet/config.json, fleet.config.json or
//!   fleet.config.yaml
//! - Local config: .fleet.local.json (personal overrides)
//! - CLI options and `FLEET_*` environment variables

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    default_cli_args, default_cli_executable, default_snapshot_path, BackendMode, ResolvedConfig,
    WorkspaceConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate every configuration source for a workspace.
pub fn load_config(workspace_root: &Path, cli_options: CliOptions) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    config.validate()?;
    Ok(config)
}
