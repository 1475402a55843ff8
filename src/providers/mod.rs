// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hosted chat providers used by the API backend.
//!
//! Only Anthropic is wired up. The key comes from `ANTHROPIC_API_KEY` or
//! `FLEET_API_KEY`; without one the API backend is unavailable.

pub mod anthropic;

pub use anthropic::{AnthropicConfig, AnthropicProvider};

use std::sync::Arc;
use std::time::Duration;

use crate::config::ResolvedConfig;
use crate::error::ProviderError;
use crate::types::SharedProvider;

/// Environment variables checked for an API key, in order.
pub const API_KEY_VARS: &[&str] = &["ANTHROPIC_API_KEY", "FLEET_API_KEY"];

/// Supported provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Anthropic,
}

impl std::str::FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(ProviderError::NotConfigured(format!("unknown provider '{other}'"))),
        }
    }
}

/// First non-empty API key found in the environment.
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty())
}

/// Build the provider described by `config`, using `api_key`.
pub fn create_provider(config: &ResolvedConfig, api_key: &str) -> Result<SharedProvider, ProviderError> {
    match config.provider.parse::<ProviderType>()? {
        ProviderType::Anthropic => {
            let mut settings = AnthropicConfig::new(api_key)
                .with_timeout(Duration::from_millis(config.api_timeout_ms));
            if let Some(model) = &config.model {
                settings = settings.with_model(model);
            }
            if let Some(url) = &config.base_url {
                settings = settings.with_base_url(url);
            }
            Ok(Arc::new(AnthropicProvider::new(settings)?))
        }
    }
}

/// Provider from config plus environment, or `None` when no key is set.
pub fn provider_from_env(config: &ResolvedConfig) -> Result<Option<SharedProvider>, ProviderError> {
    match api_key_from_env() {
        Some(key) => create_provider(config, &key).map(Some),
        None => Ok(None),
    }
}
