//! Configuration module for rustchase.
//!
//! Structured configuration loading from environment variables (and an
//! optional `.env` file), organized by concern: endpoints, browser, timing,
//! retry and logging.

mod browser_config;
mod endpoint_config;
mod observability_config;

pub use browser_config::{BrowserConfig, DEFAULT_USER_AGENT, HumanizeConfig, TimeoutConfig};
pub(crate) use browser_config::env_parse;
pub use endpoint_config::EndpointConfig;
pub use observability_config::{DEFAULT_LOG_FILTER, ObservabilityEnvConfig};

use crate::application::retry::RetryPolicy;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Main configuration.
///
/// Aggregates the per-concern configs. Everything a session needs is carried
/// here and injected, so an endpoint or timing change is a single
/// substitution point.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: EndpointConfig,
    pub browser: BrowserConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
    pub observability: ObservabilityEnvConfig,
    /// Directory holding `<profile>.json` storage-state files.
    pub profile_dir: PathBuf,
    /// Profile to load on open and save on close. No persistence when unset.
    pub profile: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            observability: ObservabilityEnvConfig::default(),
            profile_dir: PathBuf::from("profiles"),
            profile: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let endpoints = EndpointConfig::from_env().context("Failed to load endpoint config")?;
        let profile_dir = env::var("RUSTCHASE_PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("profiles"));
        let profile = env::var("RUSTCHASE_PROFILE")
            .ok()
            .filter(|name| !name.trim().is_empty());

        Ok(Self {
            endpoints,
            browser: BrowserConfig::from_env(),
            timeouts: TimeoutConfig::from_env(),
            retry: RetryPolicy::from_env(),
            observability: ObservabilityEnvConfig::from_env(),
            profile_dir,
            profile,
        })
    }

    /// Read `.env` when present, then the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_defaults() {
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.retry.max_attempts, RetryPolicy::default().max_attempts);
        assert_eq!(config.endpoints.account_info.len(), 2);
    }

    #[test]
    fn test_with_profile() {
        let config = Config::default().with_profile("main");
        assert_eq!(config.profile.as_deref(), Some("main"));
        assert_eq!(config.profile_dir, PathBuf::from("profiles"));
    }
}
