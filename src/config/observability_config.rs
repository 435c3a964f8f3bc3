//! Logging configuration parsing from environment variables.

use std::env;

pub const DEFAULT_LOG_FILTER: &str = "rustchase=info,warn";

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    /// `EnvFilter` directive string.
    pub log_filter: String,
    pub ansi: bool,
    /// Include the span target (module path) in each line.
    pub with_target: bool,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            ansi: env::var("RUSTCHASE_LOG_ANSI")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            with_target: env::var("RUSTCHASE_LOG_TARGET")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityEnvConfig::default();
        assert_eq!(config.log_filter, "rustchase=info,warn");
        assert!(config.ansi);
        assert!(config.with_target);
    }
}
