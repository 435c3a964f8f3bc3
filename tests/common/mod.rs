#![allow(dead_code)]

use rustchase::application::retry::RetryPolicy;
use rustchase::config::{Config, EndpointConfig, HumanizeConfig, TimeoutConfig};
use std::path::Path;
use std::time::Duration;

/// Config with millisecond waits, no typing jitter and no retry backoff.
pub fn fast_config(profile_dir: &Path) -> Config {
    let ms = Duration::from_millis;
    let mut config = Config {
        timeouts: TimeoutConfig {
            login_fields: ms(5),
            probe: ms(5),
            challenge_probe: ms(5),
            push_probe: ms(5),
            push_approval_window: ms(40),
            code_landing_window: ms(40),
            landing_poll_interval: ms(1),
            settle: Duration::ZERO,
            response: ms(20),
            order_page_load: ms(5),
            symbol_lookup: ms(5),
        },
        retry: RetryPolicy::default().without_backoff(),
        profile_dir: profile_dir.to_path_buf(),
        profile: None,
        ..Config::default()
    };
    config.browser.humanize = HumanizeConfig::disabled();
    config
}

pub fn endpoints() -> EndpointConfig {
    EndpointConfig::default()
}
