//! Browser launch and session timing configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// How the Chrome process is started
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium binary; searched on `PATH` when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Container-friendly flags (no sandbox, no GPU, no /dev/shm).
    pub docker: bool,
    pub debugging_port: u16,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
    /// Chrome user data directory. A fresh temporary profile when unset.
    pub user_data_dir: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub humanize: HumanizeConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            docker: false,
            debugging_port: 9222,
            window_width: 1920,
            window_height: 1080,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            user_data_dir: None,
            startup_timeout: Duration::from_secs(20),
            humanize: HumanizeConfig::default(),
        }
    }
}

impl BrowserConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            executable: env::var("RUSTCHASE_CHROME_PATH").ok().map(PathBuf::from),
            headless: env_parse("RUSTCHASE_HEADLESS", defaults.headless),
            docker: env_parse("RUSTCHASE_DOCKER", defaults.docker),
            debugging_port: env_parse("RUSTCHASE_DEBUGGING_PORT", defaults.debugging_port),
            window_width: env_parse("RUSTCHASE_WINDOW_WIDTH", defaults.window_width),
            window_height: env_parse("RUSTCHASE_WINDOW_HEIGHT", defaults.window_height),
            user_agent: env::var("RUSTCHASE_USER_AGENT").unwrap_or(defaults.user_agent),
            user_data_dir: env::var("RUSTCHASE_USER_DATA_DIR").ok().map(PathBuf::from),
            startup_timeout: Duration::from_secs(env_parse(
                "RUSTCHASE_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout.as_secs(),
            )),
            humanize: HumanizeConfig::from_env(),
        }
    }

    /// Command-line flags for the configured mode.
    pub fn launch_args(&self) -> Vec<String> {
        let window = format!("--window-size={},{}", self.window_width, self.window_height);
        let user_agent = format!("--user-agent={}", self.user_agent);
        let mut args = vec![format!("--remote-debugging-port={}", self.debugging_port)];

        if self.docker {
            args.extend(
                ["--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"].map(String::from),
            );
            args.push(window);
        } else if self.headless {
            args.push("--headless=new".to_string());
            args.push(window);
            args.push(user_agent);
            args.extend(
                [
                    "--disable-site-isolation-trials",
                    "--disable-features=IsolateOrigins,site-per-process",
                    "--disable-session-crashed-bubble",
                    "--disable-infobars",
                    "--no-first-run",
                    "--disable-default-apps",
                    "--disable-extensions",
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                ]
                .map(String::from),
            );
        } else {
            args.push("--start-maximized".to_string());
            args.push(user_agent);
            args.extend(
                [
                    "--disable-session-crashed-bubble",
                    "--disable-infobars",
                    "--disable-features=TranslateUI,VizDisplayCompositor",
                    "--no-first-run",
                    "--disable-default-apps",
                    "--disable-extensions",
                ]
                .map(String::from),
            );
        }

        if let Some(dir) = &self.user_data_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }
        args.push("about:blank".to_string());
        args
    }
}

/// Typing cadence and pointer noise used while entering credentials
#[derive(Debug, Clone)]
pub struct HumanizeConfig {
    pub enabled: bool,
    pub min_keystroke: Duration,
    pub max_keystroke: Duration,
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_keystroke: Duration::from_millis(50),
            max_keystroke: Duration::from_millis(500),
        }
    }
}

impl HumanizeConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_parse("RUSTCHASE_HUMANIZE", defaults.enabled),
            ..defaults
        }
    }
}

/// Per-step waits of the login, fetch and order flows
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Username and password inputs on the login page.
    pub login_fields: Duration,
    /// Short probe for a single control (buttons, warnings, dropdowns).
    pub probe: Duration,
    /// Probe for a two-factor presentation (options list, SMS picker, OTP input).
    pub challenge_probe: Duration,
    /// Probe for the push-approval prompt.
    pub push_probe: Duration,
    /// How long the phone app has to approve a push challenge.
    pub push_approval_window: Duration,
    /// How long the landing page may take after a code is submitted.
    pub code_landing_window: Duration,
    pub landing_poll_interval: Duration,
    /// Pause after navigation and form submission.
    pub settle: Duration,
    /// Wait for an intercepted response.
    pub response: Duration,
    pub order_page_load: Duration,
    pub symbol_lookup: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_fields: Duration::from_secs(30),
            probe: Duration::from_secs(5),
            challenge_probe: Duration::from_secs(15),
            push_probe: Duration::from_secs(2),
            push_approval_window: Duration::from_secs(120),
            code_landing_window: Duration::from_secs(60),
            landing_poll_interval: Duration::from_secs(1),
            settle: Duration::from_secs(2),
            response: Duration::from_secs(30),
            order_page_load: Duration::from_secs(20),
            symbol_lookup: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(env_parse(key, default.as_secs()))
        };
        Self {
            push_approval_window: secs("RUSTCHASE_PUSH_APPROVAL_SECS", d.push_approval_window),
            code_landing_window: secs("RUSTCHASE_CODE_LANDING_SECS", d.code_landing_window),
            response: secs("RUSTCHASE_RESPONSE_TIMEOUT_SECS", d.response),
            ..d
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_config_defaults() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.debugging_port, 9222);
        assert!(config.humanize.enabled);
    }

    #[test]
    fn test_headless_launch_args() {
        let config = BrowserConfig {
            user_data_dir: Some(PathBuf::from("/tmp/profile")),
            ..BrowserConfig::default()
        };
        let args = config.launch_args();
        assert_eq!(args[0], "--remote-debugging-port=9222");
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_docker_launch_args_skip_headless_flag() {
        let config = BrowserConfig {
            docker: true,
            ..BrowserConfig::default()
        };
        let args = config.launch_args();
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(!args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_timeout_defaults_match_site_behaviour() {
        let t = TimeoutConfig::default();
        assert_eq!(t.push_approval_window, Duration::from_secs(120));
        assert_eq!(t.code_landing_window, Duration::from_secs(60));
    }
}
