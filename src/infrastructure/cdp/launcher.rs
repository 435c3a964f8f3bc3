use crate::config::BrowserConfig;
use crate::infrastructure::core::HttpClientFactory;
use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info};

const CHROME_CANDIDATES: [&str; 4] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

const TARGET_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A running Chrome process and the DevTools socket of its first tab.
pub(crate) struct LaunchedBrowser {
    pub child: Child,
    pub ws_url: String,
}

pub(crate) async fn launch(config: &BrowserConfig) -> Result<LaunchedBrowser> {
    let executable = find_executable(config)?;

    // Remote debugging refuses the default profile directory
    let mut config = config.clone();
    if config.user_data_dir.is_none() {
        config.user_data_dir = Some(
            env::temp_dir().join(format!("rustchase-chrome-{}", std::process::id())),
        );
    }

    info!(
        "Launching {:?} (headless: {}, docker: {}, port {})",
        executable, config.headless, config.docker, config.debugging_port
    );
    let mut child = Command::new(&executable)
        .args(config.launch_args())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {:?}", executable))?;

    match wait_for_target(config.debugging_port, config.startup_timeout).await {
        Ok(ws_url) => {
            info!("Browser ready at {}", ws_url);
            Ok(LaunchedBrowser { child, ws_url })
        }
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

fn find_executable(config: &BrowserConfig) -> Result<PathBuf> {
    if let Some(path) = &config.executable {
        if path.is_file() {
            return Ok(path.clone());
        }
        bail!("Configured browser executable {:?} does not exist", path);
    }

    let path_var = env::var_os("PATH").unwrap_or_default();
    search_path(env::split_paths(&path_var), &CHROME_CANDIDATES).with_context(|| {
        format!(
            "No Chrome or Chromium found on PATH (tried {}); set RUSTCHASE_CHROME_PATH",
            CHROME_CANDIDATES.join(", ")
        )
    })
}

fn search_path(dirs: impl Iterator<Item = PathBuf>, names: &[&str]) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = dirs.collect();
    names.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Poll the DevTools HTTP endpoint until a page target is listed.
async fn wait_for_target(port: u16, timeout: Duration) -> Result<String> {
    let client = HttpClientFactory::create_local_client();
    let list_url = format!("http://127.0.0.1:{}/json/list", port);
    let deadline = Instant::now() + timeout;

    loop {
        match client.get(&list_url).send().await {
            Ok(response) => {
                if let Ok(targets) = response.json::<Value>().await
                    && let Some(ws_url) = page_target(&targets)
                {
                    return Ok(ws_url);
                }
            }
            Err(e) => debug!("DevTools endpoint not up yet: {}", e),
        }

        if Instant::now() >= deadline {
            bail!(
                "Browser did not expose a page target on port {} within {}s",
                port,
                timeout.as_secs()
            );
        }
        tokio::time::sleep(TARGET_POLL_INTERVAL).await;
    }
}

/// Websocket URL of the first `page` target in a `/json/list` reply.
fn page_target(targets: &Value) -> Option<String> {
    targets.as_array()?.iter().find_map(|target| {
        if target.get("type").and_then(Value::as_str) != Some("page") {
            return None;
        }
        target
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_target_skips_workers() {
        let targets = json!([
            {"type": "service_worker", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/sw"},
            {"type": "page", "url": "about:blank", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A"}
        ]);
        assert_eq!(
            page_target(&targets).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A")
        );
    }

    #[test]
    fn test_page_target_absent() {
        assert_eq!(page_target(&json!([])), None);
        assert_eq!(page_target(&json!({"type": "page"})), None);
    }

    #[test]
    fn test_search_path_prefers_candidate_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chromium"), b"").unwrap();
        std::fs::write(dir.path().join("google-chrome"), b"").unwrap();

        let found = search_path(vec![dir.path().to_path_buf()].into_iter(), &CHROME_CANDIDATES);
        assert_eq!(found, Some(dir.path().join("google-chrome")));

        let empty = tempfile::tempdir().unwrap();
        assert_eq!(
            search_path(vec![empty.path().to_path_buf()].into_iter(), &CHROME_CANDIDATES),
            None
        );
    }

    #[test]
    fn test_missing_configured_executable() {
        let config = BrowserConfig {
            executable: Some(PathBuf::from("/definitely/not/chrome")),
            ..BrowserConfig::default()
        };
        assert!(find_executable(&config).is_err());
    }
}
