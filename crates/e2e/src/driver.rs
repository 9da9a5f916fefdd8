//! Playwright browser automation over a long-lived Node.js bridge

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{Command as StdCommand, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::protocol::{Automation, BrowserKind, Command, Request, Response};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Number of bridge stderr lines kept for launch diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// Options for launching the browser process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Browser engine
    pub browser: BrowserKind,

    /// Run without a visible window
    pub headless: bool,

    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory `playwright` is resolved from
    pub node_project_dir: PathBuf,

    pub launch_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            node_project_dir: PathBuf::from("."),
            launch_timeout_ms: 60_000,
            command_timeout_ms: 30_000,
        }
    }
}

/// Playwright driver handle.
///
/// Owns the bridge process; one request is in flight at a time.
pub struct PlaywrightDriver {
    bridge: Mutex<Bridge>,
    command_timeout: Duration,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,

    /// Keeps the staged bridge script alive
    _script_dir: tempfile::TempDir,
}

struct Bridge {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl PlaywrightDriver {
    /// Spawn the bridge and launch the browser.
    ///
    /// Every failure here is fatal for the run and is reported as
    /// [`E2eError::PlaywrightNotFound`] or [`E2eError::BrowserLaunch`].
    pub async fn launch(options: &LaunchOptions) -> E2eResult<Self> {
        Self::check_playwright_installed(options)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new(&options.node_binary)
            .arg(&script_path)
            .current_dir(&options.node_project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::BrowserLaunch(format!(
                    "failed to spawn {}: {}",
                    options.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::BrowserLaunch("bridge stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::BrowserLaunch("bridge stderr unavailable".to_string()))?;

        let stderr_tail = Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        tokio::spawn(forward_stderr(stderr, Arc::clone(&stderr_tail)));

        let driver = Self {
            bridge: Mutex::new(Bridge {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 1,
            }),
            command_timeout: Duration::from_millis(options.command_timeout_ms),
            stderr_tail,
            _script_dir: script_dir,
        };

        let launch = Command::Launch {
            browser: options.browser,
            headless: options.headless,
        };
        let timeout = Duration::from_millis(options.launch_timeout_ms);

        match driver.call(&launch, timeout).await {
            Ok(reply) => {
                let version = reply
                    .get("version")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!(
                    "Launched {} {} (headless: {})",
                    options.browser.as_str(),
                    version,
                    options.headless
                );
                Ok(driver)
            }
            Err(e) => {
                let diagnostics = driver.stderr_tail();
                driver.shutdown().await;
                Err(E2eError::BrowserLaunch(if diagnostics.is_empty() {
                    e.to_string()
                } else {
                    format!("{}\n{}", e, diagnostics)
                }))
            }
        }
    }

    /// Check that Node.js can resolve the `playwright` package
    pub fn check_playwright_installed(options: &LaunchOptions) -> E2eResult<()> {
        let status = StdCommand::new(&options.node_binary)
            .args(["-e", "require.resolve('playwright')"])
            .current_dir(&options.node_project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Send one command and wait for its reply
    async fn call(&self, command: &Command, limit: Duration) -> E2eResult<Value> {
        let mut guard = self.bridge.lock().await;
        let bridge = &mut *guard;

        let id = bridge.next_id;
        bridge.next_id += 1;

        let name = command.name();
        debug!(id, command = %name, "-> bridge");

        match tokio::time::timeout(limit, exchange(bridge, id, command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Bridge command '{}' timed out after {:?}", name, limit);
                Err(E2eError::Timeout(name))
            }
        }
    }

    fn stderr_tail(&self) -> String {
        match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }

    /// Stop the bridge process
    pub async fn shutdown(&self) {
        let mut bridge = self.bridge.lock().await;

        // EOF on stdin makes the bridge close the browser and exit
        drop(bridge.stdin.take());

        match tokio::time::timeout(Duration::from_secs(5), bridge.child.wait()).await {
            Ok(Ok(status)) => debug!("Bridge exited with {}", status),
            _ => terminate(&mut bridge.child).await,
        }
    }
}

#[async_trait]
impl Automation for PlaywrightDriver {
    async fn execute(&self, command: Command) -> E2eResult<Value> {
        let result = self.call(&command, self.command_timeout).await;
        if matches!(command, Command::Close) {
            self.shutdown().await;
        }
        result
    }
}

async fn exchange(bridge: &mut Bridge, id: u64, command: &Command) -> E2eResult<Value> {
    let mut line = serde_json::to_string(&Request { id, command })?;
    line.push('\n');

    let stdin = bridge
        .stdin
        .as_mut()
        .ok_or_else(|| E2eError::Driver("bridge input already closed".to_string()))?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;

    loop {
        let raw = match bridge.stdout.next_line().await? {
            Some(raw) => raw,
            None => {
                return Err(E2eError::Driver(format!(
                    "bridge exited while waiting for {}",
                    command.name()
                )))
            }
        };

        let response: Response = match serde_json::from_str(&raw) {
            Ok(response) => response,
            Err(_) => {
                debug!("Ignoring non-protocol bridge output: {}", raw);
                continue;
            }
        };

        // A reply to a command that previously timed out
        if response.id < id {
            debug!("Discarding stale bridge reply {}", response.id);
            continue;
        }
        if response.id != id {
            return Err(E2eError::Protocol(format!(
                "expected reply {} but received {}",
                id, response.id
            )));
        }

        return match response.error {
            Some(message) => Err(E2eError::Driver(message)),
            None => Ok(response.result),
        };
    }
}

async fn forward_stderr(stderr: ChildStderr, tail: Arc<StdMutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "playwright", "{}", line);
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_millis(500), child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill Playwright bridge: {}", e);
    }
}
