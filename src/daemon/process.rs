use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bulk::AccessMode;
use crate::config::DimConfig;
use crate::error::{constants, DimError, Result};
use crate::protocol::message::Operation;
use crate::transport::address::PeerUrl;
use crate::transport::engine::Engine;
use crate::utils::timeout::{with_timeout_error, PROBE_INTERVAL};

/// Prefix of the line a daemon prints on stdout once it accepts connections
pub const READY_PREFIX: &str = "READY ";

/// Key probed when checking whether a daemon answers
const PING_KEY: &str = "ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// The co-located daemon a client talks to.
///
/// Either a child process this client spawned, which it stops again, or a
/// daemon that was already listening, which it merely attached to.
#[derive(Debug)]
pub struct DaemonProcess {
    url: PeerUrl,
    child: Option<Child>,
    state: DaemonState,
}

impl DaemonProcess {
    /// A daemon someone else started.
    pub fn attached(url: PeerUrl) -> Self {
        Self {
            url,
            child: None,
            state: DaemonState::Running,
        }
    }

    /// Launch the daemon program and wait for its readiness line.
    ///
    /// The daemon may bind a different port than requested (port 0); the
    /// URL it reports is the one recorded.
    pub async fn spawn(config: &DimConfig, url: &PeerUrl) -> Result<Self> {
        let program = config.daemon.program_path()?;

        let mut command = Command::new(&program);
        command
            .arg("--listen")
            .arg(url.to_string())
            .arg("--chunk-size")
            .arg(config.transport.bulk_chunk_size.to_string())
            .arg("--max-object-size")
            .arg(config.transport.max_object_size.to_string())
            .arg("--max-connections")
            .arg(config.daemon.max_connections.to_string())
            .arg("--shutdown-timeout-ms")
            .arg(config.daemon.shutdown_timeout.as_millis().to_string())
            .arg("--bulk-timeout-ms")
            .arg(config.transport.bulk_timeout.as_millis().to_string())
            .arg("--log-level")
            .arg(config.logging.log_level.to_string().to_lowercase())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if config.logging.json_format {
            command.arg("--json-logs");
        }
        if !config.logging.log_to_console {
            command.arg("--quiet");
        }

        let mut process = Self {
            url: url.clone(),
            child: None,
            state: DaemonState::NotStarted,
        };

        let mut child = command.spawn().map_err(|e| {
            DimError::DaemonStartup(format!("cannot launch {}: {e}", program.display()))
        })?;
        let stdout = child.stdout.take();
        process.child = Some(child);
        process.state = DaemonState::Starting;

        let ready = match stdout {
            Some(stdout) => {
                with_timeout_error(read_ready_line(stdout), config.daemon.spawn_timeout).await
            }
            None => Err(DimError::DaemonStartup(
                constants::ERR_MISSING_READY_LINE.to_string(),
            )),
        };

        match ready {
            Ok(reported) => {
                process.url = reported;
                process.state = DaemonState::Running;
                info!(url = %process.url, pid = ?process.pid(), "daemon started");
                Ok(process)
            }
            Err(e) => {
                process.terminate(Duration::ZERO).await;
                Err(match e {
                    DimError::DaemonStartup(_) => e,
                    DimError::Timeout => DimError::DaemonStartup(format!(
                        "daemon did not report readiness within {:?}",
                        config.daemon.spawn_timeout
                    )),
                    other => DimError::DaemonStartup(other.to_string()),
                })
            }
        }
    }

    pub fn url(&self) -> &PeerUrl {
        &self.url
    }

    /// Current lifecycle state; notices a spawned daemon that died.
    pub fn state(&mut self) -> DaemonState {
        if self.state == DaemonState::Running {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(%status, "daemon exited unexpectedly");
                    self.child = None;
                    self.state = DaemonState::Stopped;
                }
            }
        }
        self.state
    }

    /// Whether this handle spawned the daemon and is responsible for stopping it.
    pub fn owns_process(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Wait up to `grace` for the daemon to exit, then kill it.
    ///
    /// Always ends in [`DaemonState::Stopped`].
    pub async fn terminate(&mut self, grace: Duration) {
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "daemon exited"),
                Ok(Err(e)) => warn!(error = %e, "failed to wait for daemon"),
                Err(_) => {
                    debug!("daemon still running, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill daemon");
                    }
                }
            }
        }
        self.state = DaemonState::Stopped;
    }

    /// Stop tracking the daemon, leaving it running.
    pub fn detach(&mut self) {
        if let Some(child) = self.child.take() {
            info!(pid = ?child.id(), "leaving daemon running");
        }
        self.state = DaemonState::Stopped;
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

async fn read_ready_line(stdout: ChildStdout) -> Result<PeerUrl> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = line.trim().strip_prefix(READY_PREFIX) {
            return url.trim().parse().map_err(|_| {
                DimError::DaemonStartup(format!(
                    "{}: {line:?}",
                    constants::ERR_MALFORMED_READY_LINE
                ))
            });
        }
        debug!(%line, "ignoring daemon output");
    }
    Err(DimError::DaemonStartup(
        constants::ERR_MISSING_READY_LINE.to_string(),
    ))
}

/// Poll the daemon at `url` with existence probes until one is answered.
pub async fn wait_for_server(url: &PeerUrl, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut engine = Engine::new(timeout);
    engine.register_rpc(Operation::Exists);

    loop {
        let probe = engine.register(vec![0], AccessMode::WriteOnly);
        let result = engine
            .call(url, Operation::Exists, PING_KEY, 1, Some(probe))
            .await;
        engine.release(&probe);

        match result {
            Ok(_) => return Ok(()),
            Err(e) if Instant::now() >= deadline => {
                debug!(error = %e, "last probe failed");
                return Err(DimError::DaemonStartup(format!(
                    "no daemon answered at {url} within {timeout:?}"
                )));
            }
            Err(_) => tokio::time::sleep(PROBE_INTERVAL).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::address::Protocol;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_wait_for_server_times_out_without_daemon() {
        // bind then drop a listener to find a port nobody serves
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", port);
        let result = wait_for_server(&url, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DimError::DaemonStartup(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_startup_error() {
        let config = DimConfig::default_with_overrides(|c| {
            c.daemon.program = Some("/nonexistent/dimd".into());
        });
        let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 0);
        assert!(matches!(
            DaemonProcess::spawn(&config, &url).await,
            Err(DimError::DaemonStartup(_))
        ));
    }

    #[test]
    fn test_attached_daemon_is_not_owned() {
        let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 1);
        let mut process = DaemonProcess::attached(url);
        assert!(!process.owns_process());
        assert_eq!(process.state(), DaemonState::Running);
        process.detach();
        assert_eq!(process.state(), DaemonState::Stopped);
    }
}
