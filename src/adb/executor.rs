use crate::error::{Result, ScrcpyError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Probe list for locating the `adb` binary when none is configured,
/// mirroring the install locations a desktop ADB setup is actually found at.
const ADB_PROBE_PATHS: &[&str] = &[
    "/usr/local/bin/adb",
    "/usr/bin/adb",
    "/opt/homebrew/bin/adb",
];

/// Default timeout for a waited ADB command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches ADB as a child process. Resolves its binary path once at
/// construction; every invocation after that passes arguments as a vector,
/// never through a shell.
pub struct AdbExecutor {
    pub adb_path: PathBuf,
}

impl AdbExecutor {
    pub fn new(adb_path: PathBuf) -> Self {
        Self { adb_path }
    }

    /// Resolves the ADB binary: configured path first, then a fixed probe
    /// list, falling back to the bare literal `adb` (the OS loader reports a
    /// clear error later if that isn't on `PATH` either).
    pub fn resolve(configured: Option<PathBuf>) -> PathBuf {
        if let Some(path) = configured {
            if path != Path::new("adb") {
                return path;
            }
        }

        for candidate in ADB_PROBE_PATHS {
            let path = PathBuf::from(candidate);
            if path.exists() {
                debug!("resolved adb at {:?}", path);
                return path;
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let sdk_path =
                PathBuf::from(home).join("Library/Android/sdk/platform-tools/adb");
            if sdk_path.exists() {
                debug!("resolved adb at {:?}", sdk_path);
                return sdk_path;
            }
        }

        warn!("could not resolve a full adb path, falling back to 'adb' on PATH");
        PathBuf::from("adb")
    }

    /// Executes `adb <args>`. If `wait` is false, the process is spawned and
    /// detached: this returns immediately with a synthesized zero exit code.
    /// If true, waits (up to `timeout`, default 30s) and collects stdout,
    /// stderr, and the real exit code.
    pub async fn execute(
        &self,
        args: &[&str],
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let mut command = Command::new(&self.adb_path);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !wait {
            command.kill_on_drop(false);
            let child = command
                .spawn()
                .map_err(|e| ScrcpyError::Adb(format!("failed to spawn adb: {}", e)))?;
            tokio::spawn(async move {
                let mut child = child;
                let _ = child.wait().await;
            });
            return Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit_code: 0,
            });
        }

        let child = command
            .spawn()
            .map_err(|e| ScrcpyError::Adb(format!("failed to spawn adb: {}", e)))?;

        let output_fut = child.wait_with_output();
        let output = match tokio::time::timeout(timeout.unwrap_or(DEFAULT_TIMEOUT), output_fut)
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ScrcpyError::Adb(format!("adb command failed: {}", e))),
            Err(_) => return Err(ScrcpyError::Timeout),
        };

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn execute_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.execute(args, true, None).await?;
        if !output.success() {
            return Err(ScrcpyError::Adb(format!(
                "adb {:?} failed: {}",
                args,
                output.stderr_string()
            )));
        }
        Ok(output)
    }

    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let output = self.execute_checked(&["devices"]).await?;
        let devices = output
            .stdout_string()
            .lines()
            .skip(1)
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 && parts[1] == "device" {
                    Some(parts[0].to_string())
                } else {
                    None
                }
            })
            .collect();
        Ok(devices)
    }

    pub async fn push(&self, device_id: &str, local: &str, remote: &str) -> Result<()> {
        self.execute_checked(&["-s", device_id, "push", local, remote])
            .await
            .map_err(|_| ScrcpyError::ServerPushFailed)?;
        Ok(())
    }

    pub async fn shell(&self, device_id: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["-s", device_id, "shell"];
        full.extend_from_slice(args);
        let output = self.execute(&full, true, None).await?;
        Ok(output.stdout_string())
    }

    /// Like `shell`, but returns raw stdout bytes instead of lossily decoding
    /// as UTF-8 (needed for binary output such as `screencap -p`). Uses
    /// `exec-out`, which streams stdout without ADB's shell protocol
    /// rewriting line endings.
    pub async fn exec_out(&self, device_id: &str, args: &[&str]) -> Result<Vec<u8>> {
        let mut full = vec!["-s", device_id, "exec-out"];
        full.extend_from_slice(args);
        let output = self.execute(&full, true, None).await?;
        Ok(output.stdout)
    }

    /// Fire-and-forget shell invocation (e.g. `pkill`): started, never awaited.
    pub async fn shell_detached(&self, device_id: &str, args: &[&str]) -> Result<()> {
        let mut full = vec!["-s", device_id, "shell"];
        full.extend_from_slice(args);
        self.execute(&full, false, None).await?;
        Ok(())
    }

    pub async fn forward(&self, device_id: &str, local_port: u16, remote: &str) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.execute_checked(&["-s", device_id, "forward", &local, remote])
            .await
            .map_err(|_| ScrcpyError::PortForwardFailed)?;
        Ok(())
    }

    pub async fn forward_remove(&self, device_id: &str, local_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        // best-effort: a missing forward is not an error during teardown.
        let _ = self
            .execute(&["-s", device_id, "forward", "--remove", &local], true, None)
            .await;
        Ok(())
    }
}
