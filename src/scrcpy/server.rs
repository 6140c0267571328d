use crate::adb::AdbExecutor;
use crate::device::DeviceId;
use crate::error::{Result, ScrcpyError};
use crate::scrcpy::codec::StreamCodec;
use crate::session::types::{StreamOptions, VideoMetadata};
use crate::utils::find_available_port;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

const DEVICE_SERVER_PATH: &str = "/data/local/tmp/scrcpy-server.jar";
const SOCKET_NAME: &str = "scrcpy";
const SCRCPY_VERSION: &str = "3.3.4";

const PRE_CLEAN_SETTLE: Duration = Duration::from_secs(2);
const LAUNCH_LIVENESS_WINDOW: Duration = Duration::from_secs(3);
const CONNECT_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const FORWARD_RETRIES: u32 = 3;
const PORT_RANGE_START: u16 = 27183;
const SPAWN_RETRIES: u32 = 3;

/// Owns the process, port forward, and socket for one device's scrcpy
/// session, and runs the start/stop sequence in §4.2 exactly.
pub struct ScrcpyServerController {
    adb: Arc<AdbExecutor>,
    server_jar_path: PathBuf,
    device_id: Option<DeviceId>,
    forward_port: Option<u16>,
    process: Option<Child>,
}

impl ScrcpyServerController {
    pub fn new(adb: Arc<AdbExecutor>, server_jar_path: PathBuf) -> Self {
        Self {
            adb,
            server_jar_path,
            device_id: None,
            forward_port: None,
            process: None,
        }
    }

    pub async fn start(
        &mut self,
        device_id: &DeviceId,
        options: &StreamOptions,
    ) -> Result<(StreamCodec, VideoMetadata)> {
        self.device_id = Some(device_id.clone());
        self.pre_clean(device_id).await;
        self.push(device_id).await?;

        let mut last_err = None;
        let mut port = None;

        for attempt in 1..=SPAWN_RETRIES {
            let candidate_port = self.forward_with_retries(device_id).await?;
            self.forward_port = Some(candidate_port);

            match self.spawn_server(device_id, options, candidate_port).await {
                Ok(()) => {
                    port = Some(candidate_port);
                    break;
                }
                Err(e) => {
                    warn!(
                        "scrcpy-server spawn attempt {}/{} on port {} failed: {}",
                        attempt, SPAWN_RETRIES, candidate_port, e
                    );
                    let _ = self.adb.forward_remove(device_id.as_str(), candidate_port).await;
                    self.forward_port = None;
                    last_err = Some(e);
                }
            }
        }

        let port = match port {
            Some(p) => p,
            None => return Err(last_err.unwrap_or(ScrcpyError::ServerLaunchFailed("spawn retries exhausted".to_string()))),
        };

        let stream = self.connect_with_retries(port).await?;
        let mut codec = StreamCodec::new(stream);
        let metadata = codec.read_metadata(options).await?;

        info!(
            "scrcpy session for {} started: {}x{} ({})",
            device_id, metadata.width, metadata.height, metadata.device_name
        );

        Ok((codec, metadata))
    }

    pub async fn stop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill().await;
        }
        if let (Some(port), Some(device_id)) = (self.forward_port.take(), self.device_id.as_ref()) {
            let _ = self.adb.forward_remove(device_id.as_str(), port).await;
        }
    }

    async fn pre_clean(&self, device_id: &DeviceId) {
        let _ = self
            .adb
            .shell_detached(device_id.as_str(), &["pkill", "-9", "-f", "app_process.*scrcpy"])
            .await;
        if let Some(port) = self.forward_port {
            let _ = self.adb.forward_remove(device_id.as_str(), port).await;
        }
        tokio::time::sleep(PRE_CLEAN_SETTLE).await;
    }

    async fn push(&self, device_id: &DeviceId) -> Result<()> {
        let local = self
            .server_jar_path
            .to_str()
            .ok_or_else(|| ScrcpyError::Parse("invalid server jar path".to_string()))?;
        self.adb
            .push(device_id.as_str(), local, DEVICE_SERVER_PATH)
            .await
    }

    async fn forward_with_retries(&self, device_id: &DeviceId) -> Result<u16> {
        let mut candidate = find_available_port(PORT_RANGE_START, 200)?;
        let mut last_err = None;

        for attempt in 1..=FORWARD_RETRIES {
            let remote = format!("localabstract:{}", SOCKET_NAME);
            match self.adb.forward(device_id.as_str(), candidate, &remote).await {
                Ok(()) => return Ok(candidate),
                Err(e) => {
                    warn!(
                        "port forward attempt {}/{} on {} failed: {}",
                        attempt, FORWARD_RETRIES, candidate, e
                    );
                    last_err = Some(e);
                    candidate = find_available_port(candidate + 1, 200)?;
                }
            }
        }

        Err(last_err.unwrap_or(ScrcpyError::PortForwardFailed))
    }

    async fn spawn_server(
        &mut self,
        device_id: &DeviceId,
        options: &StreamOptions,
        port: u16,
    ) -> Result<()> {
        let _ = port;
        let server_args = format!(
            "CLASSPATH={} app_process / com.genymobile.scrcpy.Server {} \
             tunnel_forward=true control=false audio=false cleanup=false \
             video_codec={} max_size={} max_fps={} video_bit_rate={} \
             video_codec_options=i-frame-interval={} \
             send_frame_meta={} send_device_meta={} send_codec_meta={} send_dummy_byte={}",
            DEVICE_SERVER_PATH,
            SCRCPY_VERSION,
            options.codec,
            options.max_size,
            options.max_fps,
            options.bit_rate,
            options.idr_interval_secs,
            options.send_frame_meta,
            options.send_device_meta,
            options.send_codec_meta,
            options.send_dummy_byte,
        );

        let mut child = Command::new(&self.adb.adb_path)
            .args(["-s", device_id.as_str(), "shell", &server_args])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScrcpyError::Adb(format!("failed to start scrcpy-server: {}", e)))?;

        let mut stderr_lines = child
            .stderr
            .take()
            .map(|s| BufReader::new(s).lines());

        let exited_early = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(LAUNCH_LIVENESS_WINDOW) => None,
        };

        match exited_early {
            Some(Ok(status)) if !status.success() => {
                let mut stderr_snippet = String::new();
                if let Some(lines) = &mut stderr_lines {
                    while let Ok(Some(line)) = lines.next_line().await {
                        stderr_snippet.push_str(&line);
                        stderr_snippet.push('\n');
                        if stderr_snippet.len() > 4096 {
                            break;
                        }
                    }
                }
                return Err(ScrcpyError::ServerLaunchFailed(stderr_snippet));
            }
            Some(Ok(_)) => {
                return Err(ScrcpyError::ServerLaunchFailed(
                    "server exited immediately with status 0".to_string(),
                ));
            }
            Some(Err(e)) => {
                return Err(ScrcpyError::ServerLaunchFailed(format!(
                    "failed to wait on server process: {}",
                    e
                )));
            }
            None => {
                // still running after the liveness window: treat as started.
                if let Some(stderr) = stderr_lines {
                    tokio::spawn(async move {
                        let mut lines = stderr;
                        while let Ok(Some(line)) = lines.next_line().await {
                            warn!("scrcpy-server stderr: {}", line);
                        }
                    });
                }
            }
        }

        self.process = Some(child);
        Ok(())
    }

    async fn connect_with_retries(&self, port: u16) -> Result<TcpStream> {
        let addr = format!("127.0.0.1:{}", port);
        let mut last_err = None;

        for attempt in 1..=CONNECT_RETRIES {
            match TcpStream::connect(&addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < CONNECT_RETRIES {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        warn!("failed to connect to scrcpy-server after {} attempts: {:?}", CONNECT_RETRIES, last_err);
        Err(ScrcpyError::ConnectRefused)
    }
}

impl Drop for ScrcpyServerController {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}
