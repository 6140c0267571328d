use crate::device::DeviceId;
use crate::error::{Result, ScrcpyError};
use crate::scrcpy::capture::CaptureSource;
use crate::session::bus::{FanOutBus, SubscriberHandle};
use crate::session::types::{StreamOptions, SubscriberId, VideoMetadata};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Default)]
struct Shared {
    bus: Option<Arc<FanOutBus>>,
    options: Option<StreamOptions>,
    metadata: Option<VideoMetadata>,
    reader_task: Option<JoinHandle<()>>,
}

/// One state machine per `DeviceId`: Idle -> Starting -> Running -> Stopping.
/// `state` and `shared` are guarded by plain (sync) mutexes held only across
/// field reads/writes, never across `.await`; the capture source itself
/// lives behind a `tokio::sync::Mutex` because its `start`/`stop` calls are
/// async and the per-device `Starting`/`Stopping` gating above already
/// ensures at most one task drives it at a time.
pub struct DeviceSession {
    device_id: DeviceId,
    state: Mutex<State>,
    shared: Mutex<Shared>,
    notify: Notify,
    capture: tokio::sync::Mutex<CaptureSource>,
}

impl DeviceSession {
    pub fn new(device_id: DeviceId, capture: CaptureSource) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            state: Mutex::new(State::Idle),
            shared: Mutex::new(Shared::default()),
            notify: Notify::new(),
            capture: tokio::sync::Mutex::new(capture),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Attaches a new subscriber with the given options, starting a fresh
    /// session if none is running. An existing `Running` session with
    /// different options rejects the caller with `OptionsMismatch`. Calls
    /// arriving while the session is `Starting`/`Stopping` wait for the
    /// transition to complete and re-evaluate.
    pub async fn subscribe(
        self: &Arc<Self>,
        options: StreamOptions,
    ) -> Result<(Arc<FanOutBus>, VideoMetadata, SubscriberHandle)> {
        loop {
            let should_start = {
                let mut state = self.state.lock().unwrap();
                match *state {
                    State::Idle => {
                        *state = State::Starting;
                        true
                    }
                    State::Running => {
                        drop(state);
                        let shared = self.shared.lock().unwrap();
                        if shared.options.as_ref() == Some(&options) {
                            let bus = shared.bus.clone().unwrap();
                            let metadata = shared.metadata.clone().unwrap();
                            drop(shared);
                            let sub = bus.subscribe();
                            return Ok((bus, metadata, sub));
                        } else {
                            return Err(ScrcpyError::OptionsMismatch);
                        }
                    }
                    State::Starting | State::Stopping => false,
                }
            };

            if should_start {
                break;
            }
            self.notify.notified().await;
        }

        self.run_start(options).await
    }

    /// Unconditionally tears down any existing session and starts a fresh
    /// one with `options`, regardless of current subscriber count. Used by
    /// the Socket.IO adapter's single-flight `connect-device` flow, which
    /// mirrors the original service's per-device lock that stops every other
    /// viewer before attaching a new one.
    pub async fn force_restart(
        self: &Arc<Self>,
        options: StreamOptions,
    ) -> Result<(Arc<FanOutBus>, VideoMetadata, SubscriberHandle)> {
        self.stop_session().await;
        self.subscribe(options).await
    }

    /// Restarts with new options iff `requester` is currently the sole
    /// subscriber of the running session (§6 `/ws/h264/{id}` config
    /// message).
    pub async fn restart_if_sole_subscriber(
        self: &Arc<Self>,
        requester: SubscriberId,
        options: StreamOptions,
    ) -> Result<(Arc<FanOutBus>, VideoMetadata, SubscriberHandle)> {
        let sole = {
            let shared = self.shared.lock().unwrap();
            match &shared.bus {
                Some(bus) => bus.subscriber_count() == 1 && bus.contains(requester),
                None => false,
            }
        };
        if !sole {
            return Err(ScrcpyError::OptionsMismatch);
        }
        self.force_restart(options).await
    }

    /// Called by a Client Adapter when its subscriber disconnects. Tears the
    /// session down if this was the last subscriber.
    pub async fn leave(self: &Arc<Self>, subscriber_id: SubscriberId) {
        let bus = { self.shared.lock().unwrap().bus.clone() };
        if let Some(bus) = bus {
            if bus.unsubscribe(subscriber_id) {
                self.stop_session().await;
            }
        }
    }

    async fn run_start(
        self: &Arc<Self>,
        options: StreamOptions,
    ) -> Result<(Arc<FanOutBus>, VideoMetadata, SubscriberHandle)> {
        let mut capture = self.capture.lock().await;
        let start_result = capture.start(&self.device_id, &options).await;
        drop(capture);

        match start_result {
            Ok((codec, metadata)) => {
                let bus = FanOutBus::new();
                let reader_task = self.spawn_reader(codec, bus.clone());

                {
                    let mut shared = self.shared.lock().unwrap();
                    shared.bus = Some(bus.clone());
                    shared.options = Some(options);
                    shared.metadata = Some(metadata.clone());
                    shared.reader_task = Some(reader_task);
                }
                *self.state.lock().unwrap() = State::Running;
                self.notify.notify_waiters();

                let sub = bus.subscribe();
                Ok((bus, metadata, sub))
            }
            Err(e) => {
                *self.state.lock().unwrap() = State::Idle;
                self.notify.notify_waiters();
                Err(e)
            }
        }
    }

    fn spawn_reader(
        self: &Arc<Self>,
        mut codec: crate::scrcpy::codec::StreamCodec,
        bus: Arc<FanOutBus>,
    ) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match codec.read_packet().await {
                    Ok(packet) => bus.publish(packet),
                    Err(e) => {
                        warn!("codec reader for {} failed: {}", session.device_id, e);
                        break;
                    }
                }
            }
            session.stop_session().await;
        })
    }

    /// Runs the `Running -> Stopping -> Idle` transition: cancels the reader
    /// task, closes the bus, reverses the capture source's setup, and clears
    /// session state. Idempotent: a second call while already `Idle` is a
    /// no-op.
    async fn stop_session(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Running && *state != State::Starting {
                return;
            }
            *state = State::Stopping;
        }
        self.notify.notify_waiters();

        let (reader_task, bus) = {
            let mut shared = self.shared.lock().unwrap();
            (shared.reader_task.take(), shared.bus.take())
        };
        if let Some(handle) = reader_task {
            handle.abort();
        }
        if let Some(bus) = bus {
            bus.close();
        }

        self.capture.lock().await.stop().await;

        {
            let mut shared = self.shared.lock().unwrap();
            shared.options = None;
            shared.metadata = None;
        }
        *self.state.lock().unwrap() = State::Idle;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrcpy::capture::{CaptureSource, TestCaptureSource};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    /// Accepts loopback connections and answers each with a scrcpy handshake
    /// (1920x1080, h264) followed by one configuration packet, standing in
    /// for a real device without touching adb.
    async fn spawn_test_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut hello = Vec::new();
                    hello.push(0u8);
                    hello.extend_from_slice(&[0u8; 64]);
                    hello.extend_from_slice(&0x68_32_36_34u32.to_be_bytes());
                    hello.extend_from_slice(&1920u32.to_be_bytes());
                    hello.extend_from_slice(&1080u32.to_be_bytes());
                    if stream.write_all(&hello).await.is_err() {
                        return;
                    }

                    let payload = b"cfg";
                    let mut packet = Vec::new();
                    packet.extend_from_slice(&u64::MAX.to_be_bytes());
                    packet.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                    packet.extend_from_slice(payload);
                    let _ = stream.write_all(&packet).await;

                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });
        addr
    }

    async fn test_session(device: &str) -> Arc<DeviceSession> {
        let addr = spawn_test_server().await;
        let capture = CaptureSource::Test(TestCaptureSource { addr });
        DeviceSession::new(DeviceId::from(device), capture)
    }

    #[tokio::test]
    async fn subscribe_starts_session_and_reports_metadata() {
        let session = test_session("dev-start").await;

        let (bus, metadata, sub) = session.subscribe(StreamOptions::default()).await.unwrap();
        assert_eq!(metadata.width, 1920);
        assert_eq!(metadata.height, 1080);
        assert!(metadata.is_landscape);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(*session.state.lock().unwrap(), State::Running);
        drop(sub);
    }

    #[tokio::test]
    async fn matching_options_share_the_running_session() {
        let session = test_session("dev-share").await;

        let (bus1, _meta1, _sub1) = session.subscribe(StreamOptions::default()).await.unwrap();
        let (bus2, _meta2, _sub2) = session.subscribe(StreamOptions::default()).await.unwrap();

        assert!(Arc::ptr_eq(&bus1, &bus2));
        assert_eq!(bus1.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn mismatched_options_are_rejected_while_running() {
        let session = test_session("dev-mismatch").await;

        let (_bus, _meta, _sub) = session.subscribe(StreamOptions::default()).await.unwrap();

        let mut other = StreamOptions::default();
        other.max_size = 640;
        let err = session.subscribe(other).await.unwrap_err();
        assert!(matches!(err, ScrcpyError::OptionsMismatch));
    }

    #[tokio::test]
    async fn last_leaver_tears_session_down_to_idle() {
        let session = test_session("dev-teardown").await;

        let (_bus, _meta, sub) = session.subscribe(StreamOptions::default()).await.unwrap();
        let id = sub.id;
        session.leave(id).await;

        assert_eq!(*session.state.lock().unwrap(), State::Idle);

        // Proves the session actually tore down rather than staying `Running`
        // with stale options: a different `StreamOptions` now succeeds
        // instead of hitting `OptionsMismatch`.
        let mut other = StreamOptions::default();
        other.max_size = 640;
        session.subscribe(other).await.unwrap();
    }
}
