use crate::adb::AdbExecutor;
use crate::device::DeviceId;
use crate::scrcpy::capture::CaptureSource;
use crate::scrcpy::server::ScrcpyServerController;
use crate::session::supervisor::DeviceSession;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Process-scoped registry of per-device sessions, explicitly constructed at
/// startup and threaded through the HTTP/WS handlers via axum `State`. This
/// replaces the module-scope dictionaries the original service kept (§9
/// re-architecture guidance): no hidden shared state, and a fresh registry
/// per test gives full isolation.
pub struct Registry {
    adb: Arc<AdbExecutor>,
    server_jar_path: PathBuf,
    sessions: Mutex<HashMap<DeviceId, Arc<DeviceSession>>>,
}

impl Registry {
    pub fn new(adb: Arc<AdbExecutor>, server_jar_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            adb,
            server_jar_path,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the existing session for `device_id`, or creates a fresh
    /// (Idle) one backed by a default `ScrcpyServer` capture source.
    pub fn get_or_create(&self, device_id: DeviceId) -> Arc<DeviceSession> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(device_id.clone())
            .or_insert_with(|| {
                let capture = CaptureSource::ScrcpyServer(ScrcpyServerController::new(
                    self.adb.clone(),
                    self.server_jar_path.clone(),
                ));
                DeviceSession::new(device_id, capture)
            })
            .clone()
    }

    pub fn adb(&self) -> &Arc<AdbExecutor> {
        &self.adb
    }
}
