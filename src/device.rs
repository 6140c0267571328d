use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device serial, e.g. `192.168.1.100:5555` or a USB serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

/// Known-device bookkeeping surfaced by the (out of scope) device-listing HTTP
/// endpoints. Kept here because the ADB Executor's `list_devices` already
/// produces this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub model: Option<String>,
    pub android_version: Option<String>,
    pub screen_size: Option<(u32, u32)>,
}

impl Device {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            model: None,
            android_version: None,
            screen_size: None,
        }
    }

    pub fn with_info(
        id: DeviceId,
        model: String,
        android_version: String,
        screen_size: (u32, u32),
    ) -> Self {
        Self {
            id,
            model: Some(model),
            android_version: Some(android_version),
            screen_size: Some(screen_size),
        }
    }
}
