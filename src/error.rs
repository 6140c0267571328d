use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrcpyError {
    #[error("ADB error: {0}")]
    Adb(String),

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Video stream error: {0}")]
    VideoStream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No available port found in range {0}-{1}")]
    NoAvailablePort(u16, u16),

    #[error("Failed to push scrcpy-server to device")]
    ServerPushFailed,

    #[error("Failed to set up port forward")]
    PortForwardFailed,

    #[error("scrcpy-server exited immediately: {0}")]
    ServerLaunchFailed(String),

    #[error("Connection to scrcpy-server refused")]
    ConnectRefused,

    #[error("Stream protocol desynchronized")]
    ProtocolDesync,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Packet exceeds maximum size")]
    OversizedPacket,

    #[error("Existing session has different stream options")]
    OptionsMismatch,

    #[error("Subscriber could not keep up and was evicted")]
    LaggingOut,

    #[error("Operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ScrcpyError>;
