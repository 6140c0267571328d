pub mod bus;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use bus::{BusMessage, FanOutBus};
pub use registry::Registry;
pub use supervisor::DeviceSession;
pub use types::{MediaPacket, StreamOptions, SubscriberId, VideoMetadata};
