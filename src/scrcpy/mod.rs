pub mod capture;
pub mod codec;
pub mod server;

pub use capture::CaptureSource;
pub use codec::StreamCodec;
pub use server::ScrcpyServerController;
