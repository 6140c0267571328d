pub mod adapter;
pub mod ai_logs;
pub mod socketio;

pub use adapter::{handle_h264, handle_screen};
pub use ai_logs::handle_ai_logs;
pub use socketio::build_socketio_layer;
