mod executor;

pub use executor::{AdbExecutor, CommandOutput};
