mod log_broker;

pub use log_broker::{classify, AgentLogBroker, LogCategory};
