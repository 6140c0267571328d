use crate::device::DeviceId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Info,
    Step,
    ModelRequest,
    ModelResponse,
    Action,
    Error,
}

/// Classifies a raw subprocess log line by keyword match, mirroring the
/// phone-agent driver's bilingual classifier: step progress, model
/// request/response framing, device actions, and error/failure lines.
pub fn classify(line: &str) -> LogCategory {
    let lower = line.to_lowercase();
    if lower.contains("step") && line.contains('/') {
        LogCategory::Step
    } else if lower.contains("request") {
        LogCategory::ModelRequest
    } else if lower.contains("response") {
        LogCategory::ModelResponse
    } else if lower.contains("action")
        || lower.contains("click")
        || lower.contains("tap")
        || lower.contains("swipe")
        || lower.contains("input")
    {
        LogCategory::Action
    } else if lower.contains("error") || lower.contains("failed") {
        LogCategory::Error
    } else {
        LogCategory::Info
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

type SubscriberId = u64;

struct Inner {
    subscribers: HashMap<DeviceId, HashMap<SubscriberId, mpsc::Sender<String>>>,
}

/// `device_id -> set<subscriber>` map for the AI phone-agent's log stream.
/// Send failures evict the subscriber silently; the broker never fails a
/// session over it (§7 propagation policy).
pub struct AgentLogBroker {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl AgentLogBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, device_id: DeviceId) -> (SubscriberId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock().unwrap();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        inner.subscribers.entry(device_id).or_default().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, device_id: &DeviceId, id: SubscriberId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = inner.subscribers.get_mut(device_id) {
            map.remove(&id);
            if map.is_empty() {
                inner.subscribers.remove(device_id);
            }
        }
    }

    /// JSON-encodes `{category, line, payload, timestamp}` and sends it to
    /// every subscriber of `device_id`. Subscribers whose channel is closed
    /// or full are dropped from the map.
    pub fn broadcast_log_line(
        &self,
        device_id: &DeviceId,
        category: LogCategory,
        line: &str,
        payload: Option<serde_json::Value>,
    ) {
        let entry = serde_json::json!({
            "type": "log",
            "category": category,
            "line": line,
            "payload": payload,
            "timestamp": now_millis() as u64,
        });
        let encoded = entry.to_string();

        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = inner.subscribers.get_mut(device_id) {
            map.retain(|_, tx| tx.try_send(encoded.clone()).is_ok());
            if map.is_empty() {
                inner.subscribers.remove(device_id);
            }
        } else {
            debug!("no ai-log subscribers for {}", device_id);
        }
    }
}

impl Default for AgentLogBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_step_lines() {
        assert!(matches!(classify("step 3/10: opening app"), LogCategory::Step));
    }

    #[test]
    fn classifies_error_lines() {
        assert!(matches!(classify("Connection failed: timeout"), LogCategory::Error));
    }

    #[test]
    fn action_keyword_takes_precedence_over_error() {
        // Mirrors the original classifier's step/request/response/action/error
        // ordering: "action" wins even when "failed" is also present.
        assert!(matches!(classify("Action failed: element not found"), LogCategory::Action));
    }

    #[test]
    fn classifies_action_lines() {
        assert!(matches!(classify("tap at (120, 240)"), LogCategory::Action));
    }

    #[test]
    fn classifies_request_response_lines() {
        assert!(matches!(classify("sending request to model"), LogCategory::ModelRequest));
        assert!(matches!(classify("got response from model"), LogCategory::ModelResponse));
    }

    #[test]
    fn classifies_plain_info() {
        assert!(matches!(classify("agent connected"), LogCategory::Info));
    }
}
