//! Fan-out of typed events to WebSocket subscribers and the debug log (§4.1).
//!
//! Grounded in the corpus's `EventBus` pattern (one broadcast channel, many
//! receivers): `tokio::sync::broadcast` gives us "slow subscriber never
//! blocks the publisher" for free, and a receiver that falls behind gets
//! `RecvError::Lagged(n)` instead of the oldest messages it missed — which is
//! exactly the drop-oldest-on-overflow behavior §4.1 asks for, just detected
//! on the read side rather than the write side.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::types::{HttpResult, JobTerminalStatus, ProxyInstance, RotationState, ScanResult};
use crate::core::DebugLogger;

/// Bounded per-subscriber queue capacity (§4.1).
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Log {
        component: String,
        message: String,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        fields: HashMap<String, Value>,
    },
    ProxyStatus {
        status: RotationState,
    },
    ProxyDetails {
        instance: ProxyInstance,
    },
    HttpResult {
        result: HttpResult,
    },
    HttpTestStatus {
        status: JobTerminalStatus,
    },
    HttpTestProgress {
        done: u64,
        total: u64,
    },
    CfscanResult {
        result: ScanResult,
    },
    CfscanStatus {
        status: JobTerminalStatus,
    },
    CfScanProgress {
        tested: u64,
        total: u64,
    },
}

impl Event {
    pub fn log(component: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Log {
            component: component.into(),
            message: message.into(),
            fields: HashMap::new(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Event::Log { .. } => "log",
            Event::ProxyStatus { .. } => "proxy_status",
            Event::ProxyDetails { .. } => "proxy_details",
            Event::HttpResult { .. } => "http_result",
            Event::HttpTestStatus { .. } => "http_test_status",
            Event::HttpTestProgress { .. } => "http_test_progress",
            Event::CfscanResult { .. } => "cfscan_result",
            Event::CfscanStatus { .. } => "cfscan_status",
            Event::CfScanProgress { .. } => "cf_scan_progress",
        }
    }
}

pub type EventKind = &'static str;

/// Single shared broadcast channel behind `subscribe`/`publish`. Publication
/// order from a single publisher is preserved for every subscriber; no
/// ordering is guaranteed across distinct publishers (§4.1).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    debug_log: Option<std::sync::Arc<DebugLogger>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
        Self {
            sender,
            debug_log: None,
        }
    }

    pub fn with_debug_log(debug_log: std::sync::Arc<DebugLogger>) -> Self {
        let mut bus = Self::new();
        bus.debug_log = Some(debug_log);
        bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish `event`, mirroring it into the process debug log regardless
    /// of whether any WebSocket subscriber is attached.
    pub fn publish(&self, event: Event) {
        if let Some(logger) = &self.debug_log {
            let fields = serde_json::to_value(&event)
                .ok()
                .and_then(|v| v.get("data").cloned())
                .and_then(|v| match v {
                    Value::Object(map) => Some(map.into_iter().collect()),
                    _ => None,
                })
                .unwrap_or_default();
            logger.log_event("EventBus", event.kind(), event.kind(), fields);
        }

        // `send` only errors when there are no receivers; a publish with
        // nobody listening is not an error, just a no-op fan-out.
        let _ = self.sender.send(event);
    }

    /// Called by a WebSocket consumer after observing `RecvError::Lagged`,
    /// so the overflow is visible on that connection's own event stream.
    pub fn subscriber_overflow_event() -> Event {
        Event::log("EventBus", "subscriber overflow")
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
