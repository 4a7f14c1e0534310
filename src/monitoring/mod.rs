// src/monitoring/mod.rs
//! Structured-event and alert sinks. Delivery transports (chat, metrics
//! exporters) live elsewhere; the engine only needs these seams, and none of
//! them may block or steer the core's control flow.

use async_trait::async_trait;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, severity: AlertSeverity, title: &str, body: &str);
}

pub trait EventSink: Send + Sync {
    fn emit(&self, level: &str, category: &str, fields: serde_json::Value);
}

/// Log-backed sinks used for paper runs and tests.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, severity: AlertSeverity, title: &str, body: &str) {
        match severity {
            AlertSeverity::Info => info!("ALERT [{}] {}", title, body),
            AlertSeverity::Warning => warn!("ALERT [{}] {}", title, body),
            AlertSeverity::Critical => error!("ALERT [{}] {}", title, body),
        }
    }
}

pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, level: &str, category: &str, fields: serde_json::Value) {
        info!("EVENT [{}/{}] {}", level, category, fields);
    }
}
