//! Fire-and-forget analytics events.
//!
//! The engine signals lifecycle events (steps, milestones, sessions,
//! detected blockers) for ingestion by an observability or notification
//! collaborator. Emission never fails an engine operation: errors are
//! logged and dropped by [`emit_best_effort`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::AnalyticsError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Well-known event names.
pub mod events {
    pub const SESSION_STARTED: &str = "session_started";
    pub const SESSION_COMPLETED: &str = "session_completed";
    pub const SESSION_ABANDONED: &str = "session_abandoned";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const MILESTONE_AWARDED: &str = "milestone_awarded";
    pub const BLOCKERS_DETECTED: &str = "blockers_detected";
}

/// A single analytics event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsEvent {
    pub name: String,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// Destination for analytics events.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Emit an event, swallowing and logging any failure.
pub async fn emit_best_effort(sink: &dyn AnalyticsSink, name: &str, payload: serde_json::Value) {
    let event = AnalyticsEvent::new(name, payload);
    if let Err(e) = sink.emit(&event).await {
        warn!(event = %event.name, error = %e, "Analytics emission failed");
    }
}

/// Sink that writes events to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| AnalyticsError::Serialization(e.to_string()))?;
        info!(event = %event.name, payload = %payload, "Analytics event");
        Ok(())
    }
}

/// Sink that fans events out to in-process subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<AnalyticsEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyticsEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticsSink for BroadcastSink {
    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        // No receivers yet is fine
        if self.tx.send(event.clone()).is_err() {
            debug!(event = %event.name, "No analytics subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AnalyticsSink for FailingSink {
        async fn emit(&self, _event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
            Err(AnalyticsError::Unavailable("collector offline".into()))
        }
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();

        emit_best_effort(&sink, events::STEP_COMPLETED, serde_json::json!({"step_id": "a"})).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "step_completed");
        assert_eq!(event.payload["step_id"], "a");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let sink = BroadcastSink::new();
        let event = AnalyticsEvent::new(events::SESSION_STARTED, serde_json::json!({}));
        assert!(sink.emit(&event).await.is_ok());
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        // Must not panic or propagate.
        emit_best_effort(&FailingSink, events::MILESTONE_AWARDED, serde_json::json!({})).await;
    }
}
