//! # Client State Management
//!
//! Shared state that several parts of the client touch at once: the configuration and the
//! running metrics. Socket reader tasks, audio tasks and the UI facade all hold a clone.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Every socket task and client facade holds a reference to the same data
//! - **RwLock**: Many readers (UI polling metrics) or one writer (a socket recording a frame)
//!
//! ### Poisoned locks
//! A panic while holding a lock "poisons" it. Metrics are advisory, so we recover the
//! inner value with `PoisonError::into_inner` instead of propagating the panic.

use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// State shared across sockets and session clients.
#[derive(Debug, Clone)]
pub struct ClientState {
    /// Client configuration (read by every component at construction time)
    pub config: Arc<RwLock<AppConfig>>,

    /// Counters updated by the sockets as frames flow
    pub metrics: Arc<RwLock<ClientMetrics>>,

    /// When this client process started
    pub start_time: Instant,
}

/// Metrics collected across all channels.
///
/// ## Why these metrics matter:
/// - **malformed_dropped**: a rising number means the backend and client disagree on the protocol
/// - **sends_refused**: user actions racing socket teardown
/// - **reconnect_attempts**: network quality as seen by the user
#[derive(Debug, Default, Clone)]
pub struct ClientMetrics {
    /// Inbound frames that parsed into an envelope
    pub messages_received: u64,

    /// Outbound frames handed to a live socket
    pub messages_sent: u64,

    /// Inbound frames swallowed because they were not JSON or had no `type`
    pub malformed_dropped: u64,

    /// `send()` calls made while the channel was not open
    pub sends_refused: u64,

    /// Reconnect dials, successful or not
    pub reconnect_attempts: u64,

    /// Per inbound message type
    pub message_types: HashMap<String, MessageTypeMetric>,
}

/// Counters for one inbound message type.
#[derive(Debug, Default, Clone)]
pub struct MessageTypeMetric {
    pub count: u64,
    pub last_received_at: Option<DateTime<Utc>>,
}

impl ClientState {
    /// Create a new ClientState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other tasks aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record one inbound frame of the given message type.
    pub fn record_inbound(&self, message_type: &str) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.messages_received += 1;

        let entry = metrics
            .message_types
            .entry(message_type.to_string())
            .or_default();
        entry.count += 1;
        entry.last_received_at = Some(Utc::now());
    }

    pub fn record_outbound(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.messages_sent += 1;
    }

    pub fn record_malformed(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.malformed_dropped += 1;
    }

    pub fn record_send_refused(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.sends_refused += 1;
    }

    pub fn record_reconnect_attempt(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.reconnect_attempts += 1;
    }

    /// Get a snapshot of current metrics.
    ///
    /// ## Why a snapshot:
    /// The caller can format or print it without holding the lock.
    pub fn get_metrics_snapshot(&self) -> ClientMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Seconds since this client started.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl ClientMetrics {
    /// Share of inbound frames that were dropped as malformed (0.0 to 1.0).
    pub fn malformed_rate(&self) -> f64 {
        let total = self.messages_received + self.malformed_dropped;
        if total > 0 {
            self.malformed_dropped as f64 / total as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_metrics_per_type() {
        let state = ClientState::new(AppConfig::default());
        state.record_inbound("ai_message");
        state.record_inbound("ai_message");
        state.record_inbound("awaiting_input");
        state.record_malformed();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.messages_received, 3);
        assert_eq!(snapshot.message_types["ai_message"].count, 2);
        assert!(snapshot.message_types["awaiting_input"].last_received_at.is_some());
        assert!((snapshot.malformed_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_metrics() {
        let state = ClientState::new(AppConfig::default());
        let clone = state.clone();
        clone.record_send_refused();
        clone.record_reconnect_attempt();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.sends_refused, 1);
        assert_eq!(snapshot.reconnect_attempts, 1);
    }
}
