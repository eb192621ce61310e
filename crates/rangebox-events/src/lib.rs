//! # rangebox-events
//!
//! Fire-and-forget fleet event publishing over Redis pub/sub.
//!
//! Two audiences exist: `admin` receives every event, `client` receives
//! exercise-fleet events only. Delivery is observability, not part of any
//! operation's correctness contract — a missing or failing broker produces
//! warnings, never errors.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use chrono::Utc;
use rangebox_constants::wire;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

/// Logical broadcast destination of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Operators; sees every fleet event.
    Admin,
    /// Players; sees exercise-fleet events only.
    Client,
}

impl Audience {
    /// Redis channel name for this audience.
    #[must_use]
    pub const fn channel(self) -> &'static str {
        match self {
            Self::Admin => wire::AUDIENCE_ADMIN,
            Self::Client => wire::AUDIENCE_CLIENT,
        }
    }
}

/// One container status notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Container name.
    pub container: String,
    /// Observed status string.
    pub status: String,
    /// RFC 3339 timestamp of the observation.
    pub timestamp: String,
}

impl StatusEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(container: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            status: status.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Destination for fleet events.
///
/// Abstracts [`EventPublisher`] so components fanning out events can be
/// tested without a broker.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event to one audience, best-effort.
    async fn publish(&self, audience: Audience, event: &StatusEvent);
}

/// Best-effort publisher of [`StatusEvent`]s.
#[derive(Clone)]
pub struct EventPublisher {
    conn: Option<ConnectionManager>,
}

#[async_trait]
impl EventSink for EventPublisher {
    async fn publish(&self, audience: Audience, event: &StatusEvent) {
        Self::publish(self, audience, event).await;
    }
}

impl EventPublisher {
    /// Connects to the broker; a broker that is down yields a publisher
    /// that only logs.
    pub async fn connect(redis_url: &str) -> Self {
        let conn = match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    tracing::info!(url = %redis_url, "connected to event broker");
                    Some(conn)
                }
                Err(e) => {
                    tracing::warn!(url = %redis_url, error = %e, "event broker unreachable, events disabled");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(url = %redis_url, error = %e, "invalid event broker URL, events disabled");
                None
            }
        };
        Self { conn }
    }

    /// Creates a publisher that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { conn: None }
    }

    /// Publishes an event to one audience. Never fails the caller.
    pub async fn publish(&self, audience: Audience, event: &StatusEvent) {
        let Some(conn) = &self.conn else {
            tracing::debug!(
                audience = audience.channel(),
                container = %event.container,
                "event publishing disabled, dropping event"
            );
            return;
        };

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                return;
            }
        };

        let mut conn = conn.clone();
        match redis::cmd("PUBLISH")
            .arg(audience.channel())
            .arg(&payload)
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(receivers) => {
                tracing::debug!(
                    audience = audience.channel(),
                    container = %event.container,
                    status = %event.status,
                    receivers,
                    "published event"
                );
            }
            Err(e) => {
                tracing::warn!(
                    audience = audience.channel(),
                    container = %event.container,
                    error = %e,
                    "failed to publish event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_channels() {
        assert_eq!(Audience::Admin.channel(), "admin");
        assert_eq!(Audience::Client.channel(), "client");
    }

    #[test]
    fn test_event_payload_shape() {
        let event = StatusEvent::now("js_3000", "running");
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["container"], "js_3000");
        assert_eq!(value["status"], "running");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_disabled_publisher_swallows_events() {
        let publisher = EventPublisher::disabled();
        publisher
            .publish(Audience::Admin, &StatusEvent::now("js_3000", "not_found"))
            .await;
    }
}
