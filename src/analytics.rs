use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::model::id::UserId;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEventKind {
    Play,
    Skip,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackEvent {
    pub track_id: String,
    pub user_id: UserId,
    pub kind: PlaybackEventKind,
    pub at: DateTime<Utc>,
}

impl PlaybackEvent {
    pub fn new(track_id: impl Into<String>, user_id: UserId, kind: PlaybackEventKind) -> Self {
        Self {
            track_id: track_id.into(),
            user_id,
            kind,
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget usage events. Implementations must not block the caller.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: PlaybackEvent);
}

/// Writes events to the log only.
#[derive(Debug, Default)]
pub struct LogAnalytics;

impl AnalyticsSink for LogAnalytics {
    fn record(&self, event: PlaybackEvent) {
        debug!("📊 {:?} {} by {}", event.kind, event.track_id, event.user_id);
    }
}

/// POSTs each event as JSON to a webhook from a background task.
pub struct WebhookAnalytics {
    client: reqwest::Client,
    url: String,
}

impl WebhookAnalytics {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).with_context(|| format!("invalid analytics webhook url: {url}"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to create HTTP client")?;

        info!("📊 Analytics webhook enabled");
        Ok(Self { client, url })
    }
}

impl AnalyticsSink for WebhookAnalytics {
    fn record(&self, event: PlaybackEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("📊 No runtime to deliver analytics event, dropping it");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .json(&event)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                warn!("📊 Analytics webhook failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn events_serialize_with_snake_case_kind() {
        let mut event = PlaybackEvent::new("abc", UserId::new(42), PlaybackEventKind::Skip);
        event.at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "skip");
        assert_eq!(json["track_id"], "abc");
    }

    #[test]
    fn webhook_rejects_invalid_urls() {
        assert!(WebhookAnalytics::new("not a url").is_err());
        assert!(WebhookAnalytics::new("https://hooks.example.com/playback").is_ok());
    }
}
