//! Notification delivery seam
//!
//! Sinks are opaque collaborators: delivery is fire-and-forget from the
//! engine's perspective and a failed delivery is logged, never propagated.

use crate::models::Notification;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use async_trait::async_trait;

/// Trait for notification delivery implementations
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification to this sink's channel
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Configured delivery channels, kept for configuration export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Log notifications to the console
    #[serde(default)]
    pub console: bool,
    /// Email recipients
    #[serde(default)]
    pub email: Vec<String>,
    /// Webhook endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

/// Sink that writes notifications to the tracing log
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match notification.severity {
            crate::models::Severity::Critical | crate::models::Severity::Error => {
                error!(
                    severity = %notification.severity,
                    recovery_actions = ?notification.recovery_actions,
                    "{}",
                    notification.message
                );
            }
            crate::models::Severity::Warning => {
                warn!(severity = %notification.severity, "{}", notification.message);
            }
            crate::models::Severity::Info => {
                info!(severity = %notification.severity, "{}", notification.message);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use serde_json::json;

    #[tokio::test]
    async fn test_console_sink_accepts_all_severities() {
        let sink = ConsoleSink;
        for severity in [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ] {
            let notification = Notification {
                severity,
                message: "test".to_string(),
                context: json!({}),
                recovery_actions: vec!["restart".to_string()],
            };
            assert!(sink.notify(&notification).await.is_ok());
        }
    }

    #[test]
    fn test_channel_config_roundtrip() {
        let config = ChannelConfig {
            console: true,
            email: vec!["ops@example.com".to_string()],
            webhook: Some("https://hooks.example.com/alerts".to_string()),
        };

        let json = serde_json::to_string(&config).unwrap();
        let restored: ChannelConfig = serde_json::from_str(&json).unwrap();

        assert!(restored.console);
        assert_eq!(restored.email, config.email);
        assert_eq!(restored.webhook, config.webhook);
    }
}
