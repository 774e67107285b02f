// Fire-and-forget trade notifications
//
// Delivery runs detached from the caller. A failed notification is logged and
// never reaches the code that committed the trade state. Short-lived tools call
// `flush` before exiting so queued deliveries are not dropped with the runtime.

use crate::models::TradeEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub trade_id: Option<i64>,
    pub symbol: String,
    pub event: TradeEvent,
    pub message: String,
}

impl Notification {
    pub fn new(trade_id: i64, symbol: &str, event: TradeEvent, message: impl Into<String>) -> Self {
        Self {
            trade_id: Some(trade_id),
            symbol: symbol.to_string(),
            event,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Queue a notification; never blocks and never fails
    fn notify(&self, notification: Notification);

    /// Wait for queued deliveries to finish
    async fn flush(&self) {}
}

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            trade_id = ?notification.trade_id,
            symbol = %notification.symbol,
            event = %notification.event,
            "🔔 {}",
            notification.message
        );
    }
}

/// Posts notifications as JSON to a webhook
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            pending: Arc::new(Mutex::new(JoinSet::new())),
        })
    }

    /// Deliver one notification and wait for the response
    pub async fn send(&self, notification: &Notification) -> reqwest::Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        let notifier = self.clone();
        let delivery = async move {
            if let Err(e) = notifier.send(&notification).await {
                tracing::warn!(
                    "Webhook notification for {} ({}) failed: {}",
                    notification.symbol,
                    notification.event,
                    e
                );
            }
        };

        match self.pending.lock() {
            Ok(mut pending) => {
                // Reap finished deliveries so a long-running daemon does not accumulate them
                while pending.try_join_next().is_some() {}
                pending.spawn(delivery);
            }
            Err(_) => {
                tokio::spawn(delivery);
            }
        }
    }

    async fn flush(&self) {
        let mut pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notification {
        Notification::new(7, "BTCUSDT", TradeEvent::Closed, "closed at 51000")
    }

    #[tokio::test]
    async fn test_webhook_posts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "trade_id": 7,
                "symbol": "BTCUSDT",
                "event": "closed",
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();
        notifier.send(&sample()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();
        assert!(notifier.send(&sample()).await.is_err());

        // The detached path only logs
        notifier.notify(sample());
        notifier.flush().await;
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_delivery() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();
        notifier.notify(sample());
        notifier.notify(sample());
        notifier.flush().await;

        mock.assert_async().await;
    }
}
