use serde_json::json;

use crate::http_client::HttpClient;

/// Fire-and-forget webhook pings for admins. Disabled unless a webhook URL is
/// configured; delivery failures are logged and never surfaced to callers.
#[derive(Clone)]
pub struct Notifier {
    client: HttpClient,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: HttpClient::new(),
            webhook_url,
        }
    }

    /// Tells admins a new request is waiting for review.
    pub fn pending_request(&self, request_type: &str, user_name: &str, summary: &str) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let body = json!({
            "text": format!(
                "Nova solicitação pendente: {} de {} ({})",
                request_type, user_name, summary
            ),
            "request_type": request_type,
            "user": user_name,
        });

        tokio::spawn(async move {
            match client.post_json(&url, &body).await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("Webhook notification delivered");
                }
                Ok(resp) => {
                    tracing::warn!("Webhook returned status {}", resp.status());
                }
                Err(e) => {
                    tracing::warn!("Webhook notification failed: {}", e);
                }
            }
        });
    }
}
