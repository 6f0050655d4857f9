//! E-mail collaborator seam
//!
//! The engine never talks SMTP itself; it hands messages to a [`Mailer`].
//! Whatever the transport, a mailer records per-message state under
//! `email:<id>` in the cache and publishes lifecycle events on the
//! [`EMAIL_EVENTS_CHANNEL`] pub/sub channel, which the
//! [`crate::monitor::EmailMonitor`] observes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use cascade_core::condition::lookup_path;
use cascade_storage::Cache;

/// Pub/sub channel carrying e-mail lifecycle events.
pub const EMAIL_EVENTS_CHANNEL: &str = "email_events";

const EMAIL_STATE_TTL: Duration = Duration::from_secs(3600);

/// Outcome of a delivery attempt.
#[derive(Debug, Clone)]
pub struct EmailReceipt {
    pub success: bool,
    pub email_id: Uuid,
    pub error: Option<String>,
}

/// Asynchronous e-mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        execution_id: Option<Uuid>,
        step_id: Option<&str>,
    ) -> EmailReceipt;
}

/// Render a named HTML template against a context.
///
/// Unknown names render a placeholder body rather than failing the send.
pub fn render_template(name: &str, ctx: &Value) -> String {
    let get = |path: &str| -> String {
        match lookup_path(ctx, path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "N/A".to_string(),
            Some(other) => other.to_string(),
        }
    };

    match name {
        "ack_ticket" => format!(
            "<h2>Ticket Acknowledgment</h2>\n\
             <p>We've received your ticket (#{}). Our team will get back to you soon.</p>\n\
             <p>Ticket Title: {}</p>",
            get("ticket_id"),
            get("ticket_title"),
        ),
        "escalate_ticket" => format!(
            "<h2>Ticket Escalation</h2>\n\
             <p>Ticket #{} has not been assigned for 2 hours. Please review.</p>\n\
             <p>Ticket Title: {}</p>\n\
             <p>User: {}</p>",
            get("ticket_id"),
            get("ticket_title"),
            get("user_email"),
        ),
        _ => "Template not found".to_string(),
    }
}

/// A message accepted by [`MemoryMailer`].
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub email_id: Uuid,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub execution_id: Option<Uuid>,
    pub step_id: Option<String>,
}

/// In-process mailer.
///
/// Keeps accepted messages in an outbox instead of speaking SMTP; cache
/// bookkeeping and event publication match what a transport-backed mailer
/// does, so the rest of the engine cannot tell the difference. Tests flip
/// `fail_sends` to exercise delivery-failure paths.
pub struct MemoryMailer {
    cache: Arc<dyn Cache>,
    outbox: Mutex<Vec<SentEmail>>,
    fail_sends: AtomicBool,
}

impl MemoryMailer {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            outbox: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Make subsequent sends report failure (for testing).
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.outbox.lock().clone()
    }

    async fn record_state(&self, email_id: Uuid, state: &Value) {
        if let Err(e) = self
            .cache
            .set_json(&format!("email:{email_id}"), state, Some(EMAIL_STATE_TTL))
            .await
        {
            warn!(%email_id, "failed to record email state: {}", e);
        }
    }

    async fn publish_event(&self, event: &Value) {
        if let Err(e) = self.cache.publish(EMAIL_EVENTS_CHANNEL, event).await {
            warn!("failed to publish email event: {}", e);
        }
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        execution_id: Option<Uuid>,
        step_id: Option<&str>,
    ) -> EmailReceipt {
        let email_id = Uuid::now_v7();
        let now = Utc::now();

        let mut state = json!({
            "id": email_id,
            "to": to,
            "subject": subject,
            "body": body,
            "execution_id": execution_id,
            "step_id": step_id,
            "status": "pending",
            "timestamp": now,
            "attempts": 0,
        });
        self.record_state(email_id, &state).await;

        self.publish_event(&json!({
            "type": "email_send_attempt",
            "email_id": email_id,
            "to": to,
            "subject": subject,
            "execution_id": execution_id,
            "step_id": step_id,
            "timestamp": now,
        }))
        .await;

        if self.fail_sends.load(Ordering::Relaxed) {
            let error = "transport unavailable".to_string();
            state["status"] = json!("failed");
            state["error"] = json!(error.clone());
            state["attempts"] = json!(1);
            self.record_state(email_id, &state).await;

            self.publish_event(&json!({
                "type": "email_failed",
                "email_id": email_id,
                "to": to,
                "subject": subject,
                "execution_id": execution_id,
                "step_id": step_id,
                "error": error.clone(),
                "timestamp": Utc::now(),
            }))
            .await;

            return EmailReceipt {
                success: false,
                email_id,
                error: Some(error),
            };
        }

        self.outbox.lock().push(SentEmail {
            email_id,
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            execution_id,
            step_id: step_id.map(str::to_string),
        });

        state["status"] = json!("sent");
        state["sent_at"] = json!(Utc::now());
        self.record_state(email_id, &state).await;

        self.publish_event(&json!({
            "type": "email_sent",
            "email_id": email_id,
            "to": to,
            "subject": subject,
            "execution_id": execution_id,
            "step_id": step_id,
            "timestamp": Utc::now(),
        }))
        .await;

        EmailReceipt {
            success: true,
            email_id,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_storage::MemoryCache;
    use futures::StreamExt;

    #[test]
    fn test_templates_substitute_context() {
        let ctx = json!({"ticket_id": 42, "ticket_title": "Printer on fire", "user_email": "a@b.c"});

        let ack = render_template("ack_ticket", &ctx);
        assert!(ack.contains("#42"));
        assert!(ack.contains("Printer on fire"));

        let escalate = render_template("escalate_ticket", &ctx);
        assert!(escalate.contains("a@b.c"));

        assert_eq!(render_template("nope", &ctx), "Template not found");
    }

    #[test]
    fn test_templates_tolerate_missing_fields() {
        let ack = render_template("ack_ticket", &json!({}));
        assert!(ack.contains("#N/A"));
    }

    #[tokio::test]
    async fn test_send_records_state_and_publishes() {
        let cache = Arc::new(MemoryCache::new());
        let mut events = cache.subscribe(EMAIL_EVENTS_CHANNEL).await.unwrap();
        let mailer = MemoryMailer::new(cache.clone());

        let receipt = mailer
            .send_email("a@b.c", "Hi", "<p>hi</p>", None, Some("ack_email"))
            .await;
        assert!(receipt.success);
        assert_eq!(mailer.sent().len(), 1);

        let state = cache
            .get_json(&format!("email:{}", receipt.email_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["status"], "sent");

        assert_eq!(events.next().await.unwrap()["type"], "email_send_attempt");
        assert_eq!(events.next().await.unwrap()["type"], "email_sent");
    }

    #[tokio::test]
    async fn test_failed_send_reports_error() {
        let cache = Arc::new(MemoryCache::new());
        let mut events = cache.subscribe(EMAIL_EVENTS_CHANNEL).await.unwrap();
        let mailer = MemoryMailer::new(cache.clone());
        mailer.fail_sends(true);

        let receipt = mailer.send_email("a@b.c", "Hi", "body", None, None).await;
        assert!(!receipt.success);
        assert!(receipt.error.is_some());
        assert!(mailer.sent().is_empty());

        assert_eq!(events.next().await.unwrap()["type"], "email_send_attempt");
        assert_eq!(events.next().await.unwrap()["type"], "email_failed");

        let state = cache
            .get_json(&format!("email:{}", receipt.email_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["status"], "failed");
    }
}
