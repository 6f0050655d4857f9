//! E-mail event monitor
//!
//! Long-lived listener on the cache pub/sub `email_events` channel. Logs
//! delivery transitions and dispatches registered per-event-type
//! callbacks. A subscription failure disables monitoring but never takes
//! the process down.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cascade_storage::Cache;

use crate::mail::EMAIL_EVENTS_CHANNEL;

/// Callback invoked with the raw event payload.
pub type EventCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Observer of the `email_events` channel.
pub struct EmailMonitor {
    cache: Arc<dyn Cache>,
    callbacks: RwLock<HashMap<String, EventCallback>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EmailMonitor {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cache,
            callbacks: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Register a callback for one event type (`email_sent`,
    /// `email_failed`, `email_send_attempt`).
    pub fn register_callback<F, Fut>(&self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.callbacks.write().insert(
            event_type.into(),
            Arc::new(move |event| Box::pin(callback(event))),
        );
    }

    /// Spawn the listener task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run().await;
        })
    }

    /// Stop the listener.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn run(&self) {
        let mut stream = match self.cache.subscribe(EMAIL_EVENTS_CHANNEL).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("email monitor failed to start: {}; monitoring disabled", e);
                return;
            }
        };

        info!("email monitor started");
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                event = stream.next() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("email event stream closed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        info!("email monitor stopped");
    }

    async fn handle_event(&self, event: Value) {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let email_id = event.get("email_id").and_then(Value::as_str).unwrap_or("?");
        let to = event.get("to").and_then(Value::as_str).unwrap_or("?");

        match event_type.as_str() {
            "email_send_attempt" => info!(%email_id, %to, "email send attempt"),
            "email_sent" => info!(%email_id, %to, "email sent"),
            "email_failed" => {
                let cause = event.get("error").and_then(Value::as_str).unwrap_or("?");
                error!(%email_id, %to, %cause, "email failed");
            }
            other => warn!(event_type = %other, "unrecognized email event"),
        }

        let callback = self.callbacks.read().get(&event_type).cloned();
        if let Some(callback) = callback {
            callback(event).await;
        }
    }
}
