//! Action registry and built-in handlers
//!
//! Actions are named asynchronous handlers with the signature
//! `handler(params, context) -> result`. The registry is populated once at
//! startup and read-only afterwards; the executor resolves node actions
//! against it by name.
//!
//! Handlers communicate across a run through the shared context map:
//! `http_request` leaves `last_http_*` keys behind, `email` leaves
//! `last_email_*`, and `check_ticket_assigned` mirrors the assignment flag
//! into `check_result` for edge conditions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::mail::{render_template, Mailer};

/// Shared mutable context of one execution.
///
/// Concurrent branch traversal is allowed, so the map sits behind an async
/// mutex; handlers hold the lock only around reads and writes, never across
/// their own I/O.
pub type Context = Arc<Mutex<Map<String, Value>>>;

/// Build a context from trigger data.
pub fn new_context(initial: Value) -> Context {
    let map = match initial {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    Arc::new(Mutex::new(map))
}

/// Clone the context into a plain JSON object.
pub async fn snapshot(ctx: &Context) -> Value {
    Value::Object(ctx.lock().await.clone())
}

/// Errors raised by action handlers
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Parameters missing or malformed
    #[error("{0}")]
    InvalidParams(String),

    /// Outbound request failed
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Delivery reported failure
    #[error("{0}")]
    Email(String),

    /// Anything else a handler wants to surface
    #[error("{0}")]
    Failed(String),
}

pub type HandlerFuture = BoxFuture<'static, Result<Value, ActionError>>;

/// A registered action implementation.
pub type ActionHandler = Arc<dyn Fn(Value, Context) -> HandlerFuture + Send + Sync>;

/// External collaborators the built-in handlers need.
#[derive(Clone)]
pub struct ActionDeps {
    pub http: reqwest::Client,
    pub mailer: Arc<dyn Mailer>,
}

/// Name → handler map, frozen after startup.
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in actions.
    pub fn with_builtins(deps: ActionDeps) -> Self {
        let mut registry = Self::new();

        registry.register("delay", |params: Value, _ctx| async move {
            let seconds = param_u64(&params, "seconds").unwrap_or(1);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(Value::Null)
        });

        registry.register("notify", |_params, _ctx| async move {
            tokio::task::yield_now().await;
            Ok(Value::Null)
        });

        let http = deps.http.clone();
        registry.register("http_request", move |params: Value, ctx: Context| {
            let http = http.clone();
            async move { handle_http_request(http, params, ctx).await }
        });

        let mailer = deps.mailer.clone();
        registry.register("email", move |params: Value, ctx: Context| {
            let mailer = mailer.clone();
            async move { handle_email(mailer, params, ctx).await }
        });

        registry.register("check_ticket_assigned", |_params, ctx: Context| async move {
            let mut guard = ctx.lock().await;
            let assigned = guard
                .get("ticket_assigned")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            guard.insert("ticket_assigned".to_string(), json!(assigned));
            guard.insert("check_result".to_string(), json!(assigned));
            Ok(Value::Null)
        });

        registry
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |p, c| Box::pin(handler(p, c))));
    }

    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn param_u64(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn handle_http_request(
    http: reqwest::Client,
    params: Value,
    ctx: Context,
) -> Result<Value, ActionError> {
    let method = param_str(&params, "method")
        .unwrap_or("GET")
        .to_uppercase();
    let url = param_str(&params, "url").unwrap_or("");
    let body = params.get("body").cloned().unwrap_or(json!({}));

    if url.is_empty() {
        return Err(ActionError::InvalidParams(
            "URL is required for HTTP request".to_string(),
        ));
    }

    let mut request = match method.as_str() {
        "GET" => http.get(url),
        "POST" => http.post(url).json(&body),
        "PUT" => http.put(url).json(&body),
        "PATCH" => http.patch(url).json(&body),
        "DELETE" => http.delete(url),
        other => {
            return Err(ActionError::InvalidParams(format!(
                "Unsupported HTTP method: {other}"
            )))
        }
    };

    if let Some(headers) = params.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name.as_str(), value);
            }
        }
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            ctx.lock()
                .await
                .insert("last_http_error".to_string(), json!(e.to_string()));
            return Err(ActionError::Http(e.to_string()));
        }
    };

    let status = response.status().as_u16();
    let response_headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                json!(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    let payload: Value = if is_json {
        response
            .json()
            .await
            .map_err(|e| ActionError::Http(e.to_string()))?
    } else {
        Value::String(
            response
                .text()
                .await
                .map_err(|e| ActionError::Http(e.to_string()))?,
        )
    };

    {
        let mut guard = ctx.lock().await;
        guard.insert("last_http_status".to_string(), json!(status));
        guard.insert("last_http_response".to_string(), payload.clone());
        guard.insert(
            "last_http_headers".to_string(),
            Value::Object(response_headers.clone()),
        );
    }

    Ok(json!({
        "status": "completed",
        "status_code": status,
        "response": payload,
        "headers": response_headers,
    }))
}

async fn handle_email(
    mailer: Arc<dyn Mailer>,
    params: Value,
    ctx: Context,
) -> Result<Value, ActionError> {
    let to = param_str(&params, "to").unwrap_or("").to_string();
    let subject = param_str(&params, "subject")
        .unwrap_or("Workflow Notification")
        .to_string();
    let body = param_str(&params, "body").unwrap_or("");
    let template = param_str(&params, "template").unwrap_or("");

    let (execution_id, step_id, context_snapshot) = {
        let guard = ctx.lock().await;
        let execution_id = guard
            .get("execution_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let step_id = guard
            .get("current_step_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        (execution_id, step_id, Value::Object(guard.clone()))
    };

    let email_body = if !body.is_empty() {
        body.to_string()
    } else if !template.is_empty() {
        render_template(template, &context_snapshot)
    } else {
        "No content provided".to_string()
    };

    if to.is_empty() {
        return Err(ActionError::InvalidParams(
            "Email 'to' address is required".to_string(),
        ));
    }

    let receipt = mailer
        .send_email(&to, &subject, &email_body, execution_id, step_id.as_deref())
        .await;

    if !receipt.success {
        return Err(ActionError::Email(format!(
            "Failed to send email to {to}: {}",
            receipt.error.as_deref().unwrap_or("Unknown error")
        )));
    }

    {
        let mut guard = ctx.lock().await;
        guard.insert("last_email_id".to_string(), json!(receipt.email_id));
        guard.insert("last_email_status".to_string(), json!(receipt.success));
        guard.insert("last_email_to".to_string(), json!(to));
        guard.insert("last_email_subject".to_string(), json!(subject));
    }

    Ok(json!({
        "status": "completed",
        "email_id": receipt.email_id,
        "to": to,
        "subject": subject,
        "success": true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;
    use cascade_storage::MemoryCache;

    fn deps() -> (ActionDeps, Arc<MemoryMailer>) {
        let cache = Arc::new(MemoryCache::new());
        let mailer = Arc::new(MemoryMailer::new(cache));
        (
            ActionDeps {
                http: reqwest::Client::new(),
                mailer: mailer.clone(),
            },
            mailer,
        )
    }

    #[tokio::test]
    async fn test_builtins_are_registered() {
        let (deps, _) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        for name in ["delay", "notify", "http_request", "email", "check_ticket_assigned"] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_sleeps_for_param_seconds() {
        let (deps, _) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("delay").unwrap();

        let started = tokio::time::Instant::now();
        handler(json!({"seconds": 3}), new_context(Value::Null))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_http_request_validates_params() {
        let (deps, _) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("http_request").unwrap();

        let err = handler(json!({}), new_context(Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "URL is required for HTTP request");

        let err = handler(
            json!({"url": "http://localhost", "method": "BREW"}),
            new_context(Value::Null),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported HTTP method: BREW");
    }

    #[tokio::test]
    async fn test_email_renders_template_and_updates_context() {
        let (deps, mailer) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("email").unwrap();
        let ctx = new_context(json!({"ticket_id": 7, "ticket_title": "Broken", "user_email": "u@x.y"}));

        let result = handler(
            json!({"to": "u@x.y", "template": "ack_ticket", "subject": "Ticket Received"}),
            ctx.clone(),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "completed");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("#7"));

        let guard = ctx.lock().await;
        assert_eq!(guard["last_email_to"], "u@x.y");
        assert_eq!(guard["last_email_status"], true);
    }

    #[tokio::test]
    async fn test_email_requires_recipient() {
        let (deps, _) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("email").unwrap();

        let err = handler(json!({"subject": "x"}), new_context(Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email 'to' address is required");
    }

    #[tokio::test]
    async fn test_email_failure_propagates() {
        let (deps, mailer) = deps();
        mailer.fail_sends(true);
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("email").unwrap();

        let err = handler(
            json!({"to": "u@x.y", "body": "hello"}),
            new_context(Value::Null),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Failed to send email to u@x.y"));
    }

    #[tokio::test]
    async fn test_check_ticket_assigned_mirrors_flag() {
        let (deps, _) = deps();
        let registry = ActionRegistry::with_builtins(deps);
        let handler = registry.get("check_ticket_assigned").unwrap();

        let ctx = new_context(json!({"ticket_assigned": true}));
        handler(json!({}), ctx.clone()).await.unwrap();
        assert_eq!(ctx.lock().await["check_result"], true);

        let ctx = new_context(Value::Null);
        handler(json!({}), ctx.clone()).await.unwrap();
        assert_eq!(ctx.lock().await["check_result"], false);
    }
}
