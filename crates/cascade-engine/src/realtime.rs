//! External realtime bridge
//!
//! Publishes job and execution events to an external channel provider
//! (Ably's REST interface) and issues capability tokens for browser
//! clients. When no API key is configured every publish degrades to a
//! logged no-op and token requests return a mock; the bridge never fails
//! its caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const ABLY_REST_BASE: &str = "https://rest.ably.io";

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 3600;

/// Best-effort publisher to an external realtime channel.
#[async_trait]
pub trait RealtimeBridge: Send + Sync {
    /// Publish an event; errors are logged, never surfaced.
    async fn publish(&self, channel: &str, event: &str, data: &Value);

    /// Time-limited capability token for a client, scoped to the user's
    /// job channels.
    async fn token_request(&self, user_id: &str) -> Value;
}

/// Bridge used when no provider is configured: logs and moves on.
pub struct NoopBridge;

#[async_trait]
impl RealtimeBridge for NoopBridge {
    async fn publish(&self, channel: &str, event: &str, _data: &Value) {
        debug!(%channel, %event, "simulated realtime publish");
    }

    async fn token_request(&self, _user_id: &str) -> Value {
        json!({
            "keyName": "mock-key",
            "timestamp": Utc::now().timestamp_millis(),
            "nonce": "mock-nonce",
            "mac": "mock-mac",
        })
    }
}

#[derive(Serialize)]
struct AblyJwtClaims {
    iat: i64,
    exp: i64,
    #[serde(rename = "x-ably-capability")]
    capability: String,
    #[serde(rename = "x-ably-clientId")]
    client_id: String,
}

/// Ably-backed bridge publishing over REST and signing JWT tokens with the
/// API key secret.
pub struct AblyBridge {
    key_name: String,
    key_secret: String,
    http: reqwest::Client,
}

impl AblyBridge {
    /// Build from an `app.key:secret` API key; `None` when the key is not
    /// in that form.
    pub fn new(api_key: &str) -> Option<Self> {
        let (key_name, key_secret) = api_key.split_once(':')?;
        if key_name.is_empty() || key_secret.is_empty() {
            return None;
        }
        Some(Self {
            key_name: key_name.to_string(),
            key_secret: key_secret.to_string(),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl RealtimeBridge for AblyBridge {
    async fn publish(&self, channel: &str, event: &str, data: &Value) {
        let url = format!("{ABLY_REST_BASE}/channels/{channel}/messages");
        let body = json!({"name": event, "data": data});

        let result = self
            .http
            .post(&url)
            .basic_auth(&self.key_name, Some(&self.key_secret))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(%channel, %event, "published realtime event");
            }
            Ok(resp) => {
                warn!(%channel, %event, status = %resp.status(), "realtime publish rejected");
            }
            Err(e) => {
                warn!(%channel, %event, "realtime publish failed: {}", e);
            }
        }
    }

    async fn token_request(&self, user_id: &str) -> Value {
        let now = Utc::now().timestamp();
        let mut capability = serde_json::Map::new();
        capability.insert(format!("user-{user_id}-job-updates"), json!(["subscribe"]));
        capability.insert(format!("user-{user_id}-job-list"), json!(["subscribe"]));
        capability.insert("job-updates-*".to_string(), json!(["subscribe"]));
        let capability = Value::Object(capability);

        let claims = AblyJwtClaims {
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            capability: capability.to_string(),
            client_id: format!("user-{user_id}"),
        };

        let mut header = Header::default();
        header.kid = Some(self.key_name.clone());

        match encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.key_secret.as_bytes()),
        ) {
            Ok(token) => json!({
                "kind": "jwt",
                "token": token,
                "keyName": self.key_name,
                "expires": (now + TOKEN_TTL_SECS) * 1000,
                "clientId": format!("user-{user_id}"),
            }),
            Err(e) => {
                warn!("failed to sign realtime token: {}", e);
                NoopBridge.token_request(user_id).await
            }
        }
    }
}

/// Pick the bridge implementation from an optional API key.
pub fn bridge_from_key(api_key: Option<&str>) -> Arc<dyn RealtimeBridge> {
    match api_key.and_then(AblyBridge::new) {
        Some(bridge) => {
            tracing::info!("realtime bridge enabled");
            Arc::new(bridge)
        }
        None => {
            tracing::info!("no realtime key configured - publishes will be simulated");
            Arc::new(NoopBridge)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    #[tokio::test]
    async fn test_noop_bridge_never_fails() {
        let bridge = NoopBridge;
        bridge.publish("refresh-jobs", "job-status-update", &json!({})).await;

        let token = bridge.token_request("u1").await;
        assert_eq!(token["keyName"], "mock-key");
    }

    #[test]
    fn test_ably_key_parsing() {
        assert!(AblyBridge::new("app.key:secret").is_some());
        assert!(AblyBridge::new("no-separator").is_none());
        assert!(AblyBridge::new(":secret-only").is_none());
    }

    #[tokio::test]
    async fn test_token_request_is_verifiable_jwt() {
        let bridge = AblyBridge::new("app.key:topsecret").unwrap();
        let token = bridge.token_request("42").await;
        assert_eq!(token["kind"], "jwt");

        #[derive(serde::Deserialize)]
        struct Claims {
            #[serde(rename = "x-ably-capability")]
            capability: String,
            #[serde(rename = "x-ably-clientId")]
            client_id: String,
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        let decoded = decode::<Claims>(
            token["token"].as_str().unwrap(),
            &DecodingKey::from_secret(b"topsecret"),
            &validation,
        )
        .expect("token verifies with the key secret");

        assert_eq!(decoded.claims.client_id, "user-42");
        assert!(decoded.claims.capability.contains("user-42-job-list"));
    }

    #[test]
    fn test_bridge_from_key_fallback() {
        // Unparseable or absent keys fall back to the noop bridge; the
        // trait object hides which one we got, so just ensure no panic.
        let _ = bridge_from_key(None);
        let _ = bridge_from_key(Some("garbage"));
        let _ = bridge_from_key(Some("app.key:secret"));
    }
}
