//! Subscription management, event matching, signed delivery, and SSRF
//! guarding. See SPEC_FULL.md §4.H.

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use vibe_core::error::VibeError;
use vibe_core::types::{WebhookSubscription, EVENT_TYPES};

use crate::store::Store;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONCURRENT_DELIVERIES: usize = 10;
const MAX_SUBSCRIPTIONS_PER_PROJECT: usize = 50;
const MAX_SUBSCRIPTIONS_GLOBAL: usize = 200;

const BLOCKED_HOSTNAMES: &[&str] =
    &["localhost", "127.0.0.1", "::1", "0.0.0.0", "metadata.google.internal", "metadata.goog"];

/// A subscription with its secret stripped — the shape returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct PublicSubscription {
    pub id: i64,
    pub url: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub active: bool,
}

impl From<WebhookSubscription> for PublicSubscription {
    fn from(s: WebhookSubscription) -> Self {
        Self {
            id: s.id,
            url: s.url,
            event_types: s.event_types,
            project: s.project,
            description: s.description,
            active: s.active,
        }
    }
}

pub struct RegisterResult {
    pub subscription_id: i64,
    pub url: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
}

/// Manages webhook subscriptions and fire-and-forget event delivery.
pub struct WebhookEngine {
    store: Arc<Store>,
    webhooks_enabled: bool,
    http: reqwest::Client,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
    /// Handles for spawned delivery tasks, so `shutdown` can drain them
    /// instead of letting the runtime abort them mid-flight.
    deliveries: Mutex<JoinSet<()>>,
}

impl WebhookEngine {
    pub fn new(store: Arc<Store>, webhooks_enabled: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            store,
            webhooks_enabled,
            http,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_DELIVERIES)),
            shutdown: Arc::new(AtomicBool::new(false)),
            deliveries: Mutex::new(JoinSet::new()),
        }
    }

    pub fn register(
        &self,
        url: &str,
        secret: &str,
        event_types: &[String],
        project: Option<&str>,
        description: Option<&str>,
    ) -> Result<RegisterResult, VibeError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(VibeError::input_invalid("URL must start with http:// or https://"));
        }

        is_safe_url(url).map_err(|msg| VibeError::input_invalid(format!("unsafe webhook URL: {msg}")))?;

        if secret.len() < 32 {
            return Err(VibeError::input_invalid("secret must be at least 32 characters"));
        }

        if event_types.is_empty() {
            return Err(VibeError::input_invalid("at least one event type is required"));
        }
        let invalid: Vec<&String> =
            event_types.iter().filter(|t| !EVENT_TYPES.contains(&t.as_str())).collect();
        if !invalid.is_empty() {
            let names = invalid.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            return Err(VibeError::input_invalid(format!("invalid event types: {names}")));
        }

        let existing = self
            .store
            .list_webhook_subscriptions(project, true)
            .map_err(|e| VibeError::input_invalid(e.to_string()))?;

        if let Some(p) = project {
            let project_count = existing.iter().filter(|s| s.project.as_deref() == Some(p)).count();
            if project_count >= MAX_SUBSCRIPTIONS_PER_PROJECT {
                return Err(VibeError::input_invalid(format!(
                    "Maximum subscriptions ({MAX_SUBSCRIPTIONS_PER_PROJECT}) reached for project: {p}"
                )));
            }
        } else {
            let global_count = existing.iter().filter(|s| s.project.is_none()).count();
            if global_count >= MAX_SUBSCRIPTIONS_GLOBAL {
                return Err(VibeError::input_invalid(format!(
                    "Maximum global subscriptions ({MAX_SUBSCRIPTIONS_GLOBAL}) reached"
                )));
            }
        }

        let subscription_id = self
            .store
            .create_webhook_subscription(url, secret, event_types, project, description)
            .map_err(|e| VibeError::input_invalid(e.to_string()))?;

        let secret_hint = format!(
            "{}...{}",
            &secret[..secret.len().min(4)],
            &secret[secret.len().saturating_sub(4)..]
        );
        info!(subscription_id, url, secret_hint, "registered webhook subscription");

        Ok(RegisterResult {
            subscription_id,
            url: url.to_string(),
            event_types: event_types.to_vec(),
            project: project.map(|s| s.to_string()),
        })
    }

    pub fn unregister(&self, subscription_id: i64) -> Result<(), VibeError> {
        let deleted = self
            .store
            .delete_webhook_subscription(subscription_id)
            .map_err(|e| VibeError::not_found(e.to_string()))?;
        if !deleted {
            return Err(VibeError::not_found(format!("subscription not found: {subscription_id}")));
        }
        info!(subscription_id, "unregistered webhook subscription");
        Ok(())
    }

    pub fn list_subscriptions(
        &self,
        project: Option<&str>,
    ) -> Result<Vec<PublicSubscription>, VibeError> {
        let subs = self
            .store
            .list_webhook_subscriptions(project, false)
            .map_err(|e| VibeError::input_invalid(e.to_string()))?;
        Ok(subs.into_iter().map(PublicSubscription::from).collect())
    }

    /// Fire an event asynchronously. Non-blocking: schedules one delivery
    /// task per matching subscription onto a bounded-concurrency pool and
    /// returns immediately.
    pub fn fire_event(&self, event_type: &str, project: Option<&str>, data: serde_json::Value) {
        if !self.webhooks_enabled {
            return;
        }
        if self.shutdown.load(Ordering::SeqCst) {
            warn!(event_type, "webhook engine is shutting down, skipping event");
            return;
        }

        let subscriptions = match self.store.get_active_subscriptions_for_event(event_type, project) {
            Ok(subs) => subs,
            Err(e) => {
                warn!(event_type, error = %e, "failed to look up subscriptions");
                return;
            }
        };
        if subscriptions.is_empty() {
            return;
        }

        let event_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339();
        let payload = serde_json::json!({
            "event_id": event_id,
            "event_type": event_type,
            "project": project,
            "timestamp": timestamp,
            "data": data,
        });
        let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();

        let mut deliveries = self.deliveries.lock().unwrap();
        for subscription in subscriptions {
            let http = self.http.clone();
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&self.semaphore);
            let shutdown = Arc::clone(&self.shutdown);
            let payload_bytes = payload_bytes.clone();
            let event_type = event_type.to_string();
            let event_id = event_id.clone();

            deliveries.spawn(async move {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                let Ok(_permit) = semaphore.acquire().await else { return };
                deliver(&http, &store, &subscription, &event_type, &event_id, &payload_bytes).await;
            });
        }
    }

    /// Signal shutdown: subsequent `fire_event` calls become no-ops and no
    /// new delivery tasks are scheduled. Waits up to `DELIVERY_TIMEOUT` for
    /// in-flight deliveries to finish before returning, mirroring the
    /// Syncer's bounded-wait `stop`.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let mut set = {
            let mut guard = self.deliveries.lock().unwrap();
            std::mem::replace(&mut *guard, JoinSet::new())
        };

        let drain = async {
            while set.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DELIVERY_TIMEOUT, drain).await.is_err() {
            warn!("webhook engine did not drain in-flight deliveries within the grace period");
        }
    }
}

async fn deliver(
    http: &reqwest::Client,
    store: &Store,
    subscription: &WebhookSubscription,
    event_type: &str,
    event_id: &str,
    payload_bytes: &[u8],
) {
    let signature = generate_signature(payload_bytes, &subscription.secret);

    let mut status_code: Option<i32> = None;
    let mut success = false;
    let mut error_message: Option<String> = None;

    let result = http
        .post(&subscription.url)
        .header("Content-Type", "application/json")
        .header("X-Vibe-Signature", format!("sha256={signature}"))
        .header("X-Vibe-Event", event_type)
        .header("X-Vibe-Event-ID", event_id)
        .body(payload_bytes.to_vec())
        .send()
        .await;

    match result {
        Ok(response) => {
            let status = response.status();
            status_code = Some(status.as_u16() as i32);
            success = status.is_success();
            if !success {
                let body = response.text().await.unwrap_or_default();
                let truncated: String = body.chars().take(200).collect();
                error_message = Some(format!("HTTP {}: {truncated}", status.as_u16()));
                warn!(subscription_id = subscription.id, status = status.as_u16(), "webhook delivery failed");
            } else {
                info!(event_id, subscription_id = subscription.id, url = %subscription.url, "webhook delivered");
            }
        }
        Err(e) if e.is_timeout() => {
            error_message = Some("request timed out".to_string());
            warn!(subscription_id = subscription.id, url = %subscription.url, "webhook delivery timed out");
        }
        Err(e) => {
            error_message = Some(e.to_string());
            warn!(subscription_id = subscription.id, error = %error_message, "webhook delivery error");
        }
    }

    let payload_str = String::from_utf8_lossy(payload_bytes).to_string();
    if let Err(e) = store.log_webhook_delivery(
        subscription.id,
        event_type,
        event_id,
        &payload_str,
        status_code,
        success,
        error_message.as_deref(),
    ) {
        warn!(event_id, error = %e, "failed to record delivery log");
    }
}

fn generate_signature(payload: &[u8], secret: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// SSRF guard: reject blocked literal hostnames and any resolved address
/// within a blocked private/loopback/link-local range. DNS resolution
/// failures are tolerated — registration proceeds.
fn is_safe_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("URL must use http or https scheme".to_string());
    }

    let hostname = parsed.host_str().ok_or_else(|| "URL must have a valid hostname".to_string())?;

    if BLOCKED_HOSTNAMES.contains(&hostname.to_lowercase().as_str()) {
        return Err(format!("blocked hostname: {hostname}"));
    }

    let lookup = format!("{hostname}:0");
    if let Ok(addrs) = lookup.to_socket_addrs() {
        for addr in addrs {
            if is_blocked_ip(addr.ip()) {
                return Err(format!("URL resolves to blocked IP range: {}", addr.ip()));
            }
        }
    }
    // Resolution failure is tolerated — the original tool's DNS lookup may
    // simply be unreachable right now; it does not make the URL unsafe.

    Ok(())
}

fn is_blocked_ip(ip: std::net::IpAddr) -> bool {
    use std::net::IpAddr;
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || is_unique_local_v6(v6) || is_link_local_v6(v6)
        }
    }
}

fn is_unique_local_v6(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_localhost_literal() {
        assert!(is_safe_url("http://localhost/").is_err());
        assert!(is_safe_url("http://127.0.0.1/").is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(is_safe_url("ftp://example.com/").is_err());
    }

    #[test]
    fn signature_matches_hmac_sha256_hex() {
        let sig = generate_signature(b"hello", "a-32-character-minimum-secret!!!");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn blocked_ip_ranges_cover_private_space() {
        assert!(is_blocked_ip("10.0.0.5".parse().unwrap()));
        assert!(is_blocked_ip("192.168.1.1".parse().unwrap()));
        assert!(is_blocked_ip("172.16.0.1".parse().unwrap()));
        assert!(is_blocked_ip("169.254.1.1".parse().unwrap()));
        assert!(!is_blocked_ip("8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_deliveries() {
        use crate::store::Store;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("index.db")));
        store.initialize().unwrap();

        let secret = "a".repeat(32);
        let engine = WebhookEngine::new(Arc::clone(&store), true);
        engine
            .register(&mock_server.uri(), &secret, &["task.created".to_string()], None, None)
            .unwrap();

        engine.fire_event("task.created", None, serde_json::json!({}));
        engine.shutdown().await;

        let logs = store.list_delivery_logs(None).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
    }
}
