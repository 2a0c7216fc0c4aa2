use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// A provider callback we are still waiting for. The sender is taken out of
/// the entry on resolution, so a request id can be resolved at most once;
/// the entry then stays behind as a `Resolved` marker to detect duplicates.
struct PendingCallback {
    created: Instant,
    state: CallbackState,
}

enum CallbackState {
    Waiting(oneshot::Sender<Value>),
    Resolved,
}

type Registry = Arc<Mutex<HashMap<String, PendingCallback>>>;

enum ResolveOutcome {
    Delivered,
    UnknownId,
    AlreadyResolved,
}

/// How a callback wait ended. Callers can tell a delivered payload from a
/// deadline from a server shutdown.
#[derive(Debug)]
pub enum WaitOutcome {
    Delivered(Value),
    TimedOut,
    Cancelled,
}

/// Handle returned by [`WebhookServer::create_callback`]; blocks the owning
/// task until the provider posts a verdict, the deadline fires, or the
/// server stops.
pub struct CallbackWaiter {
    registry: Registry,
    request_id: String,
    rx: oneshot::Receiver<Value>,
}

impl CallbackWaiter {
    pub async fn wait(self, timeout: Duration) -> WaitOutcome {
        let CallbackWaiter {
            registry,
            request_id,
            rx,
        } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => WaitOutcome::Delivered(payload),
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => {
                // Nobody is listening anymore; drop the entry unless a
                // payload won the race, in which case the Resolved marker
                // keeps answering duplicates with 409.
                if let Ok(mut map) = registry.lock() {
                    if matches!(
                        map.get(&request_id),
                        Some(PendingCallback {
                            state: CallbackState::Waiting(_),
                            ..
                        })
                    ) {
                        map.remove(&request_id);
                    }
                }
                WaitOutcome::TimedOut
            }
        }
    }
}

/// Local HTTP listener that correlates asynchronous provider callbacks with
/// the requests that originated them. One instance is shared by every
/// webhook-mode target for the duration of a run.
pub struct WebhookServer {
    base_url: String,
    local_addr: SocketAddr,
    registry: Registry,
    shutdown: Option<oneshot::Sender<()>>,
    serve_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WebhookServer {
    /// Bind the listener and start serving. Port 0 is allowed; the
    /// advertised base URL always uses the actual bound port unless an
    /// explicit public base URL (e.g. a tunnel) is supplied.
    pub async fn start(
        host: &str,
        port: u16,
        base_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
        let local_addr = listener.local_addr()?;
        let base_url = base_url
            .unwrap_or_else(|| format!("http://{local_addr}"))
            .trim_end_matches('/')
            .to_string();

        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let app = Router::new()
            .route("/webhook/:request_id", post(handle_webhook))
            .with_state(registry.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                log::error!("webhook server error: {e}");
            }
        });

        log::info!("webhook server listening on {local_addr}");

        Ok(WebhookServer {
            base_url,
            local_addr,
            registry,
            shutdown: Some(shutdown_tx),
            serve_handle: Some(serve_handle),
        })
    }

    /// Register a pending callback and hand back the id, the URL the
    /// provider must post to, and the handle to wait on.
    pub fn create_callback(
        &self,
        request_id: Option<String>,
    ) -> (String, String, CallbackWaiter) {
        let request_id =
            request_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let (tx, rx) = oneshot::channel();

        if let Ok(mut map) = self.registry.lock() {
            map.insert(
                request_id.clone(),
                PendingCallback {
                    created: Instant::now(),
                    state: CallbackState::Waiting(tx),
                },
            );
        }

        let callback_url = format!("{}/webhook/{request_id}", self.base_url);
        log::debug!("registered callback {request_id} -> {callback_url}");

        let waiter = CallbackWaiter {
            registry: Arc::clone(&self.registry),
            request_id: request_id.clone(),
            rx,
        };
        (request_id, callback_url, waiter)
    }

    /// Number of callbacks still waiting for a provider post.
    pub fn pending_count(&self) -> usize {
        self.registry
            .lock()
            .map(|map| {
                map.values()
                    .filter(|entry| matches!(entry.state, CallbackState::Waiting(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel every open waiter, clear the registry, and shut the listener
    /// down. Waiters observe `Cancelled`, never a fabricated payload.
    pub async fn stop(&mut self) {
        if let Ok(mut map) = self.registry.lock() {
            let mut cancelled = 0usize;
            for (request_id, entry) in map.iter() {
                if matches!(entry.state, CallbackState::Waiting(_)) {
                    cancelled += 1;
                    log::debug!(
                        "cancelling callback {request_id} after {:.1}s",
                        entry.created.elapsed().as_secs_f64()
                    );
                }
            }
            map.clear();
            if cancelled > 0 {
                log::info!("cancelled {cancelled} pending callbacks");
            }
        }

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.serve_handle.take() {
            let _ = handle.await;
        }
        log::info!("webhook server stopped");
    }
}

fn resolve(registry: &Registry, request_id: &str, payload: Value) -> ResolveOutcome {
    let mut map = match registry.lock() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    match map.get_mut(request_id) {
        None => ResolveOutcome::UnknownId,
        Some(entry) => {
            match std::mem::replace(&mut entry.state, CallbackState::Resolved) {
                CallbackState::Waiting(tx) => {
                    let _ = tx.send(payload);
                    ResolveOutcome::Delivered
                }
                CallbackState::Resolved => ResolveOutcome::AlreadyResolved,
            }
        }
    }
}

async fn handle_webhook(
    Path(request_id): Path<String>,
    State(registry): State<Registry>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("invalid callback payload for request {request_id}: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid payload"})),
            );
        }
    };

    match resolve(&registry, &request_id, payload) {
        ResolveOutcome::Delivered => {
            log::info!("callback resolved for request {request_id}");
            (StatusCode::OK, Json(json!({"status": "ok"})))
        }
        ResolveOutcome::UnknownId => {
            log::warn!("callback for unknown request id {request_id}");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown request id"})),
            )
        }
        ResolveOutcome::AlreadyResolved => {
            log::warn!("duplicate callback for request {request_id}");
            (
                StatusCode::CONFLICT,
                Json(json!({"error": "already processed"})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn start_local() -> WebhookServer {
        WebhookServer::start("127.0.0.1", 0, None).await.unwrap()
    }

    #[tokio::test]
    async fn delivered_payload_reaches_the_waiter() {
        let mut server = start_local().await;
        let (_, callback_url, waiter) = server.create_callback(None);
        assert_eq!(server.pending_count(), 1);

        let client = reqwest::Client::new();
        let resp = client
            .post(&callback_url)
            .json(&json!({"data": {"status": "deliverable"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        match waiter.wait(Duration::from_secs(2)).await {
            WaitOutcome::Delivered(payload) => {
                assert_eq!(payload, json!({"data": {"status": "deliverable"}}));
            }
            other => panic!("expected Delivered, got {other:?}"),
        }
        assert_eq!(server.pending_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn duplicate_delivery_is_conflict_and_does_not_overwrite() {
        let mut server = start_local().await;
        let (_, callback_url, waiter) = server.create_callback(None);

        let client = reqwest::Client::new();
        let first = client
            .post(&callback_url)
            .json(&json!({"verdict": "first"}))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status().as_u16(), 200);

        let second = client
            .post(&callback_url)
            .json(&json!({"verdict": "second"}))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status().as_u16(), 409);

        match waiter.wait(Duration::from_secs(2)).await {
            WaitOutcome::Delivered(payload) => assert_eq!(payload, json!({"verdict": "first"})),
            other => panic!("expected Delivered, got {other:?}"),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn unknown_request_id_is_not_found() {
        let mut server = start_local().await;
        let url = format!("{}/webhook/no-such-id", server.base_url());

        let resp = reqwest::Client::new()
            .post(&url)
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        server.stop().await;
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_and_entry_stays_open() {
        let mut server = start_local().await;
        let (_, callback_url, waiter) = server.create_callback(None);

        let client = reqwest::Client::new();
        let bad = client
            .post(&callback_url)
            .body("definitely not json")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status().as_u16(), 400);
        assert_eq!(server.pending_count(), 1);

        // A retry with a valid body still succeeds.
        let good = client
            .post(&callback_url)
            .json(&json!({"ok": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(good.status().as_u16(), 200);

        match waiter.wait(Duration::from_secs(2)).await {
            WaitOutcome::Delivered(payload) => assert_eq!(payload, json!({"ok": true})),
            other => panic!("expected Delivered, got {other:?}"),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn waiter_times_out_when_no_callback_arrives() {
        let mut server = start_local().await;
        let (_, _, waiter) = server.create_callback(None);

        match waiter.wait(Duration::from_millis(50)).await {
            WaitOutcome::TimedOut => {}
            other => panic!("expected TimedOut, got {other:?}"),
        }
        // The abandoned entry is gone, so a late post is an unknown id.
        assert_eq!(server.pending_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_open_waiters() {
        let mut server = start_local().await;
        let (_, _, waiter) = server.create_callback(None);
        server.stop().await;

        match waiter.wait(Duration::from_secs(2)).await {
            WaitOutcome::Cancelled => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_url_override_is_advertised_instead_of_the_bound_address() {
        let mut server = WebhookServer::start(
            "127.0.0.1",
            0,
            Some("https://tunnel.example.com/".to_string()),
        )
        .await
        .unwrap();
        let (id, callback_url, _waiter) = server.create_callback(None);
        assert_eq!(
            callback_url,
            format!("https://tunnel.example.com/webhook/{id}")
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn explicit_request_id_is_embedded_in_the_url() {
        let mut server = start_local().await;
        let (id, callback_url, _waiter) = server.create_callback(Some("abc123".to_string()));
        assert_eq!(id, "abc123");
        assert!(callback_url.ends_with("/webhook/abc123"));
        server.stop().await;
    }
}
