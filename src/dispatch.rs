use crate::classify::{classify, Classification};
use crate::config::{HttpMethod, TargetConfig, TargetMode};
use crate::emails::EmailItem;
use crate::rules;
use crate::webhook::{WaitOutcome, WebhookServer};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Terminal record for one email against one target. Exactly one is
/// produced per input item; failures are folded in as `error` records
/// rather than dropped.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultRecord {
    pub email: String,
    pub duration: f64,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Emitted once per completed item, in completion order.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
}

/// Run one target over the whole email batch.
///
/// Items are submitted in input order at a fixed cadence of
/// `1 / requests_per_second`; in-flight work is unbounded and results come
/// back in completion order. Per-item failures never abort the batch; the
/// error arm is reserved for configuration problems found before any
/// request is sent.
pub async fn run_target(
    client: &Client,
    target: &TargetConfig,
    emails: &[EmailItem],
    requests_per_second: u32,
    webhook_server: Option<&WebhookServer>,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
) -> anyhow::Result<Vec<ResultRecord>> {
    if target.mode == TargetMode::Webhook && webhook_server.is_none() {
        anyhow::bail!(
            "target '{}' is in webhook mode but no webhook server is running",
            target.name
        );
    }

    log::info!(
        "running {} emails against '{}' in {} mode at {requests_per_second} rps",
        emails.len(),
        target.name,
        target.mode
    );

    let target = Arc::new(target.clone());
    let total = emails.len();
    let mut tasks: JoinSet<ResultRecord> = JoinSet::new();
    let mut interval =
        tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(requests_per_second)));

    for item in emails.iter().cloned() {
        interval.tick().await;
        let client = client.clone();
        let target = Arc::clone(&target);
        match target.mode {
            TargetMode::Sync => {
                tasks.spawn(async move { process_sync(&client, &target, item).await });
            }
            TargetMode::Webhook => {
                // Checked above; the server outlives the submission loop.
                let (request_id, callback_url, waiter) = match webhook_server {
                    Some(server) => server.create_callback(None),
                    None => unreachable!(),
                };
                tasks.spawn(async move {
                    process_webhook(&client, &target, item, request_id, callback_url, waiter)
                        .await
                });
            }
        }
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(record) => {
                results.push(record);
                if let Some(tx) = &progress {
                    let _ = tx.send(ProgressEvent {
                        completed: results.len(),
                        total,
                    });
                }
            }
            Err(e) => log::error!("dispatch task failed: {e}"),
        }
    }

    log::info!("target '{}' finished: {} records", target.name, results.len());
    Ok(results)
}

/// Request/response exchange: one HTTP call, verdict taken from its body.
async fn process_sync(client: &Client, target: &TargetConfig, item: EmailItem) -> ResultRecord {
    let start = Instant::now();

    let body = match sync_exchange(client, target, &item.address).await {
        Ok(body) => body,
        Err(message) => return error_record(item.address, start, message),
    };

    let api_considers_valid = rules::passes_all(&body, &target.validation_rules, &target.response_path);
    ResultRecord {
        email: item.address,
        duration: start.elapsed().as_secs_f64(),
        classification: classify(item.known_valid, api_considers_valid),
        response_reason: rules::extract_reason(&body, &target.response_path),
        raw_response: Some(body),
        error_message: None,
    }
}

async fn sync_exchange(
    client: &Client,
    target: &TargetConfig,
    email: &str,
) -> Result<Value, String> {
    let request = match target.method {
        HttpMethod::Get => client
            .get(&target.endpoint)
            .query(&[(target.param_name.as_str(), email)]),
        HttpMethod::Post => {
            let mut payload = serde_json::Map::new();
            payload.insert(
                target.param_name.clone(),
                Value::String(email.to_string()),
            );
            client.post(&target.endpoint).json(&Value::Object(payload))
        }
    };

    let response = apply_headers(request, target)
        .timeout(Duration::from_secs(target.timeout_secs))
        .send()
        .await
        .map_err(|e| transport_message(&e, target.timeout_secs))?;

    response
        .json::<Value>()
        .await
        .map_err(|e| format!("invalid JSON response: {e}"))
}

/// Request-then-callback exchange: the initial response only acknowledges
/// the job; the verdict arrives out-of-band on the callback URL.
async fn process_webhook(
    client: &Client,
    target: &TargetConfig,
    item: EmailItem,
    request_id: String,
    callback_url: String,
    waiter: crate::webhook::CallbackWaiter,
) -> ResultRecord {
    let start = Instant::now();

    if let Err(message) =
        webhook_initial_request(client, target, &item.address, &callback_url).await
    {
        return error_record(item.address, start, message);
    }

    let callback_timeout = Duration::from_secs(target.webhook.timeout_secs);
    let payload = match waiter.wait(callback_timeout).await {
        WaitOutcome::Delivered(payload) => payload,
        WaitOutcome::TimedOut => {
            log::warn!(
                "webhook callback for '{}' (request {request_id}) timed out after {}s",
                item.address,
                target.webhook.timeout_secs
            );
            return error_record(
                item.address,
                start,
                format!(
                    "webhook callback timeout after {}s",
                    target.webhook.timeout_secs
                ),
            );
        }
        WaitOutcome::Cancelled => {
            return error_record(
                item.address,
                start,
                "webhook wait cancelled before a callback arrived".to_string(),
            );
        }
    };

    let result_path = target.result_path();
    let api_considers_valid = rules::passes_all(&payload, &target.validation_rules, result_path);
    ResultRecord {
        email: item.address,
        duration: start.elapsed().as_secs_f64(),
        classification: classify(item.known_valid, api_considers_valid),
        response_reason: rules::extract_reason(&payload, result_path),
        raw_response: Some(payload),
        error_message: None,
    }
}

async fn webhook_initial_request(
    client: &Client,
    target: &TargetConfig,
    email: &str,
    callback_url: &str,
) -> Result<(), String> {
    let callback_param = target.webhook.callback_param.as_str();

    let request = match target.method {
        HttpMethod::Post => {
            let mut payload = serde_json::Map::new();
            payload.insert(
                target.param_name.clone(),
                Value::String(email.to_string()),
            );
            match &target.webhook.callback_wrapper_param {
                Some(wrapper) => {
                    let mut inner = serde_json::Map::new();
                    inner.insert(
                        callback_param.to_string(),
                        Value::String(callback_url.to_string()),
                    );
                    payload.insert(wrapper.clone(), Value::Object(inner));
                }
                None => {
                    payload.insert(
                        callback_param.to_string(),
                        Value::String(callback_url.to_string()),
                    );
                }
            }
            client.post(&target.endpoint).json(&Value::Object(payload))
        }
        HttpMethod::Get => {
            let callback_key = match &target.webhook.callback_wrapper_param {
                Some(wrapper) => format!("{wrapper}[{callback_param}]"),
                None => callback_param.to_string(),
            };
            client.get(&target.endpoint).query(&[
                (target.param_name.as_str(), email),
                (callback_key.as_str(), callback_url),
            ])
        }
    };

    let response = apply_headers(request, target)
        .timeout(Duration::from_secs(target.timeout_secs))
        .send()
        .await
        .map_err(|e| initial_transport_message(&e, target.timeout_secs))?;

    // The immediate body is only an acknowledgement, not the verdict.
    match response.text().await {
        Ok(ack) => log::debug!("initial response for '{email}': {ack}"),
        Err(e) => log::debug!("could not read initial response body for '{email}': {e}"),
    }
    Ok(())
}

fn apply_headers(
    mut request: reqwest::RequestBuilder,
    target: &TargetConfig,
) -> reqwest::RequestBuilder {
    // A custom header with the credential header's name overrides it
    // rather than adding a second line.
    let mut headers = HashMap::new();
    headers.insert(target.api_key_header.clone(), target.api_key.clone());
    for (name, value) in &target.headers {
        headers.insert(name.clone(), value.clone());
    }
    for (name, value) in &headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn transport_message(error: &reqwest::Error, timeout_secs: u64) -> String {
    if error.is_timeout() {
        format!("request timeout after {timeout_secs}s")
    } else {
        format!("request failed: {error}")
    }
}

fn initial_transport_message(error: &reqwest::Error, timeout_secs: u64) -> String {
    if error.is_timeout() {
        format!("initial request timeout after {timeout_secs}s")
    } else {
        format!("initial request failed: {error}")
    }
}

fn error_record(email: String, start: Instant, message: String) -> ResultRecord {
    log::warn!("'{email}' failed: {message}");
    ResultRecord {
        email,
        duration: start.elapsed().as_secs_f64(),
        classification: Classification::Error,
        response_reason: None,
        raw_response: None,
        error_message: Some(message),
    }
}
