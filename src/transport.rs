use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::message::{OutboundMessage, RecipientKind};
use crate::suppression::{ContactIdentifier, SuppressionKind, SuppressionStore, TransportCallback};

/// Single error type for the whole send path. Provider 5xx responses are
/// retried before surfacing as Exhausted; any other non-2xx is fatal on the
/// first response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("provider returned HTTP {status} after {attempts} attempt(s): {detail}")]
    Exhausted {
        status: u16,
        attempts: u32,
        detail: String,
    },
    #[error("provider rejected send (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("unexpected provider response: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outbound providers. Each variant supplies its endpoint, auth style and
/// payload shape; response handling is keyed off the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mandrill,
    Sparkpost,
    Momentum,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mandrill => "mandrill",
            Self::Sparkpost => "sparkpost",
            Self::Momentum => "momentum",
        }
    }

    pub(crate) fn endpoint(self, config: &Config) -> String {
        if let Some(endpoint) = &config.endpoint {
            return format!(
                "{}{}",
                endpoint.trim_end_matches('/'),
                match self {
                    Self::Mandrill => "/api/1.0/messages/send.json",
                    Self::Sparkpost | Self::Momentum => "/api/v1/transmissions",
                }
            );
        }

        match self {
            Self::Mandrill => "https://mandrillapp.com/api/1.0/messages/send.json".to_string(),
            // Momentum installs are on-prem and normally configured via
            // `endpoint`; the hosted API is the fallback
            Self::Sparkpost | Self::Momentum => {
                "https://api.sparkpost.com/api/v1/transmissions".to_string()
            }
        }
    }

    /// Mandrill carries the key inside the payload; the transmission APIs
    /// use an Authorization header.
    pub(crate) fn uses_auth_header(self) -> bool {
        !matches!(self, Self::Mandrill)
    }

    pub(crate) fn build_payload(self, message: &OutboundMessage, api_key: &str) -> Value {
        match self {
            Self::Mandrill => mandrill_payload(message, api_key),
            Self::Sparkpost | Self::Momentum => transmission_payload(message),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn mandrill_payload(message: &OutboundMessage, api_key: &str) -> Value {
    let to: Vec<Value> = message
        .recipients
        .iter()
        .map(|recipient| {
            json!({
                "email": recipient.email,
                "name": recipient.name,
                "type": match recipient.kind {
                    RecipientKind::To => "to",
                    RecipientKind::Cc => "cc",
                    RecipientKind::Bcc => "bcc",
                },
            })
        })
        .collect();

    let recipient_metadata: Vec<Value> = message
        .to_recipients()
        .filter(|recipient| {
            recipient.metadata.hash_id.is_some() || recipient.metadata.contact_id.is_some()
        })
        .map(|recipient| {
            json!({
                "rcpt": recipient.email,
                "values": {
                    "hashId": recipient.metadata.hash_id,
                    "contactId": recipient.metadata.contact_id,
                },
            })
        })
        .collect();

    let mut inner = json!({
        "from_email": message.from.email,
        "from_name": message.from.name,
        "subject": message.subject,
        "html": message.html,
        "text": message.text,
        "to": to,
        "preserve_recipients": false,
        "recipient_metadata": recipient_metadata,
    });

    if let Some(reply_to) = &message.reply_to {
        inner["headers"] = json!({ "Reply-To": reply_to });
    }

    json!({ "key": api_key, "message": inner })
}

fn transmission_payload(message: &OutboundMessage) -> Value {
    // cc/bcc recipients keep the primary recipient in their visible To header
    let header_to = message
        .to_recipients()
        .next()
        .map(|recipient| recipient.email.clone());

    let recipients: Vec<Value> = message
        .recipients
        .iter()
        .map(|recipient| {
            let mut entry = json!({
                "address": {
                    "email": recipient.email,
                    "name": recipient.name,
                },
                "metadata": {
                    "hashId": recipient.metadata.hash_id,
                    "contactId": recipient.metadata.contact_id,
                },
            });
            if recipient.kind != RecipientKind::To {
                if let Some(header_to) = &header_to {
                    entry["address"]["header_to"] = json!(header_to);
                }
            }
            entry
        })
        .collect();

    let mut content = json!({
        "from": {
            "email": message.from.email,
            "name": message.from.name,
        },
        "subject": message.subject,
        "html": message.html,
        "text": message.text,
    });

    if let Some(reply_to) = &message.reply_to {
        content["reply_to"] = json!(reply_to);
    }

    json!({ "content": content, "recipients": recipients })
}

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// POST with bounded retries. Only 5xx responses are retried; transport
/// failures and every other status are returned to the caller as-is.
pub(crate) async fn post_with_retries<F, Fut>(
    mut post: F,
    policy: &RetryPolicy,
) -> Result<ApiResponse, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ApiResponse, TransportError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = post(attempt).await?;

        if response.is_server_error() {
            if attempt >= policy.max_attempts {
                return Err(TransportError::Exhausted {
                    status: response.status,
                    attempts: attempt,
                    detail: extract_errors(&response.body),
                });
            }
            warn!(
                "provider returned HTTP {}, retrying in {}s (attempt {attempt}/{})",
                response.status,
                policy.delay.as_secs(),
                policy.max_attempts
            );
            tokio::time::sleep(policy.delay).await;
            continue;
        }

        return Ok(response);
    }
}

/// Flatten a provider error body into one line. Handles the
/// `{"errors": [{"message", "description"}, ..]}` shape as well as scalar
/// bodies.
pub(crate) fn extract_errors(body: &Value) -> String {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let parts: Vec<String> = errors
            .iter()
            .map(|error| {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                match error.get("description").and_then(Value::as_str) {
                    Some(description) => format!("{message} : {description}"),
                    None => message.to_string(),
                }
            })
            .collect();

        if !parts.is_empty() {
            return parts.join("; ");
        }
    }

    match body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct Transport {
    client: reqwest::Client,
    config: Config,
}

impl Transport {
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("mail-courier/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, config }
    }

    /// Submit a message to the configured provider and return the number of
    /// accepted recipients. Per-recipient failures and same-request
    /// zero-accept feedback are routed into the callback sink.
    pub async fn send<S: SuppressionStore>(
        &self,
        message: &OutboundMessage,
        callback: &mut TransportCallback<S>,
    ) -> Result<usize, TransportError> {
        let provider = self.config.provider;
        let endpoint = provider.endpoint(&self.config);
        let payload = provider.build_payload(message, &self.config.api_key);
        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts,
            delay: Duration::from_secs(self.config.retry_delay_seconds),
        };

        let response = match post_with_retries(
            |attempt| {
                debug!("posting to {provider} ({endpoint}), attempt {attempt}");
                self.post_once(&endpoint, &payload)
            },
            &policy,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("{provider} send failed: {e}");
                return Err(e);
            }
        };

        let response = reject_on_error(response).map_err(|e| {
            error!("{provider} send rejected: {e}");
            e
        })?;

        let accepted = match provider {
            Provider::Mandrill => {
                mandrill_accepted(message, &response.body, callback).map_err(|e| {
                    error!("{provider} send failed: {e}");
                    e
                })?
            }
            Provider::Sparkpost | Provider::Momentum => {
                transmission_accepted(message, &response.body, callback)
            }
        };

        info!("{provider} accepted {accepted} recipient(s)");
        Ok(accepted)
    }

    async fn post_once(&self, endpoint: &str, payload: &Value) -> Result<ApiResponse, TransportError> {
        let mut request = self.client.post(endpoint).json(payload);
        if self.config.provider.uses_auth_header() {
            request = request.header("Authorization", &self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        // Non-JSON bodies are kept verbatim for error reporting
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ApiResponse { status, body })
    }
}

/// Any non-2xx left after retrying is fatal, carrying the provider's error
/// text extracted from the response body.
fn reject_on_error(response: ApiResponse) -> Result<ApiResponse, TransportError> {
    if response.is_success() {
        return Ok(response);
    }

    Err(TransportError::Rejected {
        status: response.status,
        detail: extract_errors(&response.body),
    })
}

/// SparkPost/Momentum accept counting. A 200 with zero accepted recipients
/// is treated as immediate feedback rather than waiting for a webhook.
fn transmission_accepted<S: SuppressionStore>(
    message: &OutboundMessage,
    body: &Value,
    callback: &mut TransportCallback<S>,
) -> usize {
    let accepted = body
        .pointer("/results/total_accepted_recipients")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    if accepted == 0 {
        warn!("provider accepted no recipients, recording immediate feedback");
        let reason = extract_errors(body);
        for recipient in message.to_recipients() {
            callback.record_failure(recipient.identifier(), &reason, SuppressionKind::Bounced);
        }
    }

    accepted
}

/// Mandrill returns per-recipient statuses. `rejected`/`invalid` entries are
/// recorded as failures when their reject reason is terminal.
fn mandrill_accepted<S: SuppressionStore>(
    message: &OutboundMessage,
    body: &Value,
    callback: &mut TransportCallback<S>,
) -> Result<usize, TransportError> {
    if body.get("status").and_then(Value::as_str) == Some("error") {
        let detail = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown mandrill error");
        return Err(TransportError::Malformed(detail.to_string()));
    }

    let Some(stats) = body.as_array() else {
        return Err(TransportError::Malformed(format!(
            "unexpected mandrill response shape: {body}"
        )));
    };

    let mut accepted = 0;
    for stat in stats {
        let email = stat.get("email").and_then(Value::as_str).unwrap_or_default();
        let status = stat.get("status").and_then(Value::as_str).unwrap_or_default();

        match status {
            "sent" | "queued" | "scheduled" => accepted += 1,
            "rejected" | "invalid" => {
                debug!("{email} => {status}");

                let reject_reason = if status == "invalid" {
                    "invalid"
                } else {
                    stat.get("reject_reason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                };

                if matches!(
                    reject_reason,
                    "hard-bounce" | "soft-bounce" | "reject" | "spam" | "invalid" | "unsub"
                ) {
                    let kind = if reject_reason == "unsub" {
                        SuppressionKind::Unsubscribed
                    } else {
                        SuppressionKind::Bounced
                    };
                    let reason = if kind == SuppressionKind::Unsubscribed {
                        "unsubscribed".to_string()
                    } else {
                        reject_reason.replace('-', "_")
                    };

                    let identifier = message
                        .recipients
                        .iter()
                        .find(|recipient| recipient.email == email)
                        .map(|recipient| recipient.identifier())
                        .unwrap_or_else(|| ContactIdentifier::Address(email.to_string()));

                    callback.record_failure(identifier, &reason, kind);
                }
            }
            other => debug!("unhandled mandrill status {other:?} for {email}"),
        }
    }

    Ok(accepted)
}
