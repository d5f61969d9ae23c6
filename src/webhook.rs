use serde_json::Value;

use crate::classifier::{self, CallbackEvent};
use crate::suppression::SuppressionKind;

/// A provider webhook record reduced to the internal vocabulary. At most one
/// normalized event is produced per raw payload item.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub event: CallbackEvent,
    pub kind: SuppressionKind,
    pub recipient: String,
    pub reason: String,
    pub hash_id: Option<String>,
    pub contact_id: Option<u64>,
}

/// Finite, restartable sequence of normalized events parsed from one webhook
/// delivery. Malformed or irrelevant records are dropped during parsing, so
/// iterating never fails.
#[derive(Debug, Default)]
pub struct ResponseItems {
    items: Vec<NormalizedEvent>,
}

impl ResponseItems {
    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedEvent> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for ResponseItems {
    type Item = NormalizedEvent;
    type IntoIter = std::vec::IntoIter<NormalizedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResponseItems {
    type Item = &'a NormalizedEvent;
    type IntoIter = std::slice::Iter<'a, NormalizedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Parse a SparkPost/Momentum webhook body: a JSON array of items, each
/// wrapping its event under `msys.message_event` or `msys.unsubscribe_event`.
/// Parsing degrades by omission; a body that is not JSON yields an empty
/// sequence.
pub fn parse_sparkpost(body: &str) -> ResponseItems {
    let payload: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("discarding unparseable webhook body: {e}");
            return ResponseItems::default();
        }
    };

    let Some(items) = payload.as_array() else {
        log::warn!("webhook body is not an array, ignoring");
        return ResponseItems::default();
    };

    ResponseItems {
        items: items.iter().filter_map(sparkpost_item).collect(),
    }
}

fn sparkpost_item(item: &Value) -> Option<NormalizedEvent> {
    let msys = item.get("msys")?;

    // First matching key wins; at most one classified event per raw item
    let record = msys
        .get("message_event")
        .or_else(|| msys.get("unsubscribe_event"))?;

    // Ignore cc/bcc
    if let Some(rcpt_type) = record.get("rcpt_type").and_then(Value::as_str) {
        if rcpt_type != "to" {
            return None;
        }
    }

    let name = record
        .get("type")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())?;
    let event = classifier::classify(name, bounce_class(record))?;

    // No recipient means the record cannot be keyed to a contact
    let recipient = record.get("rcpt_to").and_then(Value::as_str)?.to_string();

    let meta = record.get("rcpt_meta");
    let hash_id = meta
        .and_then(|meta| meta.get("hashId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let contact_id = meta
        .and_then(|meta| meta.get("contactId"))
        .and_then(Value::as_u64);

    Some(NormalizedEvent {
        event,
        kind: event.suppression_kind(),
        recipient,
        reason: classifier::suppression_reason(event, record),
        hash_id,
        contact_id,
    })
}

// SparkPost sends bounce_class as a string, Momentum as a number
fn bounce_class(record: &Value) -> Option<i64> {
    match record.get("bounce_class")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse the Mandrill `mandrill_events` JSON array. Bounce-family events are
/// `hard_bounce` and `reject`; `spam` and `unsub` suppress as unsubscribes.
/// Everything else (opens, clicks, soft bounces) is skipped.
pub fn parse_mandrill(events_json: &str) -> ResponseItems {
    let payload: Value = match serde_json::from_str(events_json) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("discarding unparseable mandrill_events body: {e}");
            return ResponseItems::default();
        }
    };

    let Some(events) = payload.as_array() else {
        log::warn!("mandrill_events is not an array, ignoring");
        return ResponseItems::default();
    };

    ResponseItems {
        items: events.iter().filter_map(mandrill_item).collect(),
    }
}

fn mandrill_item(item: &Value) -> Option<NormalizedEvent> {
    let name = item.get("event").and_then(Value::as_str)?;

    let event = match name {
        "hard_bounce" => CallbackEvent::Bounce,
        "reject" => CallbackEvent::PolicyRejection,
        "spam" => CallbackEvent::SpamComplaint,
        "unsub" => CallbackEvent::ListUnsubscribe,
        _ => return None,
    };
    let kind = event.suppression_kind();

    let msg = item.get("msg")?;

    let reason = non_empty_str(msg.get("diag"))
        .or_else(|| non_empty_str(msg.get("bounce_description")))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if kind == SuppressionKind::Unsubscribed {
                "unsubscribed".to_string()
            } else {
                name.to_string()
            }
        });

    let hash_id = msg
        .pointer("/metadata/hashId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let email = msg.get("email").and_then(Value::as_str);

    // Need at least one way to key the failure back to a contact
    if hash_id.is_none() && email.is_none() {
        return None;
    }

    Some(NormalizedEvent {
        event,
        kind,
        recipient: email.unwrap_or_default().to_string(),
        reason,
        hash_id,
        contact_id: None,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
