use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::webhook::NormalizedEvent;

/// Why a contact is marked do-not-send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionKind {
    Bounced,
    Unsubscribed,
}

/// How a failure is keyed back to a contact. Hash ids are opaque correlation
/// tokens embedded in send metadata so a callback can be matched to the
/// original send without exposing the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContactIdentifier {
    HashId(String),
    ContactId(u64),
    Address(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionRecord {
    pub identifier: ContactIdentifier,
    pub reason: String,
    pub kind: SuppressionKind,
    pub timestamp: DateTime<Utc>,
}

/// Contact suppression store. Storage semantics (transactions, dedup across
/// runs) belong to the implementation; this crate only promises at most one
/// write per qualifying event.
pub trait SuppressionStore {
    fn add_failure_by_contact_id(&mut self, contact_id: u64, reason: &str, kind: SuppressionKind);
    fn add_failure_by_hash_id(&mut self, hash_id: &str, reason: &str, kind: SuppressionKind);
    fn add_failure_by_address(&mut self, address: &str, reason: &str, kind: SuppressionKind);
}

/// In-memory store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemorySuppressionStore {
    records: Vec<SuppressionRecord>,
}

impl MemorySuppressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SuppressionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SuppressionRecord> {
        self.records
    }

    fn push(&mut self, identifier: ContactIdentifier, reason: &str, kind: SuppressionKind) {
        self.records.push(SuppressionRecord {
            identifier,
            reason: reason.to_string(),
            kind,
            timestamp: Utc::now(),
        });
    }
}

impl SuppressionStore for MemorySuppressionStore {
    fn add_failure_by_contact_id(&mut self, contact_id: u64, reason: &str, kind: SuppressionKind) {
        self.push(ContactIdentifier::ContactId(contact_id), reason, kind);
    }

    fn add_failure_by_hash_id(&mut self, hash_id: &str, reason: &str, kind: SuppressionKind) {
        self.push(ContactIdentifier::HashId(hash_id.to_string()), reason, kind);
    }

    fn add_failure_by_address(&mut self, address: &str, reason: &str, kind: SuppressionKind) {
        self.push(ContactIdentifier::Address(address.to_string()), reason, kind);
    }
}

/// Routes classified callback events into a suppression store, writing at
/// most once per (identifier, kind) pair.
pub struct TransportCallback<S> {
    store: S,
    seen: HashSet<(ContactIdentifier, SuppressionKind)>,
}

impl<S: SuppressionStore> TransportCallback<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            seen: HashSet::new(),
        }
    }

    /// Record a delivery failure. Returns false when the same identifier and
    /// kind were already recorded through this callback.
    pub fn record_failure(
        &mut self,
        identifier: ContactIdentifier,
        reason: &str,
        kind: SuppressionKind,
    ) -> bool {
        if !self.seen.insert((identifier.clone(), kind)) {
            log::debug!("suppression already recorded for {identifier:?}, skipping");
            return false;
        }

        match &identifier {
            ContactIdentifier::HashId(hash_id) => {
                self.store.add_failure_by_hash_id(hash_id, reason, kind);
            }
            ContactIdentifier::ContactId(contact_id) => {
                self.store.add_failure_by_contact_id(*contact_id, reason, kind);
            }
            ContactIdentifier::Address(address) => {
                self.store.add_failure_by_address(address, reason, kind);
            }
        }

        log::info!("recorded {kind:?} suppression for {identifier:?}");
        true
    }

    /// Apply a classified webhook event. Identifier resolution order is
    /// hash id, then contact id, then the raw address.
    pub fn apply(&mut self, event: &NormalizedEvent) -> bool {
        let identifier = if let Some(hash_id) = &event.hash_id {
            ContactIdentifier::HashId(hash_id.clone())
        } else if let Some(contact_id) = event.contact_id {
            ContactIdentifier::ContactId(contact_id)
        } else {
            ContactIdentifier::Address(event.recipient.clone())
        };

        self.record_failure(identifier, &event.reason, event.kind)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CallbackEvent;

    fn event(recipient: &str, hash_id: Option<&str>, contact_id: Option<u64>) -> NormalizedEvent {
        NormalizedEvent {
            event: CallbackEvent::Bounce,
            kind: SuppressionKind::Bounced,
            recipient: recipient.to_string(),
            reason: "550 mailbox unavailable".to_string(),
            hash_id: hash_id.map(str::to_string),
            contact_id,
        }
    }

    #[test]
    fn test_identifier_precedence() {
        let mut callback = TransportCallback::new(MemorySuppressionStore::new());

        callback.apply(&event("a@example.com", Some("abc123"), Some(42)));
        callback.apply(&event("b@example.com", None, Some(42)));
        callback.apply(&event("c@example.com", None, None));

        let records = callback.into_store().into_records();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].identifier,
            ContactIdentifier::HashId("abc123".to_string())
        );
        assert_eq!(records[1].identifier, ContactIdentifier::ContactId(42));
        assert_eq!(
            records[2].identifier,
            ContactIdentifier::Address("c@example.com".to_string())
        );
    }

    #[test]
    fn test_idempotent_per_identifier_and_kind() {
        let mut callback = TransportCallback::new(MemorySuppressionStore::new());
        let identifier = ContactIdentifier::HashId("abc123".to_string());

        assert!(callback.record_failure(identifier.clone(), "first", SuppressionKind::Bounced));
        assert!(!callback.record_failure(identifier.clone(), "second", SuppressionKind::Bounced));
        // A different kind for the same identifier is a separate write
        assert!(callback.record_failure(identifier, "third", SuppressionKind::Unsubscribed));

        let records = callback.into_store().into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reason, "first");
        assert_eq!(records[1].kind, SuppressionKind::Unsubscribed);
    }

    #[test]
    fn test_record_fields() {
        let mut store = MemorySuppressionStore::new();
        store.add_failure_by_address("x@example.com", "unsubscribed", SuppressionKind::Unsubscribed);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "unsubscribed");
        assert_eq!(records[0].kind, SuppressionKind::Unsubscribed);
    }
}
