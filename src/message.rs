use serde::{Deserialize, Serialize};

use crate::suppression::ContactIdentifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    #[default]
    To,
    Cc,
    Bcc,
}

/// Correlation metadata attached to a recipient so provider callbacks can be
/// matched back to the contact that was mailed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: RecipientKind,
    #[serde(default)]
    pub metadata: RecipientMeta,
}

impl Recipient {
    /// Preferred suppression identifier: hash id, then contact id, then the
    /// raw address.
    pub fn identifier(&self) -> ContactIdentifier {
        if let Some(hash_id) = &self.metadata.hash_id {
            ContactIdentifier::HashId(hash_id.clone())
        } else if let Some(contact_id) = self.metadata.contact_id {
            ContactIdentifier::ContactId(contact_id)
        } else {
            ContactIdentifier::Address(self.email.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Provider-neutral outbound message. The per-provider wire shapes are built
/// from this by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: Address,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub recipients: Vec<Recipient>,
}

impl OutboundMessage {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let message: OutboundMessage = serde_json::from_str(&content)?;
        Ok(message)
    }

    pub fn to_recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients
            .iter()
            .filter(|recipient| recipient.kind == RecipientKind::To)
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_identifier_precedence() {
        let mut recipient = Recipient {
            email: "a@example.com".to_string(),
            name: None,
            kind: RecipientKind::To,
            metadata: RecipientMeta {
                hash_id: Some("abc".to_string()),
                contact_id: Some(7),
            },
        };

        assert_eq!(
            recipient.identifier(),
            ContactIdentifier::HashId("abc".to_string())
        );

        recipient.metadata.hash_id = None;
        assert_eq!(recipient.identifier(), ContactIdentifier::ContactId(7));

        recipient.metadata.contact_id = None;
        assert_eq!(
            recipient.identifier(),
            ContactIdentifier::Address("a@example.com".to_string())
        );
    }

    #[test]
    fn test_message_from_json_defaults() {
        let message: OutboundMessage = serde_json::from_str(
            r#"{
                "from": {"email": "news@example.com", "name": "Example"},
                "subject": "Hello",
                "recipients": [
                    {"email": "a@example.com"},
                    {"email": "b@example.com", "kind": "cc"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(message.recipient_count(), 2);
        assert_eq!(message.to_recipients().count(), 1);
        assert_eq!(message.recipients[0].kind, RecipientKind::To);
        assert!(message.recipients[0].metadata.hash_id.is_none());
        assert!(message.html.is_none());
    }
}
