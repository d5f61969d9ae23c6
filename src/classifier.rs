use serde_json::Value;

use crate::suppression::SuppressionKind;

/// Callback event vocabulary shared by the SparkPost/Momentum webhook
/// payloads. Mandrill events are mapped onto the same variants by the
/// webhook parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    Bounce,
    OutOfBand,
    PolicyRejection,
    SpamComplaint,
    ListUnsubscribe,
    LinkUnsubscribe,
}

/// Bounce classes treated as permanent failures. Anything else (soft
/// bounces, block lists that may clear) is left alone.
pub const HARD_BOUNCE_CLASSES: [i64; 8] = [
    10, // invalid recipient
    30, // generic bounce
    50, // mail block
    51, // spam block
    52, // spam content
    53, // prohibited attachment
    54, // relaying denied
    90, // unsubscribe
];

impl CallbackEvent {
    /// Unknown event names are inert, never an error.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bounce" => Some(Self::Bounce),
            "out_of_band" => Some(Self::OutOfBand),
            "policy_rejection" => Some(Self::PolicyRejection),
            "spam_complaint" => Some(Self::SpamComplaint),
            "list_unsubscribe" => Some(Self::ListUnsubscribe),
            "link_unsubscribe" => Some(Self::LinkUnsubscribe),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::OutOfBand => "out_of_band",
            Self::PolicyRejection => "policy_rejection",
            Self::SpamComplaint => "spam_complaint",
            Self::ListUnsubscribe => "list_unsubscribe",
            Self::LinkUnsubscribe => "link_unsubscribe",
        }
    }

    /// Bounce-family events suppress as Bounced; complaints and both
    /// unsubscribe variants suppress as Unsubscribed.
    pub fn suppression_kind(self) -> SuppressionKind {
        match self {
            Self::Bounce | Self::OutOfBand | Self::PolicyRejection => SuppressionKind::Bounced,
            Self::SpamComplaint | Self::ListUnsubscribe | Self::LinkUnsubscribe => {
                SuppressionKind::Unsubscribed
            }
        }
    }

    /// Payload field holding the human-readable reason for this event.
    pub fn reason_key(self) -> &'static str {
        match self {
            Self::Bounce | Self::OutOfBand | Self::PolicyRejection => "raw_reason",
            Self::SpamComplaint => "fbtype",
            Self::ListUnsubscribe | Self::LinkUnsubscribe => "unsubscribed",
        }
    }
}

/// Whether an event is actionable. A bounce carrying a bounce class is only
/// actionable when the class is in the hard-bounce list; every recognized
/// event without one is.
pub fn should_process(event: CallbackEvent, bounce_class: Option<i64>) -> bool {
    if let (CallbackEvent::Bounce, Some(class)) = (event, bounce_class) {
        return HARD_BOUNCE_CLASSES.contains(&class);
    }

    true
}

/// Map a raw event name to an actionable event, or None when the event is
/// unknown or filtered out (e.g. a soft bounce).
pub fn classify(name: &str, bounce_class: Option<i64>) -> Option<CallbackEvent> {
    let event = CallbackEvent::from_name(name)?;

    should_process(event, bounce_class).then_some(event)
}

/// Extract the suppression reason from a raw event record, falling back to
/// the field name itself when the payload omits it.
pub fn suppression_reason(event: CallbackEvent, record: &Value) -> String {
    let key = event.reason_key();

    match record.get(key) {
        Some(Value::String(reason)) => reason.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_events_are_inert() {
        assert_eq!(CallbackEvent::from_name("delivery"), None);
        assert_eq!(CallbackEvent::from_name("open"), None);
        assert_eq!(CallbackEvent::from_name(""), None);
        assert_eq!(classify("click", None), None);
    }

    #[test]
    fn test_hard_bounce_classes() {
        assert!(should_process(CallbackEvent::Bounce, Some(50)));
        assert!(should_process(CallbackEvent::Bounce, Some(10)));
        assert!(should_process(CallbackEvent::Bounce, Some(90)));
        // Soft bounce
        assert!(!should_process(CallbackEvent::Bounce, Some(20)));
        assert!(!should_process(CallbackEvent::Bounce, Some(60)));
        // No class supplied: the event name alone decides
        assert!(should_process(CallbackEvent::Bounce, None));
    }

    #[test]
    fn test_bounce_class_only_filters_bounces() {
        // Out-of-band events carry bounce classes too but are not gated on them
        assert!(should_process(CallbackEvent::OutOfBand, Some(20)));
        assert!(should_process(CallbackEvent::SpamComplaint, Some(20)));
    }

    #[test]
    fn test_classify_by_name() {
        assert_eq!(classify("bounce", Some(50)), Some(CallbackEvent::Bounce));
        assert_eq!(classify("bounce", Some(20)), None);
        assert_eq!(
            classify("link_unsubscribe", None),
            Some(CallbackEvent::LinkUnsubscribe)
        );
    }

    #[test]
    fn test_suppression_kind_mapping() {
        assert_eq!(
            CallbackEvent::Bounce.suppression_kind(),
            SuppressionKind::Bounced
        );
        assert_eq!(
            CallbackEvent::OutOfBand.suppression_kind(),
            SuppressionKind::Bounced
        );
        assert_eq!(
            CallbackEvent::PolicyRejection.suppression_kind(),
            SuppressionKind::Bounced
        );
        assert_eq!(
            CallbackEvent::SpamComplaint.suppression_kind(),
            SuppressionKind::Unsubscribed
        );
        assert_eq!(
            CallbackEvent::ListUnsubscribe.suppression_kind(),
            SuppressionKind::Unsubscribed
        );
        assert_eq!(
            CallbackEvent::LinkUnsubscribe.suppression_kind(),
            SuppressionKind::Unsubscribed
        );
    }

    #[test]
    fn test_suppression_reason_extraction() {
        let record = json!({"raw_reason": "550 5.1.1 user unknown"});
        assert_eq!(
            suppression_reason(CallbackEvent::Bounce, &record),
            "550 5.1.1 user unknown"
        );

        let record = json!({"fbtype": "abuse"});
        assert_eq!(
            suppression_reason(CallbackEvent::SpamComplaint, &record),
            "abuse"
        );

        // Missing field falls back to the key itself
        let record = json!({});
        assert_eq!(
            suppression_reason(CallbackEvent::ListUnsubscribe, &record),
            "unsubscribed"
        );
    }
}
