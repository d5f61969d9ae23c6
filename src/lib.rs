pub mod classifier;
pub mod config;
pub mod message;
pub mod suppression;
pub mod transport;
pub mod webhook;

pub use classifier::CallbackEvent;
pub use config::Config;
pub use message::{OutboundMessage, Recipient, RecipientKind};
pub use suppression::{
    ContactIdentifier, MemorySuppressionStore, SuppressionKind, SuppressionRecord,
    SuppressionStore, TransportCallback,
};
pub use transport::{Provider, Transport, TransportError};
pub use webhook::{NormalizedEvent, ResponseItems};
