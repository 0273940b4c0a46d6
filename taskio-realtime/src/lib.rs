pub mod broker;
pub mod events;
pub mod notifier;
pub mod registry;

pub use broker::{MessageHandler, StreamBridge};
pub use events::{Event, EventPayload, PushMessage};
pub use notifier::Notifier;
pub use registry::{EventReceiver, EventSender, Session, SessionRegistry};
