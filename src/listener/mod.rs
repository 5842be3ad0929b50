//! supervisord event-listener protocol: `READY` handshake, header/payload
//! framing, and `RESULT` acknowledgements.

pub mod protocol;

pub use protocol::{Event, EventKind, EventListener, TickKind, acknowledge};
