//! Per-call bridging session: the protocol driver and its wire events.

pub mod driver;
pub mod events;

pub use driver::{AudioSink, Session, SessionSettings};
pub use events::{ClientEvent, ServerEvent};
