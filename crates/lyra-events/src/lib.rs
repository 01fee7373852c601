#![forbid(unsafe_code)]

//! Unified event bus for lyra streaming sessions.

mod bus;
mod event;
mod segment;
mod stream;

pub use bus::EventBus;
pub use event::Event;
pub use segment::SegmentEvent;
pub use stream::{StreamEvent, StreamState};
