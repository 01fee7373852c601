use crate::{SegmentEvent, StreamEvent};

/// Unified event for a streaming session.
///
/// Hierarchical: per-segment activity and session-level lifecycle are kept
/// in separate sub-enums.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Fetch/append activity for a single segment.
    Segment(SegmentEvent),
    /// Session lifecycle.
    Stream(StreamEvent),
}

impl From<SegmentEvent> for Event {
    fn from(e: SegmentEvent) -> Self {
        Self::Segment(e)
    }
}

impl From<StreamEvent> for Event {
    fn from(e: StreamEvent) -> Self {
        Self::Stream(e)
    }
}
