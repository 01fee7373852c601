use std::{fmt, ops::Range};

/// Lifecycle of a streaming session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Constructed, nothing requested yet.
    Idle,
    /// Sink attached, asset length being discovered.
    Opening,
    /// Segment table built, first segment in flight.
    Populating,
    /// Duration known, playback may start.
    Ready,
    /// Position-driven scheduling active.
    Streaming,
    /// All segments appended and end-of-stream signalled.
    Ended,
    /// Unrecoverable failure.
    Error,
}

impl StreamState {
    /// `Ended` and `Error` absorb every further event.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Error)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Populating => "populating",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Ended => "ended",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Session-level events.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Asset length discovered and segment table built.
    Opened {
        asset_len: u64,
        segment_count: usize,
        segment_len: u64,
    },
    /// Lifecycle transition.
    StateChanged { from: StreamState, to: StreamState },
    /// Materialized ranges reported by the sink after an append.
    Buffered { ranges: Vec<Range<u64>> },
    /// Play command issued to the playback surface.
    PlayRequested,
    /// Playback surface refused to start.
    PlayFailed { error: String },
    /// End-of-stream signalled to the sink.
    EndOfStream,
    /// Session moved to the error state.
    Error { error: String },
}
