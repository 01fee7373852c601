//! Buffer sink surface.
//!
//! Modelled on a media-source / source-buffer pair: the engine appends raw
//! chunks one at a time and learns about completion out of band through a
//! [`SinkSignal`] channel.

use std::ops::Range;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SinkError;

/// Completion notification for the sink's current update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSignal {
    /// The pending append was committed.
    UpdateEnd,
    /// The pending append was dropped by [`BufferSink::abort`].
    Aborted,
    /// The pending append failed.
    Error(String),
}

/// Receiving half of a sink's signal channel.
///
/// A closed channel means the sink was detached.
pub type SinkSignals = mpsc::UnboundedReceiver<SinkSignal>;

/// Lifecycle of the media source that owns the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Closed,
    Open,
    Ended,
}

/// Append-only sequential binary buffer.
///
/// Contract:
/// - `append_buffer` starts an update; `is_updating()` stays true until the
///   matching [`SinkSignal`] is sent.
/// - `append_buffer` while updating is an error.
/// - `abort` cancels the current update, if any.
pub trait BufferSink: Send + 'static {
    fn is_updating(&self) -> bool;

    /// Start appending `chunk`, which starts at byte `offset` of the asset.
    ///
    /// Sinks that place media by embedded timestamps may ignore `offset`.
    ///
    /// # Errors
    ///
    /// Synchronous rejection. No signal is sent for a rejected chunk.
    fn append_buffer(&mut self, offset: u64, chunk: Bytes) -> Result<(), SinkError>;

    /// # Errors
    ///
    /// [`SinkError::Unavailable`] if the sink is detached.
    fn abort(&mut self) -> Result<(), SinkError>;

    /// Materialized ranges, in the sink's own units.
    fn buffered(&self) -> Vec<Range<u64>>;
}

/// Owner of buffer sinks.
pub trait MediaSource: Send + 'static {
    type Sink: BufferSink;

    fn is_type_supported(&self, codec: &str) -> bool;

    /// Create a sink for `codec` together with its signal channel.
    ///
    /// # Errors
    ///
    /// [`SinkError::Rejected`] if the codec cannot be handled.
    fn add_source_buffer(&mut self, codec: &str) -> Result<(Self::Sink, SinkSignals), SinkError>;

    /// # Errors
    ///
    /// [`SinkError::InvalidState`] if the source is not open.
    fn end_of_stream(&mut self) -> Result<(), SinkError>;

    fn ready_state(&self) -> ReadyState;
}
