use std::time::Duration;

/// Per-segment fetch and append activity.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentEvent {
    /// Range request issued. `end` is inclusive.
    Requested { index: usize, start: u64, end: u64 },
    /// Range request completed.
    ///
    /// `total_fetched` is the cumulative number of bytes fetched this session.
    Fetched {
        index: usize,
        bytes: u64,
        total_fetched: u64,
    },
    /// Range request failed; the segment is retryable after `retry_in`
    /// (`None` once the retry budget is exhausted).
    FetchFailed {
        index: usize,
        error: String,
        retry_in: Option<Duration>,
    },
    /// Chunk accepted by the buffer sink.
    Appended {
        index: usize,
        appended: usize,
        total: usize,
    },
    /// Buffer sink rejected the chunk.
    AppendFailed { index: usize, error: String },
    /// In-flight append aborted by a seek.
    Aborted { index: usize },
    /// Late fetch result dropped because the segment is already appended.
    Discarded { index: usize },
}
