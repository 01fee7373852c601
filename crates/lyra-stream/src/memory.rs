//! In-memory [`MediaSource`] / [`BufferSink`] pair.
//!
//! Appended chunks are kept in memory and their byte ranges tracked in a
//! [`RangeSet`]. Two completion modes:
//!
//! - immediate: every append commits synchronously and `UpdateEnd` is sent
//!   right away (headless playback);
//! - manual: the append stays pending until [`MemorySinkHandle::complete`] or
//!   [`MemorySinkHandle::fail`] is called (tests that need to observe the
//!   sink mid-update).

use std::{collections::BTreeMap, ops::Range, sync::Arc};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rangemap::RangeSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    error::SinkError,
    sink::{BufferSink, MediaSource, ReadyState, SinkSignal, SinkSignals},
};

const SUPPORTED_TYPES: &[&str] = &[
    "video/mp4",
    "audio/mp4",
    "video/webm",
    "audio/webm",
    "audio/mpeg",
    "audio/aac",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Immediate,
    Manual,
}

struct Pending {
    offset: u64,
    chunk: Bytes,
}

struct Inner {
    completion: Completion,
    ready_state: ReadyState,
    sink_created: bool,
    attached: bool,
    signals: Option<mpsc::UnboundedSender<SinkSignal>>,
    pending: Option<Pending>,
    chunks: BTreeMap<u64, Bytes>,
    ranges: RangeSet<u64>,
    /// Offsets in commit order.
    commits: Vec<u64>,
    appends: usize,
    aborts: usize,
    overlapping_appends: usize,
    fail_next: Option<String>,
    reject_next: Option<String>,
}

impl Inner {
    fn new(completion: Completion) -> Self {
        Self {
            completion,
            ready_state: ReadyState::Open,
            sink_created: false,
            attached: true,
            signals: None,
            pending: None,
            chunks: BTreeMap::new(),
            ranges: RangeSet::new(),
            commits: Vec::new(),
            appends: 0,
            aborts: 0,
            overlapping_appends: 0,
            fail_next: None,
            reject_next: None,
        }
    }

    fn signal(&self, signal: SinkSignal) {
        if let Some(tx) = &self.signals {
            let _ = tx.send(signal);
        }
    }

    fn commit(&mut self, pending: Pending) {
        let len = pending.chunk.len() as u64;
        if len > 0 {
            self.ranges.insert(pending.offset..pending.offset + len);
        }
        trace!(offset = pending.offset, len, "memory sink commit");
        self.commits.push(pending.offset);
        self.chunks.insert(pending.offset, pending.chunk);
    }

    /// Resolve the pending update. `None` commits, `Some(reason)` fails.
    fn resolve(&mut self, failure: Option<String>) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        match failure {
            None => {
                self.commit(pending);
                self.signal(SinkSignal::UpdateEnd);
            }
            Some(reason) => self.signal(SinkSignal::Error(reason)),
        }
        true
    }
}

/// In-memory media source. Starts in [`ReadyState::Open`].
pub struct MemoryMediaSource {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryMediaSource {
    /// Source whose sink completes every append immediately.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(Completion::Immediate))),
        }
    }

    /// Source whose sink holds every append until the handle resolves it.
    pub fn manual() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(Completion::Manual))),
        }
    }

    /// Observer/controller for the sink this source creates.
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for MemoryMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for MemoryMediaSource {
    type Sink = MemorySink;

    fn is_type_supported(&self, codec: &str) -> bool {
        let mime = codec.split(';').next().unwrap_or_default().trim();
        SUPPORTED_TYPES
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(mime))
    }

    fn add_source_buffer(&mut self, codec: &str) -> Result<(MemorySink, SinkSignals), SinkError> {
        if !self.is_type_supported(codec) {
            return Err(SinkError::Rejected(format!("unsupported type {codec}")));
        }
        let mut inner = self.inner.lock();
        if inner.ready_state != ReadyState::Open {
            return Err(SinkError::InvalidState(format!(
                "media source is {:?}",
                inner.ready_state
            )));
        }
        if inner.sink_created {
            return Err(SinkError::InvalidState("source buffer already added".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.signals = Some(tx);
        inner.sink_created = true;
        debug!(codec, "memory source buffer added");
        Ok((
            MemorySink {
                inner: Arc::clone(&self.inner),
            },
            rx,
        ))
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        if inner.ready_state != ReadyState::Open {
            return Err(SinkError::InvalidState(format!(
                "media source is {:?}",
                inner.ready_state
            )));
        }
        if inner.pending.is_some() {
            return Err(SinkError::InvalidState("source buffer is updating".into()));
        }
        inner.ready_state = ReadyState::Ended;
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready_state
    }
}

/// Sink created by [`MemoryMediaSource::add_source_buffer`].
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl BufferSink for MemorySink {
    fn is_updating(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    fn append_buffer(&mut self, offset: u64, chunk: Bytes) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        if !inner.attached {
            return Err(SinkError::Unavailable);
        }
        if inner.pending.is_some() {
            inner.overlapping_appends += 1;
            return Err(SinkError::InvalidState("append while updating".into()));
        }
        if let Some(reason) = inner.reject_next.take() {
            return Err(SinkError::Rejected(reason));
        }
        inner.appends += 1;
        inner.pending = Some(Pending { offset, chunk });

        if inner.completion == Completion::Immediate {
            let failure = inner.fail_next.take();
            inner.resolve(failure);
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        if !inner.attached {
            return Err(SinkError::Unavailable);
        }
        if inner.pending.take().is_some() {
            inner.aborts += 1;
            inner.signal(SinkSignal::Aborted);
        }
        Ok(())
    }

    fn buffered(&self) -> Vec<Range<u64>> {
        self.inner.lock().ranges.iter().cloned().collect()
    }
}

/// Shared view into a [`MemoryMediaSource`] and its sink.
#[derive(Clone)]
pub struct MemorySinkHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySinkHandle {
    /// Commit the pending append. Returns `false` if nothing was pending.
    pub fn complete(&self) -> bool {
        self.inner.lock().resolve(None)
    }

    /// Fail the pending append. Returns `false` if nothing was pending.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.inner.lock().resolve(Some(reason.into()))
    }

    /// Make the next append fail asynchronously (immediate mode).
    pub fn fail_next_append(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next = Some(reason.into());
    }

    /// Make the next append fail synchronously.
    pub fn reject_next_append(&self, reason: impl Into<String>) {
        self.inner.lock().reject_next = Some(reason.into());
    }

    /// Detach the sink: its signal channel closes and further calls fail.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.attached = false;
        inner.pending = None;
        inner.signals = None;
        inner.ready_state = ReadyState::Closed;
    }

    pub fn is_updating(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Offset of the chunk currently pending, if any.
    pub fn pending_offset(&self) -> Option<u64> {
        self.inner.lock().pending.as_ref().map(|p| p.offset)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready_state
    }

    pub fn buffered(&self) -> Vec<Range<u64>> {
        self.inner.lock().ranges.iter().cloned().collect()
    }

    /// Number of appends accepted by the sink.
    pub fn append_count(&self) -> usize {
        self.inner.lock().appends
    }

    pub fn abort_count(&self) -> usize {
        self.inner.lock().aborts
    }

    /// Appends attempted while another one was still updating.
    pub fn overlapping_appends(&self) -> usize {
        self.inner.lock().overlapping_appends
    }

    /// Chunk offsets in the order they were committed.
    pub fn commit_order(&self) -> Vec<u64> {
        self.inner.lock().commits.clone()
    }

    /// Committed bytes, ordered by offset.
    pub fn contents(&self) -> Bytes {
        let inner = self.inner.lock();
        let mut buf = BytesMut::new();
        for chunk in inner.chunks.values() {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }
}
