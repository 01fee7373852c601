//! Single-writer gate over a [`BufferSink`].

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    error::{SinkError, StreamError, StreamResult},
    segment::SegmentTable,
    sink::{BufferSink, SinkSignal},
};

/// A fetched chunk waiting to be appended.
#[derive(Debug, Clone)]
pub struct AppendOp {
    pub index: usize,
    pub offset: u64,
    pub chunk: Bytes,
}

/// How an append operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { index: usize },
    Failed { index: usize, reason: String },
    Aborted { index: usize },
    /// Dropped at dequeue because the segment is already appended.
    Discarded { index: usize },
}

/// Whether [`AppendSerializer::append`] took the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    index: usize,
    aborting: bool,
}

/// FIFO queue in front of a sink with at most one append in flight.
///
/// The next operation is submitted only when nothing is in flight and the
/// sink reports `!is_updating()`. Completion arrives through
/// [`on_signal`](Self::on_signal).
pub struct AppendSerializer<S> {
    sink: S,
    queue: VecDeque<AppendOp>,
    in_flight: Option<InFlight>,
}

impl<S: BufferSink> AppendSerializer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            queue: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Index of the in-flight operation.
    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight.map(|f| f.index)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Admit `op` unless its segment is appended, queued, or in flight.
    pub fn append(&mut self, table: &SegmentTable, op: AppendOp) -> Admission {
        let index = op.index;
        let pending = self.in_flight.is_some_and(|f| f.index == index)
            || self.queue.iter().any(|q| q.index == index);
        if table.is_appended(index) || pending {
            debug!(index, "stale append discarded at admission");
            return Admission::Stale;
        }
        trace!(index, queued = self.queue.len(), "append queued");
        self.queue.push_back(op);
        Admission::Queued
    }

    /// Submit queued operations while the slot is free.
    ///
    /// Synchronous submit failures release the slot and are reported as
    /// [`AppendOutcome::Failed`]; the next operation is tried right away.
    ///
    /// # Errors
    ///
    /// [`StreamError::SinkUnavailable`] if the sink is gone. The queue is
    /// cleared.
    pub fn pump(&mut self, table: &SegmentTable) -> StreamResult<Vec<AppendOutcome>> {
        let mut outcomes = Vec::new();
        while self.in_flight.is_none() && !self.sink.is_updating() {
            let Some(op) = self.queue.pop_front() else {
                break;
            };
            if table.is_appended(op.index) {
                debug!(index = op.index, "stale append discarded at dequeue");
                outcomes.push(AppendOutcome::Discarded { index: op.index });
                continue;
            }
            let len = op.chunk.len();
            match self.sink.append_buffer(op.offset, op.chunk) {
                Ok(()) => {
                    trace!(index = op.index, len, "append submitted");
                    self.in_flight = Some(InFlight {
                        index: op.index,
                        aborting: false,
                    });
                }
                Err(SinkError::Unavailable) => {
                    self.release();
                    return Err(StreamError::SinkUnavailable);
                }
                Err(e) => {
                    warn!(index = op.index, error = %e, "append rejected");
                    outcomes.push(AppendOutcome::Failed {
                        index: op.index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    /// Resolve the in-flight operation from a sink signal.
    ///
    /// Returns `None` for a signal with nothing in flight.
    pub fn on_signal(&mut self, signal: SinkSignal) -> Option<AppendOutcome> {
        let Some(InFlight { index, aborting }) = self.in_flight.take() else {
            trace!(?signal, "sink signal with no append in flight");
            return None;
        };
        let outcome = match signal {
            _ if aborting => AppendOutcome::Aborted { index },
            SinkSignal::UpdateEnd => AppendOutcome::Appended { index },
            SinkSignal::Aborted => AppendOutcome::Aborted { index },
            SinkSignal::Error(reason) => AppendOutcome::Failed { index, reason },
        };
        Some(outcome)
    }

    /// Abort the in-flight append if the sink is still updating.
    ///
    /// Returns the aborted segment. The slot stays held until the sink's
    /// signal arrives.
    ///
    /// # Errors
    ///
    /// Whatever the sink reports; the serializer state is unchanged.
    pub fn abort(&mut self) -> Result<Option<usize>, SinkError> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return Ok(None);
        };
        if in_flight.aborting || !self.sink.is_updating() {
            return Ok(None);
        }
        self.sink.abort()?;
        in_flight.aborting = true;
        debug!(index = in_flight.index, "append aborted");
        Ok(Some(in_flight.index))
    }

    /// Drop everything. Used when the sink disappears.
    pub fn release(&mut self) {
        self.in_flight = None;
        self.queue.clear();
    }

    pub fn buffered(&self) -> Vec<std::ops::Range<u64>> {
        self.sink.buffered()
    }
}
