//! Session state machine.
//!
//! [`StreamController`] owns the segment table, the append serializer, and
//! the lifecycle. It performs no I/O of its own: every `on_*` handler returns
//! the [`Command`]s the driver has to execute (range fetches and timer
//! wake-ups). All handlers are no-ops once the session is terminal.

use bytes::Bytes;
use lyra_events::{EventBus, SegmentEvent, StreamEvent, StreamState};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::{
    config::StreamConfig,
    error::{SinkError, StreamError, StreamResult},
    position::{PlaybackEvent, PlaybackSurface, SegmentClock, Trigger},
    retry::{RetryDecision, RetryTracker},
    scheduler::{self, SchedulerConfig},
    segment::SegmentTable,
    serializer::{Admission, AppendOp, AppendOutcome, AppendSerializer},
    sink::{BufferSink, MediaSource, ReadyState, SinkSignal, SinkSignals},
};

const MIB: f64 = 1024.0 * 1024.0;

/// Work the driver must perform on behalf of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the inclusive byte range of segment `index`.
    Fetch { index: usize, start: u64, end: u64 },
    /// Call [`StreamController::on_wake`] at this instant.
    WakeAt(Instant),
}

/// Event-driven controller for one streaming session.
pub struct StreamController<M: MediaSource, P> {
    state: StreamState,
    codec: String,
    segment_count: usize,
    scheduler: SchedulerConfig,
    media: M,
    surface: P,
    bus: EventBus,
    serializer: Option<AppendSerializer<M::Sink>>,
    table: Option<SegmentTable>,
    clock: Option<SegmentClock>,
    retry: RetryTracker,
    pending_ready: Option<f64>,
    last_position: Option<f64>,
    total_fetched: u64,
    error: Option<StreamError>,
}

impl<M, P> StreamController<M, P>
where
    M: MediaSource,
    P: PlaybackSurface,
{
    pub fn new(config: &StreamConfig, media: M, surface: P, bus: EventBus) -> Self {
        Self {
            state: StreamState::Idle,
            codec: config.codec.clone(),
            segment_count: config.segment_count,
            scheduler: config.scheduler(),
            media,
            surface,
            bus,
            serializer: None,
            table: None,
            clock: None,
            retry: RetryTracker::new(config.retry.clone()),
            pending_ready: None,
            last_position: None,
            total_fetched: 0,
            error: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn table(&self) -> Option<&SegmentTable> {
        self.table.as_ref()
    }

    /// Error that moved the session to [`StreamState::Error`].
    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub fn total_fetched(&self) -> u64 {
        self.total_fetched
    }

    pub fn segment_duration(&self) -> Option<f64> {
        self.clock.map(|c| c.segment_duration())
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Attach a buffer sink for the configured codec.
    ///
    /// Returns the sink's signal channel; the driver feeds it back through
    /// [`on_sink_signal`](Self::on_sink_signal).
    ///
    /// # Errors
    ///
    /// [`StreamError::UnsupportedMedia`] for a codec the media source cannot
    /// handle, [`StreamError::SinkUnavailable`] if no sink can be created.
    pub fn open(&mut self) -> StreamResult<SinkSignals> {
        if self.state != StreamState::Idle {
            return Err(StreamError::InvalidConfig(format!(
                "open called in state {}",
                self.state
            )));
        }
        self.transition(StreamState::Opening);

        if !self.media.is_type_supported(&self.codec) {
            return Err(self.fail(StreamError::UnsupportedMedia(self.codec.clone())));
        }
        match self.media.add_source_buffer(&self.codec) {
            Ok((sink, signals)) => {
                debug!(codec = %self.codec, "source buffer attached");
                self.serializer = Some(AppendSerializer::new(sink));
                Ok(signals)
            }
            Err(SinkError::Rejected(reason)) => {
                Err(self.fail(StreamError::UnsupportedMedia(reason)))
            }
            Err(e) => {
                warn!(error = %e, "unable to add source buffer");
                Err(self.fail(StreamError::SinkUnavailable))
            }
        }
    }

    /// Asset length discovered (or not). Builds the table and fetches the
    /// first segment.
    ///
    /// # Errors
    ///
    /// Length discovery or partition failure; the session is in the error
    /// state afterwards.
    pub fn on_length(&mut self, result: StreamResult<u64>) -> StreamResult<Vec<Command>> {
        if self.state != StreamState::Opening {
            return Ok(Vec::new());
        }
        let asset_len = result.map_err(|e| self.fail(e))?;
        let table = SegmentTable::build(asset_len, self.segment_count).map_err(|e| self.fail(e))?;

        info!(
            size_mb = %format!("{:.2}", asset_len as f64 / MIB),
            segments = table.len(),
            segment_len = table.segment_len(),
            "asset opened"
        );
        self.bus.publish(StreamEvent::Opened {
            asset_len,
            segment_count: table.len(),
            segment_len: table.segment_len(),
        });
        self.clock = Some(SegmentClock::unknown(table.len()));
        self.table = Some(table);
        self.transition(StreamState::Populating);

        Ok(self.request(0).into_iter().collect())
    }

    /// A range fetch finished.
    ///
    /// # Errors
    ///
    /// Only unrecoverable failures: sink gone, or the first segment exhausted
    /// its retries while populating.
    pub fn on_fetch_complete(
        &mut self,
        index: usize,
        result: StreamResult<Bytes>,
    ) -> StreamResult<Vec<Command>> {
        if self.is_terminal() || self.table.is_none() {
            return Ok(Vec::new());
        }

        let chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(index, error = %e, "segment fetch failed");
                if let Some(table) = self.table.as_mut() {
                    table.reset_requested(index);
                }
                return self.segment_failed(index, e);
            }
        };

        let truncated = self.table.as_ref().and_then(|table| {
            let seg = table.get(index)?;
            let short = index != table.last_index() && chunk.len() as u64 != seg.len();
            short.then_some(seg.len())
        });
        if let Some(expected) = truncated {
            warn!(index, expected, received = chunk.len(), "truncated segment body");
            if let Some(table) = self.table.as_mut() {
                table.reset_requested(index);
            }
            let error = StreamError::RangeFetch {
                status: None,
                reason: format!("expected {expected} bytes, received {}", chunk.len()),
            };
            return self.segment_failed(index, error);
        }

        self.total_fetched += chunk.len() as u64;
        self.bus.publish(SegmentEvent::Fetched {
            index,
            bytes: chunk.len() as u64,
            total_fetched: self.total_fetched,
        });

        let Some(table) = self.table.as_ref() else {
            return Ok(Vec::new());
        };
        let Some(offset) = table.get(index).map(|s| s.start_byte) else {
            return Ok(Vec::new());
        };
        let admission = match self.serializer.as_mut() {
            Some(serializer) => serializer.append(
                table,
                AppendOp {
                    index,
                    offset,
                    chunk,
                },
            ),
            None => return Err(self.fail(StreamError::SinkUnavailable)),
        };
        if admission == Admission::Stale {
            self.bus.publish(SegmentEvent::Discarded { index });
            return Ok(Vec::new());
        }
        self.pump()
    }

    /// Completion signal from the sink. `None` means the channel closed.
    ///
    /// # Errors
    ///
    /// [`StreamError::SinkUnavailable`] when the sink disappeared mid-session.
    pub fn on_sink_signal(&mut self, signal: Option<SinkSignal>) -> StreamResult<Vec<Command>> {
        if self.is_terminal() {
            return Ok(Vec::new());
        }
        let Some(signal) = signal else {
            warn!("sink signal channel closed");
            if let Some(serializer) = self.serializer.as_mut() {
                serializer.release();
            }
            return Err(self.fail(StreamError::SinkUnavailable));
        };
        trace!(?signal, "sink signal");

        let outcome = self
            .serializer
            .as_mut()
            .and_then(|serializer| serializer.on_signal(signal));
        let mut commands = match outcome {
            Some(outcome) => self.handle_outcome(outcome)?,
            None => Vec::new(),
        };
        if !self.is_terminal() {
            commands.extend(self.pump()?);
        }
        Ok(commands)
    }

    /// Ready signal, position update, or seek from the playback surface.
    pub fn on_playback(&mut self, event: PlaybackEvent) -> StreamResult<Vec<Command>> {
        if self.is_terminal() {
            return Ok(Vec::new());
        }
        match event {
            PlaybackEvent::Ready { duration } => {
                self.on_ready(duration);
                Ok(Vec::new())
            }
            PlaybackEvent::TimeUpdate { position } => self.on_position(position, Trigger::TimeUpdate),
            PlaybackEvent::Seeking { position } => {
                info!(position = %format!("{position:.2}"), "seeking");
                self.abort_in_flight();
                self.on_position(position, Trigger::Seek)
            }
        }
    }

    /// Retry timer fired: re-issue segments whose backoff has elapsed.
    pub fn on_wake(&mut self) -> StreamResult<Vec<Command>> {
        let now = Instant::now();
        let mut commands = match self.state {
            StreamState::Populating if self.retry.is_eligible(0, now) => {
                self.request(0).into_iter().collect()
            }
            StreamState::Streaming => match self.last_position {
                Some(position) => self.schedule(position, Trigger::TimeUpdate),
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        if !self.is_terminal()
            && let Some(deadline) = self.retry.next_deadline(now)
        {
            commands.push(Command::WakeAt(deadline));
        }
        Ok(commands)
    }

    fn on_ready(&mut self, duration: f64) {
        match self.state {
            StreamState::Populating if self.has_appended() => self.become_ready(duration),
            StreamState::Idle | StreamState::Opening | StreamState::Populating => {
                debug!(duration, "ready signal before first append, deferring");
                self.pending_ready = Some(duration);
            }
            _ => {
                self.clock = Some(SegmentClock::new(duration, self.segment_count()));
                debug!(duration, "duration updated");
            }
        }
    }

    fn become_ready(&mut self, duration: f64) {
        let clock = SegmentClock::new(duration, self.segment_count());
        debug!(
            duration,
            segment_duration = clock.segment_duration(),
            "playback ready"
        );
        self.clock = Some(clock);
        self.transition(StreamState::Ready);

        self.bus.publish(StreamEvent::PlayRequested);
        if let Err(e) = self.surface.play() {
            warn!(error = %e, "play failed");
            self.bus.publish(StreamEvent::PlayFailed {
                error: e.to_string(),
            });
        }
    }

    fn on_position(&mut self, position: f64, trigger: Trigger) -> StreamResult<Vec<Command>> {
        self.last_position = Some(position);
        match self.state {
            StreamState::Ready => {
                self.transition(StreamState::Streaming);
                Ok(self.schedule(position, trigger))
            }
            StreamState::Streaming => Ok(self.schedule(position, trigger)),
            _ => {
                trace!(position, state = %self.state, "position before ready, ignored");
                Ok(Vec::new())
            }
        }
    }

    /// One scheduling pass at `position`.
    fn schedule(&mut self, position: f64, trigger: Trigger) -> Vec<Command> {
        let clock = self
            .clock
            .unwrap_or_else(|| SegmentClock::unknown(self.segment_count()));
        let update = clock.resolve(position, trigger);

        if self.maybe_end_of_stream(update.index) {
            return Vec::new();
        }

        let Some(table) = self.table.as_ref() else {
            return Vec::new();
        };
        let now = Instant::now();
        let retry = &self.retry;
        let plan = scheduler::plan(table, &update, &self.scheduler, |index| {
            retry.is_eligible(index, now)
        });
        if !plan.is_empty() {
            debug!(
                index = update.index,
                progress = %format!("{:.2}", update.progress),
                ?trigger,
                ?plan,
                "scheduling"
            );
        }
        plan.into_iter().filter_map(|i| self.request(i)).collect()
    }

    fn abort_in_flight(&mut self) {
        if self.media.ready_state() != ReadyState::Open {
            return;
        }
        let Some(serializer) = self.serializer.as_mut() else {
            return;
        };
        if !serializer.sink().is_updating() {
            return;
        }
        match serializer.abort() {
            Ok(Some(index)) => debug!(index, "in-flight append aborted for seek"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "abort failed"),
        }
    }

    fn pump(&mut self) -> StreamResult<Vec<Command>> {
        let Some(table) = self.table.as_ref() else {
            return Ok(Vec::new());
        };
        let result = match self.serializer.as_mut() {
            Some(serializer) => serializer.pump(table),
            None => Err(StreamError::SinkUnavailable),
        };
        let outcomes = result.map_err(|e| self.fail(e))?;

        let mut commands = Vec::new();
        for outcome in outcomes {
            commands.extend(self.handle_outcome(outcome)?);
        }
        Ok(commands)
    }

    fn handle_outcome(&mut self, outcome: AppendOutcome) -> StreamResult<Vec<Command>> {
        match outcome {
            AppendOutcome::Appended { index } => {
                self.on_appended(index);
                Ok(Vec::new())
            }
            AppendOutcome::Failed { index, reason } => {
                warn!(index, %reason, "append failed");
                if let Some(table) = self.table.as_mut() {
                    table.reset_requested(index);
                }
                self.segment_failed(index, StreamError::AppendFailure { index, reason })
            }
            AppendOutcome::Aborted { index } => {
                if let Some(table) = self.table.as_mut() {
                    table.reset_requested(index);
                }
                self.bus.publish(SegmentEvent::Aborted { index });
                // Positions are ignored until ready, so no scheduling pass
                // would pick the segment up again.
                if self.state == StreamState::Populating {
                    debug!(index, "re-requesting aborted segment while populating");
                    return Ok(self.request(index).into_iter().collect());
                }
                Ok(Vec::new())
            }
            AppendOutcome::Discarded { index } => {
                self.bus.publish(SegmentEvent::Discarded { index });
                Ok(Vec::new())
            }
        }
    }

    fn on_appended(&mut self, index: usize) {
        let Some(table) = self.table.as_mut() else {
            return;
        };
        table.mark_appended(index);
        self.retry.clear(index);
        let (appended, total) = (table.appended_count(), table.len());
        self.bus.publish(SegmentEvent::Appended {
            index,
            appended,
            total,
        });

        let ranges = self
            .serializer
            .as_ref()
            .map(AppendSerializer::buffered)
            .unwrap_or_default();
        if let (Some(first), Some(last)) = (ranges.first(), ranges.last()) {
            debug!(
                index,
                start = first.start,
                end = last.end,
                total = ranges.len(),
                "buffered"
            );
        }
        self.bus.publish(StreamEvent::Buffered { ranges });

        if self.state == StreamState::Populating
            && let Some(duration) = self.pending_ready.take()
        {
            self.become_ready(duration);
        }

        if self.state == StreamState::Streaming
            && let (Some(position), Some(clock)) = (self.last_position, self.clock)
        {
            self.maybe_end_of_stream(clock.index_for_time(position));
        }
    }

    /// Record a per-segment failure and decide how it gets retried.
    fn segment_failed(&mut self, index: usize, error: StreamError) -> StreamResult<Vec<Command>> {
        let now = Instant::now();
        let decision = self.retry.record_failure(index, now);
        let retry_in = match decision {
            RetryDecision::Retry { after } => Some(after),
            RetryDecision::Exhausted => None,
        };
        self.bus.publish(match &error {
            StreamError::AppendFailure { reason, .. } => SegmentEvent::AppendFailed {
                index,
                error: reason.clone(),
            },
            other => SegmentEvent::FetchFailed {
                index,
                error: other.to_string(),
                retry_in,
            },
        });

        match (decision, self.state) {
            (RetryDecision::Exhausted, StreamState::Populating) if index == 0 => {
                Err(self.fail(error))
            }
            (RetryDecision::Exhausted, _) => {
                warn!(index, failures = self.retry.failures(index), "segment retries exhausted");
                Ok(Vec::new())
            }
            (RetryDecision::Retry { after }, StreamState::Populating) if after.is_zero() => {
                debug!(index, "retrying immediately");
                Ok(self.request(index).into_iter().collect())
            }
            (RetryDecision::Retry { after }, _) if !after.is_zero() => {
                debug!(index, ?after, "retry scheduled");
                Ok(vec![Command::WakeAt(now + after)])
            }
            // Picked up by the next scheduling pass.
            (RetryDecision::Retry { .. }, _) => Ok(Vec::new()),
        }
    }

    /// Signal end-of-stream if every segment is in the sink and `index` is
    /// the last one. Returns `true` once the session has ended.
    fn maybe_end_of_stream(&mut self, index: usize) -> bool {
        let Some(table) = self.table.as_ref() else {
            return false;
        };
        if !table.all_appended() || index != table.last_index() {
            return false;
        }
        if let Err(e) = self.media.end_of_stream() {
            warn!(error = %e, "end_of_stream failed");
        }
        info!(total_fetched = self.total_fetched, "end of stream");
        self.bus.publish(StreamEvent::EndOfStream);
        self.transition(StreamState::Ended);
        true
    }

    /// Mark segment `index` requested and emit its fetch command.
    fn request(&mut self, index: usize) -> Option<Command> {
        let table = self.table.as_mut()?;
        if !table.mark_requested(index) {
            return None;
        }
        let seg = table.get(index)?;
        let (start, end) = (seg.start_byte, seg.end_byte);
        debug!(index, start, end, "fetching segment");
        self.bus.publish(SegmentEvent::Requested { index, start, end });
        Some(Command::Fetch { index, start, end })
    }

    fn has_appended(&self) -> bool {
        self.table.as_ref().is_some_and(|t| t.appended_count() > 0)
    }

    fn segment_count(&self) -> usize {
        self.table.as_ref().map_or(self.segment_count, SegmentTable::len)
    }

    fn transition(&mut self, to: StreamState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "state change");
        self.state = to;
        self.bus.publish(StreamEvent::StateChanged { from, to });
    }

    fn fail(&mut self, error: StreamError) -> StreamError {
        warn!(error = %error, state = %self.state, "stream failed");
        self.bus.publish(StreamEvent::Error {
            error: error.to_string(),
        });
        self.error = Some(error.clone());
        self.transition(StreamState::Error);
        error
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use lyra_events::Event;
    use tokio::sync::broadcast;
    use url::Url;

    use super::*;
    use crate::{
        error::PlaybackError,
        memory::{MemoryMediaSource, MemorySinkHandle},
        retry::SegmentRetryPolicy,
    };

    #[derive(Clone, Default)]
    struct TestSurface {
        plays: Arc<AtomicUsize>,
        refuse: bool,
    }

    impl PlaybackSurface for TestSurface {
        fn play(&mut self) -> Result<(), PlaybackError> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(PlaybackError("autoplay blocked".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        ctl: StreamController<MemoryMediaSource, TestSurface>,
        sink: MemorySinkHandle,
        signals: SinkSignals,
        plays: Arc<AtomicUsize>,
        events: broadcast::Receiver<Event>,
    }

    fn config() -> StreamConfig {
        StreamConfig::new(Url::parse("http://cdn.test/movie.mp4").unwrap())
    }

    fn harness_with(config: StreamConfig, surface: TestSurface) -> Harness {
        let media = MemoryMediaSource::manual();
        let sink = media.handle();
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let plays = Arc::clone(&surface.plays);
        let mut ctl = StreamController::new(&config, media, surface, bus);
        let signals = ctl.open().unwrap();
        Harness {
            ctl,
            sink,
            signals,
            plays,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), TestSurface::default())
    }

    fn fetch(index: usize, start: u64, end: u64) -> Command {
        Command::Fetch { index, start, end }
    }

    impl Harness {
        fn chunk(&self, index: usize) -> Bytes {
            let seg = self.ctl.table().unwrap().get(index).unwrap();
            Bytes::from(vec![index as u8; seg.len() as usize])
        }

        fn fetched(&mut self, index: usize) -> Vec<Command> {
            let chunk = self.chunk(index);
            self.ctl.on_fetch_complete(index, Ok(chunk)).unwrap()
        }

        fn complete(&mut self) -> Vec<Command> {
            assert!(self.sink.complete(), "nothing pending in sink");
            self.signal()
        }

        fn signal(&mut self) -> Vec<Command> {
            let signal = self.signals.try_recv().ok();
            self.ctl.on_sink_signal(signal).unwrap()
        }

        fn time(&mut self, position: f64) -> Vec<Command> {
            self.ctl
                .on_playback(PlaybackEvent::TimeUpdate { position })
                .unwrap()
        }

        fn seek(&mut self, position: f64) -> Vec<Command> {
            self.ctl
                .on_playback(PlaybackEvent::Seeking { position })
                .unwrap()
        }

        /// 1000 bytes, 5 segments, 50 s: segment 0 appended, streaming at 0.
        fn streaming(&mut self) {
            self.ctl.on_length(Ok(1000)).unwrap();
            self.fetched(0);
            self.complete();
            self.ctl
                .on_playback(PlaybackEvent::Ready { duration: 50.0 })
                .unwrap();
            assert!(self.time(0.0).is_empty());
            assert_eq!(self.ctl.state(), StreamState::Streaming);
        }

        fn drain(&mut self) -> Vec<Event> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn open_builds_table_and_fetches_first_segment() {
        let mut h = harness();
        assert_eq!(h.ctl.state(), StreamState::Opening);

        let commands = h.ctl.on_length(Ok(1000)).unwrap();

        assert_eq!(commands, vec![fetch(0, 0, 199)]);
        assert_eq!(h.ctl.state(), StreamState::Populating);
        assert!(h.ctl.table().unwrap().get(0).unwrap().requested);
        let events = h.drain();
        assert!(events.contains(&Event::Stream(StreamEvent::Opened {
            asset_len: 1000,
            segment_count: 5,
            segment_len: 200,
        })));
    }

    #[test]
    fn unsupported_codec_is_fatal() {
        let media = MemoryMediaSource::manual();
        let config = config().with_codec("video/x-flv");
        let mut ctl = StreamController::new(&config, media, TestSurface::default(), EventBus::default());

        let err = ctl.open().unwrap_err();

        assert!(matches!(err, StreamError::UnsupportedMedia(_)));
        assert_eq!(ctl.state(), StreamState::Error);
        assert_eq!(ctl.error(), Some(&err));
    }

    #[test]
    fn missing_length_is_fatal() {
        let mut h = harness();

        let err = h
            .ctl
            .on_length(Err(StreamError::LengthUnavailable("no header".into())))
            .unwrap_err();

        assert!(matches!(err, StreamError::LengthUnavailable(_)));
        assert_eq!(h.ctl.state(), StreamState::Error);
        assert!(h.ctl.table().is_none());
    }

    #[test]
    fn invalid_partition_is_fatal() {
        let mut h = harness();

        let err = h.ctl.on_length(Ok(3)).unwrap_err();

        assert!(matches!(err, StreamError::InvalidPartition(_)));
        assert_eq!(h.ctl.state(), StreamState::Error);
    }

    #[test]
    fn ready_after_first_append_plays() {
        let mut h = harness();
        h.ctl.on_length(Ok(1000)).unwrap();
        h.fetched(0);
        h.complete();
        assert_eq!(h.ctl.state(), StreamState::Populating);

        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 50.0 })
            .unwrap();

        assert_eq!(h.ctl.state(), StreamState::Ready);
        assert_eq!(h.ctl.segment_duration(), Some(10.0));
        assert_eq!(h.plays.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn early_ready_is_remembered() {
        let mut h = harness();
        h.ctl.on_length(Ok(1000)).unwrap();

        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 50.0 })
            .unwrap();
        assert_eq!(h.ctl.state(), StreamState::Populating);
        assert_eq!(h.plays.load(Ordering::SeqCst), 0);

        h.fetched(0);
        h.complete();

        assert_eq!(h.ctl.state(), StreamState::Ready);
        assert_eq!(h.plays.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn play_failure_is_not_fatal() {
        let surface = TestSurface {
            refuse: true,
            ..TestSurface::default()
        };
        let mut h = harness_with(config(), surface);
        h.ctl.on_length(Ok(1000)).unwrap();
        h.fetched(0);
        h.complete();

        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 50.0 })
            .unwrap();

        assert_eq!(h.ctl.state(), StreamState::Ready);
        assert!(h.drain().iter().any(|e| matches!(
            e,
            Event::Stream(StreamEvent::PlayFailed { .. })
        )));
    }

    #[test]
    fn position_before_ready_is_ignored() {
        let mut h = harness();
        h.ctl.on_length(Ok(1000)).unwrap();

        assert!(h.time(35.0).is_empty());
        assert_eq!(h.ctl.state(), StreamState::Populating);
    }

    #[test]
    fn near_segment_end_prefetches_next() {
        let mut h = harness();
        h.streaming();

        assert!(h.time(5.0).is_empty());
        assert_eq!(h.time(8.0), vec![fetch(1, 200, 399)]);
        assert!(h.time(9.0).is_empty());
    }

    #[test]
    fn failed_fetch_is_reissued_on_next_pass() {
        let mut h = harness();
        h.streaming();
        assert_eq!(h.time(20.0), vec![fetch(2, 400, 599)]);

        let commands = h
            .ctl
            .on_fetch_complete(
                2,
                Err(StreamError::RangeFetch {
                    status: Some(500),
                    reason: "HTTP 500".into(),
                }),
            )
            .unwrap();

        assert!(commands.is_empty());
        assert!(!h.ctl.table().unwrap().get(2).unwrap().requested);
        assert_eq!(h.time(21.0), vec![fetch(2, 400, 599)]);
        assert!(h.drain().iter().any(|e| matches!(
            e,
            Event::Segment(SegmentEvent::FetchFailed { index: 2, retry_in: Some(d), .. }) if d.is_zero()
        )));
    }

    #[test]
    fn truncated_middle_segment_is_refetched() {
        let mut h = harness();
        h.streaming();
        assert_eq!(h.time(8.0), vec![fetch(1, 200, 399)]);

        let commands = h
            .ctl
            .on_fetch_complete(1, Ok(Bytes::from_static(&[1; 10])))
            .unwrap();

        assert!(commands.is_empty());
        assert!(!h.sink.is_updating());
        let seg = h.ctl.table().unwrap().get(1).unwrap().clone();
        assert!(!seg.requested && !seg.appended);
        assert_eq!(h.ctl.total_fetched(), 200);
        assert!(h.drain().iter().any(|e| matches!(
            e,
            Event::Segment(SegmentEvent::FetchFailed { index: 1, .. })
        )));

        assert_eq!(h.time(8.5), vec![fetch(1, 200, 399)]);
        h.fetched(1);
        h.complete();
        assert_eq!(h.sink.buffered(), vec![0..400]);
    }

    #[test]
    fn short_final_segment_is_accepted() {
        let mut h = harness();
        h.streaming();
        h.seek(45.0);

        h.ctl
            .on_fetch_complete(4, Ok(Bytes::from_static(&[4; 150])))
            .unwrap();

        assert_eq!(h.sink.pending_offset(), Some(800));
        h.complete();
        assert!(h.ctl.table().unwrap().get(4).unwrap().appended);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failure_backs_off() {
        let mut h = harness();
        h.streaming();
        let boom = || StreamError::RangeFetch {
            status: Some(503),
            reason: "unavailable".into(),
        };

        h.time(20.0);
        h.ctl.on_fetch_complete(2, Err(boom())).unwrap();
        h.time(21.0);
        let commands = h.ctl.on_fetch_complete(2, Err(boom())).unwrap();

        let [Command::WakeAt(deadline)] = commands.as_slice() else {
            panic!("expected a wake-up, got {commands:?}");
        };
        assert_eq!(*deadline - Instant::now(), Duration::from_millis(250));
        assert!(h.time(22.0).is_empty());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(h.ctl.on_wake().unwrap(), vec![fetch(2, 400, 599)]);
    }

    #[test]
    fn populating_retries_first_segment_immediately() {
        let mut h = harness();
        h.ctl.on_length(Ok(1000)).unwrap();

        let commands = h
            .ctl
            .on_fetch_complete(0, Err(StreamError::RangeFetch { status: None, reason: "reset".into() }))
            .unwrap();

        assert_eq!(commands, vec![fetch(0, 0, 199)]);
        assert_eq!(h.ctl.state(), StreamState::Populating);
    }

    #[test]
    fn populating_gives_up_after_max_attempts() {
        let config = config().with_retry(SegmentRetryPolicy::immediate().with_max_attempts(2));
        let mut h = harness_with(config, TestSurface::default());
        h.ctl.on_length(Ok(1000)).unwrap();
        let err = || StreamError::RangeFetch {
            status: Some(404),
            reason: "gone".into(),
        };

        assert_eq!(h.ctl.on_fetch_complete(0, Err(err())).unwrap().len(), 1);
        let result = h.ctl.on_fetch_complete(0, Err(err()));

        assert_eq!(result, Err(err()));
        assert_eq!(h.ctl.state(), StreamState::Error);
    }

    #[test]
    fn seek_forward_fetches_earlier_segments() {
        let mut h = harness();
        h.streaming();

        let commands = h.seek(40.0);

        assert_eq!(
            commands,
            vec![
                fetch(4, 800, 999),
                fetch(1, 200, 399),
                fetch(2, 400, 599),
                fetch(3, 600, 799),
            ]
        );
    }

    #[test]
    fn seek_back_aborts_in_flight_append() {
        let mut h = harness();
        h.streaming();
        h.seek(40.0);
        h.fetched(4);
        assert!(h.sink.is_updating());

        let commands = h.seek(1.0);

        assert!(commands.is_empty());
        assert_eq!(h.sink.abort_count(), 1);
        h.signal();
        let seg = h.ctl.table().unwrap().get(4).unwrap().clone();
        assert!(!seg.requested && !seg.appended);
        assert!(h.drain().contains(&Event::Segment(SegmentEvent::Aborted { index: 4 })));

        // Segment 4 is picked up again once the playhead gets there.
        assert_eq!(h.time(40.5), vec![fetch(4, 800, 999)]);
    }

    #[test]
    fn seek_while_populating_refetches_first_segment() {
        let mut h = harness();
        h.ctl.on_length(Ok(1000)).unwrap();
        h.fetched(0);
        assert!(h.sink.is_updating());

        assert!(h.seek(3.0).is_empty());
        assert_eq!(h.sink.abort_count(), 1);
        assert_eq!(h.signal(), vec![fetch(0, 0, 199)]);
        assert!(h.ctl.table().unwrap().get(0).unwrap().requested);

        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 50.0 })
            .unwrap();
        assert_eq!(h.ctl.state(), StreamState::Populating);
        h.fetched(0);
        h.complete();

        assert_eq!(h.ctl.state(), StreamState::Ready);
        assert_eq!(h.plays.load(Ordering::SeqCst), 1);
        assert!(h.ctl.table().unwrap().get(0).unwrap().appended);
    }

    #[test]
    fn seek_without_update_does_not_abort() {
        let mut h = harness();
        h.streaming();

        h.seek(12.0);

        assert_eq!(h.sink.abort_count(), 0);
    }

    #[test]
    fn appends_follow_admission_order() {
        let mut h = harness();
        h.streaming();
        h.seek(40.0);

        for index in [2, 4, 1, 3] {
            h.fetched(index);
        }
        while h.sink.is_updating() {
            h.complete();
        }

        assert_eq!(h.sink.overlapping_appends(), 0);
        assert_eq!(h.sink.commit_order(), vec![0, 400, 800, 200, 600]);
        assert!(h.ctl.table().unwrap().all_appended());
    }

    #[test]
    fn late_fetch_for_appended_segment_is_discarded() {
        let mut h = harness();
        h.streaming();
        let appends = h.sink.append_count();
        h.drain();

        let commands = h.fetched(0);

        assert!(commands.is_empty());
        assert_eq!(h.sink.append_count(), appends);
        assert!(h.drain().contains(&Event::Segment(SegmentEvent::Discarded { index: 0 })));
    }

    #[test]
    fn failed_append_resets_segment() {
        let mut h = harness();
        h.streaming();
        h.time(8.0);
        h.fetched(1);

        assert!(h.sink.fail("decode error"));
        h.signal();

        let seg = h.ctl.table().unwrap().get(1).unwrap();
        assert!(!seg.requested && !seg.appended);
        assert!(h.drain().iter().any(|e| matches!(
            e,
            Event::Segment(SegmentEvent::AppendFailed { index: 1, .. })
        )));
        assert_eq!(h.time(8.5), vec![fetch(1, 200, 399)]);
    }

    #[test]
    fn end_of_stream_requires_last_position() {
        let mut h = harness_with(config().with_segment_count(2), TestSurface::default());
        h.ctl.on_length(Ok(100)).unwrap();
        h.fetched(0);
        h.complete();
        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 10.0 })
            .unwrap();

        assert_eq!(h.time(4.0), vec![fetch(1, 50, 99)]);
        h.fetched(1);
        h.complete();
        assert!(h.ctl.table().unwrap().all_appended());
        assert_eq!(h.ctl.state(), StreamState::Streaming);

        h.time(6.0);

        assert_eq!(h.ctl.state(), StreamState::Ended);
        assert_eq!(h.sink.ready_state(), ReadyState::Ended);
        assert!(h.drain().contains(&Event::Stream(StreamEvent::EndOfStream)));
        assert!(h.time(7.0).is_empty());
        assert!(h.seek(0.0).is_empty());
    }

    #[test]
    fn end_of_stream_when_last_append_lands_at_last_position() {
        let mut h = harness_with(config().with_segment_count(2), TestSurface::default());
        h.ctl.on_length(Ok(100)).unwrap();
        h.fetched(0);
        h.complete();
        h.ctl
            .on_playback(PlaybackEvent::Ready { duration: 10.0 })
            .unwrap();

        assert_eq!(h.seek(7.0), vec![fetch(1, 50, 99)]);
        h.fetched(1);
        h.complete();

        assert_eq!(h.ctl.state(), StreamState::Ended);
    }

    #[test]
    fn closed_sink_channel_is_fatal() {
        let mut h = harness();
        h.streaming();

        let err = h.ctl.on_sink_signal(None).unwrap_err();

        assert_eq!(err, StreamError::SinkUnavailable);
        assert_eq!(h.ctl.state(), StreamState::Error);
        assert!(h.drain().iter().any(|e| matches!(e, Event::Stream(StreamEvent::Error { .. }))));
    }

    #[test]
    fn fetch_accounting() {
        let mut h = harness();
        h.streaming();
        h.time(8.0);
        h.fetched(1);

        assert_eq!(h.ctl.total_fetched(), 400);
    }
}
