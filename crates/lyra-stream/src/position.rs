//! Playback surface events and time-to-segment mapping.

use crate::error::PlaybackError;

/// Notification from the playback surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    /// Enough data to start playing. `duration` in seconds.
    Ready { duration: f64 },
    /// Playhead advanced.
    TimeUpdate { position: f64 },
    /// User moved the playhead.
    Seeking { position: f64 },
}

/// Command side of the playback surface.
pub trait PlaybackSurface: Send + 'static {
    /// # Errors
    ///
    /// Surface-specific refusal (autoplay policy, detached element, ...).
    fn play(&mut self) -> Result<(), PlaybackError>;
}

/// What caused a scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    TimeUpdate,
    Seek,
}

/// A playback position resolved against the segment grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub time: f64,
    pub index: usize,
    /// Fraction of the current segment already played, in `[0, 1]`.
    pub progress: f64,
    pub trigger: Trigger,
}

impl PositionUpdate {
    pub fn is_seek(&self) -> bool {
        self.trigger == Trigger::Seek
    }
}

/// Maps playback time to segment index.
///
/// Segments are assumed to cover equal time spans:
/// `segment_duration = duration / segment_count`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentClock {
    segment_duration: f64,
    segment_count: usize,
}

impl SegmentClock {
    pub fn new(duration: f64, segment_count: usize) -> Self {
        let segment_duration = if segment_count == 0 {
            0.0
        } else {
            duration / segment_count as f64
        };
        Self {
            segment_duration,
            segment_count,
        }
    }

    /// Clock with no usable duration; every time maps to segment 0.
    pub fn unknown(segment_count: usize) -> Self {
        Self {
            segment_duration: f64::NAN,
            segment_count,
        }
    }

    pub fn segment_duration(&self) -> f64 {
        self.segment_duration
    }

    fn has_duration(&self) -> bool {
        self.segment_duration.is_finite() && self.segment_duration > 0.0
    }

    /// `floor(time / segment_duration)` clamped to `[0, segment_count - 1]`.
    ///
    /// Returns 0 when the segment duration is unknown, zero, or not finite.
    pub fn index_for_time(&self, time: f64) -> usize {
        if !self.has_duration() || self.segment_count == 0 || time.is_nan() {
            return 0;
        }
        let last = self.segment_count - 1;
        let raw = (time / self.segment_duration).floor();
        if raw <= 0.0 {
            0
        } else if raw >= last as f64 {
            last
        } else {
            raw as usize
        }
    }

    /// Fraction of segment `index` elapsed at `time`, clamped to `[0, 1]`.
    pub fn progress_in(&self, index: usize, time: f64) -> f64 {
        if !self.has_duration() || time.is_nan() {
            return 0.0;
        }
        let start = index as f64 * self.segment_duration;
        ((time - start) / self.segment_duration).clamp(0.0, 1.0)
    }

    pub fn resolve(&self, time: f64, trigger: Trigger) -> PositionUpdate {
        let index = self.index_for_time(time);
        PositionUpdate {
            time,
            index,
            progress: self.progress_in(index, time),
            trigger,
        }
    }
}
