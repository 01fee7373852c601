use lyra_events::EventBus;
use lyra_net::{Headers, NetOptions};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{StreamError, StreamResult},
    retry::SegmentRetryPolicy,
    scheduler::SchedulerConfig,
};

/// Codec used when none is configured.
pub const DEFAULT_CODEC: &str = "video/mp4; codecs=\"avc1.42E01E, mp4a.40.2\"";

/// Number of segments an asset is split into by default.
pub const DEFAULT_SEGMENT_COUNT: usize = 5;

/// Configuration for a streaming session.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Asset location.
    pub url: Url,
    /// Number of byte-range segments the asset is partitioned into.
    pub segment_count: usize,
    /// MIME type with codecs, passed to the media source.
    pub codec: String,
    /// Segments prefetched past the current one.
    pub look_ahead: usize,
    /// Fraction of the current segment after which look-ahead starts.
    pub near_end_threshold: f64,
    /// Retry policy for failed segment fetches and appends.
    pub retry: SegmentRetryPolicy,
    /// Network configuration.
    pub net: NetOptions,
    /// Additional HTTP headers to include in all requests.
    pub headers: Option<Headers>,
    /// Cancellation token for graceful shutdown.
    pub cancel: Option<CancellationToken>,
    /// Event bus (optional - if not provided, one is created internally).
    pub events: Option<EventBus>,
    /// Event bus channel capacity (used when `events` is not provided).
    pub events_channel_capacity: usize,
    /// Capacity of the playback event channel.
    pub playback_channel_capacity: usize,
}

impl StreamConfig {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            segment_count: DEFAULT_SEGMENT_COUNT,
            codec: DEFAULT_CODEC.to_string(),
            look_ahead: SchedulerConfig::default().look_ahead,
            near_end_threshold: SchedulerConfig::default().near_end_threshold,
            retry: SegmentRetryPolicy::default(),
            net: NetOptions::default(),
            headers: None,
            cancel: None,
            events: None,
            events_channel_capacity: 64,
            playback_channel_capacity: 32,
        }
    }

    #[must_use]
    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.segment_count = count;
        self
    }

    #[must_use]
    pub fn with_codec<S: Into<String>>(mut self, codec: S) -> Self {
        self.codec = codec.into();
        self
    }

    #[must_use]
    pub fn with_look_ahead(mut self, segments: usize) -> Self {
        self.look_ahead = segments;
        self
    }

    #[must_use]
    pub fn with_near_end_threshold(mut self, threshold: f64) -> Self {
        self.near_end_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: SegmentRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set network options.
    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Set additional HTTP headers for all requests.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Set cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set event bus for subscribing to stream events.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    #[must_use]
    pub fn with_events_channel_capacity(mut self, capacity: usize) -> Self {
        self.events_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_playback_channel_capacity(mut self, capacity: usize) -> Self {
        self.playback_channel_capacity = capacity;
        self
    }

    pub(crate) fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            look_ahead: self.look_ahead,
            near_end_threshold: self.near_end_threshold,
        }
    }

    /// # Errors
    ///
    /// [`StreamError::InvalidConfig`] for a zero segment count, a threshold
    /// outside `(0, 1)`, or zero channel capacities.
    pub fn validate(&self) -> StreamResult<()> {
        if self.segment_count == 0 {
            return Err(StreamError::InvalidConfig("segment_count must be > 0".into()));
        }
        if !(self.near_end_threshold > 0.0 && self.near_end_threshold < 1.0) {
            return Err(StreamError::InvalidConfig(format!(
                "near_end_threshold must be in (0, 1), got {}",
                self.near_end_threshold
            )));
        }
        if self.events_channel_capacity == 0 || self.playback_channel_capacity == 0 {
            return Err(StreamError::InvalidConfig("channel capacity must be > 0".into()));
        }
        if self.codec.trim().is_empty() {
            return Err(StreamError::InvalidConfig("codec must not be empty".into()));
        }
        Ok(())
    }
}
