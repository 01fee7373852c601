use lyra_net::NetError;
use thiserror::Error;

/// Errors produced by `lyra-stream`.
///
/// Per-segment failures (`LengthUnavailable` outside setup, `RangeFetch`,
/// `AppendFailure`) are absorbed by the controller and retried. Setup
/// failures and `SinkUnavailable` move the session to the error state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("asset length unavailable: {0}")]
    LengthUnavailable(String),

    #[error("range fetch failed (status {status:?}): {reason}")]
    RangeFetch { status: Option<u16>, reason: String },

    #[error("append failed for segment {index}: {reason}")]
    AppendFailure { index: usize, reason: String },

    #[error("buffer sink unavailable")]
    SinkUnavailable,

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal channel closed")]
    ChannelClosed,
}

impl StreamError {
    /// Whether the session can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LengthUnavailable(_) | Self::RangeFetch { .. } | Self::AppendFailure { .. }
        )
    }

    pub(crate) fn range_fetch(error: &NetError) -> Self {
        Self::RangeFetch {
            status: error.status_code(),
            reason: error.to_string(),
        }
    }
}

/// Result type for `lyra-stream`.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors reported by a buffer sink or media source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink was detached or destroyed.
    #[error("sink is no longer attached")]
    Unavailable,

    /// Operation not allowed in the sink's current state (e.g. append while updating).
    #[error("invalid sink state: {0}")]
    InvalidState(String),

    /// The sink refused the data or the codec.
    #[error("sink rejected operation: {0}")]
    Rejected(String),
}

/// Error returned by [`PlaybackSurface::play`](crate::PlaybackSurface::play).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unable to start playback: {0}")]
pub struct PlaybackError(pub String);

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::partition(StreamError::InvalidPartition("segment count is zero".into()), "invalid partition: segment count is zero")]
    #[case::sink(StreamError::SinkUnavailable, "buffer sink unavailable")]
    #[case::append(StreamError::AppendFailure { index: 3, reason: "quota".into() }, "append failed for segment 3: quota")]
    #[case::media(StreamError::UnsupportedMedia("audio/x-foo".into()), "unsupported media: audio/x-foo")]
    fn test_error_display(#[case] error: StreamError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case(StreamError::LengthUnavailable("no content-length".into()), true)]
    #[case(StreamError::RangeFetch { status: Some(500), reason: "boom".into() }, true)]
    #[case(StreamError::AppendFailure { index: 0, reason: "decode".into() }, true)]
    #[case(StreamError::SinkUnavailable, false)]
    #[case(StreamError::InvalidPartition("x".into()), false)]
    #[case(StreamError::UnsupportedMedia("x".into()), false)]
    fn test_is_recoverable(#[case] error: StreamError, #[case] expected: bool) {
        assert_eq!(error.is_recoverable(), expected);
    }

    #[test]
    fn test_range_fetch_keeps_status() {
        let net = NetError::http_status(500, "http://cdn/a.mp4");
        assert_eq!(
            StreamError::range_fetch(&net),
            StreamError::RangeFetch {
                status: Some(500),
                reason: "HTTP 500 for URL: http://cdn/a.mp4".into(),
            }
        );
    }

    #[test]
    fn test_stream_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StreamError>();
    }
}
