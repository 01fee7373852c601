#![forbid(unsafe_code)]

//! Segment fetch-and-buffer engine for progressive media delivery.
//!
//! The asset is split into a fixed number of byte-range segments. Playback
//! position drives which segments get fetched; fetched chunks go through a
//! single-writer [`AppendSerializer`] into a [`BufferSink`].
//!
//! # Example
//!
//! ```ignore
//! use lyra_stream::{MemoryMediaSource, StreamConfig, StreamDriver};
//!
//! let config = StreamConfig::new(url).with_segment_count(8);
//! let (driver, playback) = StreamDriver::http(config, MemoryMediaSource::new(), surface)?;
//! let task = driver.spawn();
//!
//! playback.ready(duration).await?;
//! playback.time_update(12.5).await?;
//! ```

mod config;
mod controller;
mod driver;
mod error;
mod fetch;
mod memory;
mod position;
mod retry;
mod scheduler;
mod segment;
mod serializer;
mod sink;

pub use config::{DEFAULT_CODEC, DEFAULT_SEGMENT_COUNT, StreamConfig};
pub use controller::{Command, StreamController};
pub use driver::{PlaybackHandle, StreamDriver, StreamOutcome};
pub use error::{PlaybackError, SinkError, StreamError, StreamResult};
pub use fetch::RangeFetcher;
pub use memory::{MemoryMediaSource, MemorySink, MemorySinkHandle};
pub use position::{PlaybackEvent, PlaybackSurface, PositionUpdate, SegmentClock, Trigger};
pub use retry::{RetryDecision, RetryTracker, SegmentRetryPolicy};
pub use scheduler::{SchedulerConfig, plan};
pub use segment::{Segment, SegmentTable};
pub use serializer::{Admission, AppendOp, AppendOutcome, AppendSerializer};
pub use sink::{BufferSink, MediaSource, ReadyState, SinkSignal, SinkSignals};
