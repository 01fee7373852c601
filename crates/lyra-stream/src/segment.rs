//! Static partition of the asset into byte-range segments.

use std::ops::RangeInclusive;

use crate::error::{StreamError, StreamResult};

/// A contiguous byte-range slice of the asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start_byte: u64,
    /// Inclusive.
    pub end_byte: u64,
    /// A fetch has been issued and not failed since.
    pub requested: bool,
    /// The chunk is in the buffer sink. Never reset.
    pub appended: bool,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }

    pub fn byte_range(&self) -> RangeInclusive<u64> {
        self.start_byte..=self.end_byte
    }

    /// Neither in flight nor appended.
    pub fn is_fetchable(&self) -> bool {
        !self.requested && !self.appended
    }
}

/// Ordered, exhaustive partition of `[0, asset_len)`.
#[derive(Debug, Clone)]
pub struct SegmentTable {
    segments: Vec<Segment>,
    asset_len: u64,
    segment_len: u64,
}

impl SegmentTable {
    /// Partition `asset_len` bytes into `segment_count` segments.
    ///
    /// All but the last segment are `ceil(asset_len / segment_count)` bytes
    /// long; the last one absorbs the remainder.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidPartition`] when either argument is zero or the
    /// last segment would end up empty.
    pub fn build(asset_len: u64, segment_count: usize) -> StreamResult<Self> {
        if asset_len == 0 {
            return Err(StreamError::InvalidPartition("asset length is zero".into()));
        }
        if segment_count == 0 {
            return Err(StreamError::InvalidPartition("segment count is zero".into()));
        }

        let count = segment_count as u64;
        let segment_len = asset_len.div_ceil(count);
        let last_start = segment_len * (count - 1);
        if last_start >= asset_len {
            return Err(StreamError::InvalidPartition(format!(
                "{asset_len} bytes cannot be split into {segment_count} non-empty segments of {segment_len} bytes"
            )));
        }

        let segments = (0..segment_count)
            .map(|index| {
                let start_byte = segment_len * index as u64;
                let end_byte = if index == segment_count - 1 {
                    asset_len - 1
                } else {
                    start_byte + segment_len - 1
                };
                Segment {
                    index,
                    start_byte,
                    end_byte,
                    requested: false,
                    appended: false,
                }
            })
            .collect();

        Ok(Self {
            segments,
            asset_len,
            segment_len,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn asset_len(&self) -> u64 {
        self.asset_len
    }

    /// Nominal length of every segment but the last.
    pub fn segment_len(&self) -> u64 {
        self.segment_len
    }

    pub fn last_index(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Returns `false` (and changes nothing) if the segment is out of range,
    /// already requested, or already appended.
    pub(crate) fn mark_requested(&mut self, index: usize) -> bool {
        match self.segments.get_mut(index) {
            Some(seg) if seg.is_fetchable() => {
                seg.requested = true;
                true
            }
            _ => false,
        }
    }

    /// Retry arc: `requested -> unrequested`. Appended segments stay put.
    pub(crate) fn reset_requested(&mut self, index: usize) {
        if let Some(seg) = self.segments.get_mut(index)
            && !seg.appended
        {
            seg.requested = false;
        }
    }

    pub(crate) fn mark_appended(&mut self, index: usize) {
        if let Some(seg) = self.segments.get_mut(index) {
            seg.requested = true;
            seg.appended = true;
        }
    }

    pub fn is_appended(&self, index: usize) -> bool {
        self.segments.get(index).is_some_and(|s| s.appended)
    }

    pub fn all_appended(&self) -> bool {
        self.segments.iter().all(|s| s.appended)
    }

    pub fn appended_count(&self) -> usize {
        self.segments.iter().filter(|s| s.appended).count()
    }

    /// Sum of segment lengths; always equals `asset_len`.
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }
}
