//! Prefetch decisions.
//!
//! Pure function of the segment table, a resolved position, and the retry
//! gate. The controller turns the result into fetch commands.

use crate::{position::PositionUpdate, segment::SegmentTable};

/// Tunables for [`plan`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Segments fetched past the current one when near its end or on seek.
    pub look_ahead: usize,
    /// Fraction of the current segment after which look-ahead kicks in.
    pub near_end_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            look_ahead: 1,
            near_end_threshold: 0.7,
        }
    }
}

/// Segments to fetch for `update`, in priority order.
///
/// Order: target, then look-ahead, then (on seek) every earlier unrequested
/// segment ascending. Requested, appended, and out-of-range indices are
/// skipped, as is anything `eligible` rejects. No index appears twice.
pub fn plan(
    table: &SegmentTable,
    update: &PositionUpdate,
    config: &SchedulerConfig,
    eligible: impl Fn(usize) -> bool,
) -> Vec<usize> {
    let mut out = Vec::new();
    let consider = |index: usize, out: &mut Vec<usize>| {
        if let Some(seg) = table.get(index)
            && seg.is_fetchable()
            && eligible(index)
            && !out.contains(&index)
        {
            out.push(index);
        }
    };

    let target = update.index;
    consider(target, &mut out);

    if update.is_seek() || update.progress > config.near_end_threshold {
        for index in (target + 1)..=target.saturating_add(config.look_ahead) {
            consider(index, &mut out);
        }
    }

    if update.is_seek() {
        for index in 0..target {
            consider(index, &mut out);
        }
    }

    out
}
