use crate::core::state::SegmentPlan;

pub const TARGET_SEGMENT_DURATION_SECS: u64 = 60;
pub const WORDS_PER_MINUTE: u64 = 145;
pub const WORDS_PER_SEGMENT: usize =
    ((TARGET_SEGMENT_DURATION_SECS * WORDS_PER_MINUTE + 30) / 60) as usize;

impl SegmentPlan {
    /// One segment per started minute of travel, never fewer than one.
    pub fn for_duration(duration_seconds: u64) -> Self {
        Self {
            total_segments: total_segments(duration_seconds),
            words_per_segment: WORDS_PER_SEGMENT,
        }
    }
}

pub fn total_segments(duration_seconds: u64) -> usize {
    duration_seconds
        .div_ceil(TARGET_SEGMENT_DURATION_SECS)
        .max(1) as usize
}
