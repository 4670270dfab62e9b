//! Segmentation math
//!
//! A payload of `total_length` bytes is cut into `ceil(total_length / segment_size)`
//! segments. Every segment is full except possibly the last.

use crate::config::protocol::MAX_SEGMENT_SIZE;
use core::ops::Range;

/// Reasons a payload cannot be segmented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    /// Segment size is zero or above the radio ceiling
    SegmentSize,
    /// More segments than a u16 segment number can address
    TooLarge,
}

/// How one payload splits into segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    total_length: u32,
    segment_size: u8,
    segment_count: u16,
}

impl SegmentPlan {
    pub fn new(total_length: u32, segment_size: u8) -> Result<Self, PlanError> {
        if segment_size == 0 || segment_size > MAX_SEGMENT_SIZE {
            return Err(PlanError::SegmentSize);
        }
        let count = total_length.div_ceil(segment_size as u32);
        let segment_count = u16::try_from(count).map_err(|_| PlanError::TooLarge)?;

        Ok(Self {
            total_length,
            segment_size,
            segment_count,
        })
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn segment_size(&self) -> u8 {
        self.segment_size
    }

    pub fn segment_count(&self) -> u16 {
        self.segment_count
    }

    /// Length of the final segment; zero when there are no segments
    pub fn last_segment_size(&self) -> u8 {
        if self.segment_count == 0 {
            return 0;
        }
        match self.total_length % self.segment_size as u32 {
            0 => self.segment_size,
            rem => rem as u8,
        }
    }

    /// Byte offset of a segment
    pub fn offset(&self, index: u16) -> u32 {
        index as u32 * self.segment_size as u32
    }

    /// Length of a segment, or `None` past the end
    pub fn segment_len(&self, index: u16) -> Option<u8> {
        if index >= self.segment_count {
            None
        } else if index + 1 == self.segment_count {
            Some(self.last_segment_size())
        } else {
            Some(self.segment_size)
        }
    }

    /// Byte range of a segment within the payload
    pub fn segment_range(&self, index: u16) -> Option<Range<u32>> {
        let len = self.segment_len(index)?;
        let start = self.offset(index);
        Some(start..start + len as u32)
    }

    /// Segment starting at `offset`, if the offset lies on a boundary within the plan
    ///
    /// The end of the payload maps to `segment_count`.
    pub fn segment_at_offset(&self, offset: u32) -> Option<u16> {
        let size = self.segment_size as u32;
        if offset % size != 0 {
            return None;
        }
        let index = offset / size;
        if index > self.segment_count as u32 {
            return None;
        }
        Some(index as u16)
    }
}
