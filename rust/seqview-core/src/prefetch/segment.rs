// rust/seqview-core/src/prefetch/segment.rs

//! Ring of fixed-size shared-memory segments for process workers.
//!
//! The ring is one `MAP_SHARED` mapping of an unlinked temporary file, split
//! into equal segments. It is created before workers are forked so every
//! child sees the same pages at the same address. Only the consumer side
//! hands segments out and takes them back; a child writes exactly the segment
//! named in its `Compute` command.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Result, SeqError};

pub(crate) struct SegmentRing {
    map: MmapMut,
    segment_size: usize,
    count: usize,
    free: VecDeque<usize>,
}

impl SegmentRing {
    /// Maps `count` segments of `segment_size` bytes, backed by a temporary
    /// file in `dir` (or the system temp directory).
    pub(crate) fn create(count: usize, segment_size: usize, dir: Option<&Path>) -> Result<Self> {
        let total = count.checked_mul(segment_size).ok_or_else(|| {
            SeqError::config(format!(
                "{count} segments of {segment_size} bytes overflow the address space"
            ))
        })?;

        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|e| SeqError::worker(None, format!("failed to create segment file: {e}")))?;
        file.set_len(total as u64)
            .map_err(|e| SeqError::worker(None, format!("failed to size segment file: {e}")))?;

        // SAFETY: the file is private to this ring (already unlinked) and is
        // never truncated while mapped.
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| SeqError::worker(None, format!("failed to map segments: {e}")))?;

        Ok(Self {
            map,
            segment_size,
            count,
            free: (0..count).collect(),
        })
    }

    pub(crate) fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn acquire(&mut self) -> Option<usize> {
        self.free.pop_front()
    }

    pub(crate) fn release(&mut self, segment: usize) {
        debug_assert!(segment < self.count);
        debug_assert!(!self.free.contains(&segment));
        self.free.push_back(segment);
    }

    /// Start of the mapping, for writers in forked children.
    pub(crate) fn base_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// The first `len` bytes of `segment`.
    pub(crate) fn read(&self, segment: usize, len: usize) -> Result<&[u8]> {
        if segment >= self.count || len > self.segment_size {
            return Err(SeqError::worker(
                None,
                format!("invalid shared segment {segment} with {len} bytes"),
            ));
        }
        let start = segment * self.segment_size;
        Ok(&self.map[start..start + len])
    }

    #[cfg(test)]
    pub(crate) fn write(&mut self, segment: usize, bytes: &[u8]) {
        let start = segment * self.segment_size;
        self.map[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl fmt::Debug for SegmentRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentRing")
            .field("segment_size", &self.segment_size)
            .field("count", &self.count)
            .field("available", &self.free.len())
            .finish()
    }
}

/// Mutable view of one segment inside a mapping starting at `base`.
///
/// # Safety
///
/// `base` must point to a live mapping of at least
/// `(segment + 1) * segment_size` bytes, and nothing else may access the
/// segment for the lifetime of the returned slice.
pub(crate) unsafe fn segment_mut<'a>(
    base: *mut u8,
    segment: usize,
    segment_size: usize,
) -> &'a mut [u8] {
    std::slice::from_raw_parts_mut(base.add(segment * segment_size), segment_size)
}
