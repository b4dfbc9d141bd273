//! # Frame Pool
//!
//! A fixed-capacity arena of `MotionRecord`s with an index free-list. Every
//! record is allocated once when the pool is created; afterwards records only
//! move between "available" and "checked out".
//!
//! ```text
//! ┌───────────────────────── records ─────────────────────────┐
//! │ [0] │ [1] │ [2] │ [3] │ [4] │ [5] │ [6] │ [7] │ [8] │ [9] │
//! └─────────────────────────────────────────────────────────────┘
//!   free: [9, 8, 5, 2, ...]          checked out: FrameHandle(0), ...
//! ```
//!
//! A `FrameHandle` is the only way to reach a checked-out record. Handles are
//! neither `Clone` nor `Copy`, so a record can never have two owners, and
//! `release` consumes the handle.

use heapless::Vec;

use crate::frame::MotionRecord;

/// Number of records preallocated by the bridge
pub const POOL_CAPACITY: usize = 10;

/// Errors from pool operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    /// Every record is checked out
    Exhausted,
    /// The record is already in the available set
    AlreadyAvailable(usize),
    /// The handle does not belong to this pool
    UnknownRecord(usize),
}

/// Exclusive claim on one checked-out record
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use = "a checked-out record must be released back to its pool"]
pub struct FrameHandle(usize);

impl FrameHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Fixed-capacity record pool
pub struct FramePool<const N: usize = POOL_CAPACITY> {
    records: [MotionRecord; N],
    free: Vec<usize, N>,
    available: [bool; N],
}

impl<const N: usize> FramePool<N> {
    /// Preallocate `N` records, all available
    pub fn new() -> Self {
        let mut free = Vec::new();
        // Pop order hands out index 0 first.
        for index in (0..N).rev() {
            let _ = free.push(index);
        }
        Self {
            records: [MotionRecord::new(); N],
            free,
            available: [true; N],
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of records ready to be acquired
    #[inline]
    pub fn available_len(&self) -> usize {
        self.free.len()
    }

    /// Number of records currently held through a handle
    #[inline]
    pub fn checked_out_len(&self) -> usize {
        N - self.free.len()
    }

    /// Take one available record in constant time
    pub fn try_acquire(&mut self) -> Result<FrameHandle, PoolError> {
        let index = self.free.pop().ok_or(PoolError::Exhausted)?;
        self.available[index] = false;
        Ok(FrameHandle(index))
    }

    /// Clear the record and return it to the available set
    pub fn release(&mut self, handle: FrameHandle) -> Result<(), PoolError> {
        let index = handle.0;
        if index >= N {
            return Err(PoolError::UnknownRecord(index));
        }
        if self.available[index] {
            return Err(PoolError::AlreadyAvailable(index));
        }

        self.records[index].clear();
        self.available[index] = true;
        // Cannot overflow: the record was counted as checked out.
        let _ = self.free.push(index);
        Ok(())
    }

    pub fn get(&self, handle: &FrameHandle) -> &MotionRecord {
        &self.records[handle.0]
    }

    pub fn get_mut(&mut self, handle: &FrameHandle) -> &mut MotionRecord {
        &mut self.records[handle.0]
    }
}

impl<const N: usize> Default for FramePool<N> {
    fn default() -> Self {
        Self::new()
    }
}
