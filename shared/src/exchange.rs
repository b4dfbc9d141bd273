//! # Frame Exchange
//!
//! Couples the frame pool with the bounded hand-off queue between the
//! polling context (producer) and the consumer.
//!
//! ```text
//!   producer                                             consumer
//!  ─────────►  pool ──acquire──► fill ──push──► queue ──pop──► copy out
//!                ▲                                 │              │
//!                └────────── recycle on full ──────┘              │
//!                ▲                                                │
//!                └──────────────────── release ───────────────────┘
//! ```
//!
//! Backpressure is lossy: a full queue drops the newest frame and returns
//! its record to the pool immediately, so the producer never waits and no
//! record leaks.

use heapless::Deque;
use serde::Serialize;

use crate::frame::MotionRecord;
use crate::pool::{FrameHandle, FramePool, PoolError, POOL_CAPACITY};
use crate::sample::{BiosignalSample, InertialSample};

/// Frames that may wait for the consumer
pub const QUEUE_CAPACITY: usize = 4;

/// Outcome of offering one frame to the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Publish {
    /// The frame is waiting for the consumer
    Queued,
    /// No free record; nothing was produced this tick
    PoolExhausted,
    /// The queue was full; the frame was recycled
    QueueFull,
}

/// Counters describing exchange traffic
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExchangeStats {
    /// Frames accepted into the queue
    pub published: u64,
    /// Frames handed to the consumer
    pub delivered: u64,
    /// Ticks skipped because the pool was empty
    pub dropped_pool_exhausted: u64,
    /// Frames recycled because the queue was full
    pub dropped_queue_full: u64,
}

/// Record pool plus SPSC hand-off queue
pub struct FrameExchange<const P: usize = POOL_CAPACITY, const Q: usize = QUEUE_CAPACITY> {
    pool: FramePool<P>,
    queue: Deque<FrameHandle, Q>,
    stats: ExchangeStats,
}

impl<const P: usize, const Q: usize> FrameExchange<P, Q> {
    pub fn new() -> Self {
        Self {
            pool: FramePool::new(),
            queue: Deque::new(),
            stats: ExchangeStats::default(),
        }
    }

    /// Check out a record, fill it and queue it without blocking
    pub fn publish(
        &mut self,
        sequence: u8,
        timestamp_ms: u64,
        biosignal: Option<&BiosignalSample>,
        inertial: Option<&InertialSample>,
    ) -> Publish {
        let handle = match self.pool.try_acquire() {
            Ok(handle) => handle,
            Err(_) => {
                self.stats.dropped_pool_exhausted += 1;
                return Publish::PoolExhausted;
            }
        };

        self.pool
            .get_mut(&handle)
            .fill(sequence, timestamp_ms, biosignal, inertial);

        match self.queue.push_back(handle) {
            Ok(()) => {
                self.stats.published += 1;
                Publish::Queued
            }
            Err(rejected) => {
                self.recycle(rejected);
                self.stats.dropped_queue_full += 1;
                Publish::QueueFull
            }
        }
    }

    /// Pop the oldest frame, copy it out and return its record to the pool
    ///
    /// `None` means no frame is available yet; it is not an error.
    pub fn next_frame(&mut self) -> Option<MotionRecord> {
        let handle = self.queue.pop_front()?;
        let frame = *self.pool.get(&handle);
        self.recycle(handle);
        self.stats.delivered += 1;
        Some(frame)
    }

    /// Drop every queued frame back into the pool
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(handle) = self.queue.pop_front() {
            self.recycle(handle);
            drained += 1;
        }
        drained
    }

    #[inline]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Records currently owned by the pool or the queue
    ///
    /// Outside of `publish` this always equals the pool capacity.
    pub fn in_circulation(&self) -> usize {
        self.pool.available_len() + self.queue.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[inline]
    pub fn stats(&self) -> ExchangeStats {
        self.stats
    }

    fn recycle(&mut self, handle: FrameHandle) {
        let result = self.pool.release(handle);
        debug_assert!(
            !matches!(result, Err(PoolError::AlreadyAvailable(_))),
            "record released twice"
        );
    }
}

impl<const P: usize, const Q: usize> Default for FrameExchange<P, Q> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_exchange_has_no_frame() {
        let mut exchange: FrameExchange = FrameExchange::new();
        assert!(exchange.next_frame().is_none());
        assert_eq!(exchange.in_circulation(), POOL_CAPACITY);
    }

    #[test]
    fn test_frames_delivered_in_order() {
        let mut exchange: FrameExchange = FrameExchange::new();
        for seq in 0..3u8 {
            assert_eq!(exchange.publish(seq, seq as u64 * 8, None, None), Publish::Queued);
        }

        for seq in 0..3u8 {
            let frame = exchange.next_frame().unwrap();
            assert_eq!(frame.sequence(), seq);
            assert_eq!(frame.timestamp_ms(), seq as u64 * 8);
        }
        assert!(exchange.next_frame().is_none());
        assert_eq!(exchange.stats().delivered, 3);
    }

    #[test]
    fn test_full_queue_recycles_newest() {
        let mut exchange: FrameExchange<10, 4> = FrameExchange::new();
        for seq in 0..4u8 {
            assert_eq!(exchange.publish(seq, 0, None, None), Publish::Queued);
        }

        // Queue full: many more pushes must neither block nor leak.
        for seq in 4..50u8 {
            assert_eq!(exchange.publish(seq, 0, None, None), Publish::QueueFull);
            assert_eq!(exchange.in_circulation(), 10);
        }
        assert_eq!(exchange.stats().dropped_queue_full, 46);

        // The oldest frames survive.
        assert_eq!(exchange.next_frame().unwrap().sequence(), 0);
        assert_eq!(exchange.publish(99, 0, None, None), Publish::Queued);
    }

    #[test]
    fn test_pool_exhaustion_skips_frame() {
        // Queue larger than the pool so the pool runs dry first.
        let mut exchange: FrameExchange<2, 4> = FrameExchange::new();
        assert_eq!(exchange.publish(0, 0, None, None), Publish::Queued);
        assert_eq!(exchange.publish(1, 0, None, None), Publish::Queued);
        assert_eq!(exchange.publish(2, 0, None, None), Publish::PoolExhausted);
        assert_eq!(exchange.stats().dropped_pool_exhausted, 1);
        assert_eq!(exchange.in_circulation(), 2);

        assert!(exchange.next_frame().is_some());
        assert_eq!(exchange.publish(3, 0, None, None), Publish::Queued);
    }

    #[test]
    fn test_drain_returns_records() {
        let mut exchange: FrameExchange = FrameExchange::new();
        exchange.publish(0, 0, None, None);
        exchange.publish(1, 0, None, None);

        assert_eq!(exchange.drain(), 2);
        assert_eq!(exchange.queued_len(), 0);
        assert_eq!(exchange.in_circulation(), POOL_CAPACITY);
    }

    #[test]
    fn test_delivered_frame_carries_samples() {
        let mut exchange: FrameExchange = FrameExchange::new();
        let bio = BiosignalSample::new([3.5; 8]);
        exchange.publish(7, 42, Some(&bio), None);

        let frame = exchange.next_frame().unwrap();
        assert_eq!(frame.biosignal(), bio);
        assert_eq!(frame.inertial(), InertialSample::default());
    }
}
