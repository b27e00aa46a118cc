// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded Outbound Queue
//!
//! Per-session buffer between a frame producer (PTY or chat bridge) and the
//! WebSocket writer. A slow consumer never blocks the producer: once the queue
//! is full the oldest frame is dropped to make room.
//!
//! The backpressure flag is raised when the depth reaches the high water mark
//! and only lowered once a drain brings it back down to the low water mark.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub high_water_events: u64,
}

/// Result of a single enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The frame was queued after evicting the oldest pending frame.
    DroppedOldest,
}

#[derive(Debug)]
pub struct BoundedOutboundQueue<T> {
    items: VecDeque<T>,
    max_size: usize,
    high_water_mark: usize,
    low_water_mark: usize,
    backpressured: bool,
    stats: QueueStats,
}

impl<T> BoundedOutboundQueue<T> {
    /// `high_water_mark` and `low_water_mark` are clamped so that
    /// `low <= high <= max_size`.
    pub fn new(max_size: usize, high_water_mark: usize, low_water_mark: usize) -> Self {
        let max_size = max_size.max(1);
        let high_water_mark = high_water_mark.clamp(1, max_size);
        let low_water_mark = low_water_mark.min(high_water_mark);
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
            high_water_mark,
            low_water_mark,
            backpressured: false,
            stats: QueueStats::default(),
        }
    }

    /// Build a queue whose marks are fractions of `max_size`.
    pub fn with_ratios(max_size: usize, high_ratio: f64, low_ratio: f64) -> Self {
        let high = (max_size as f64 * high_ratio).ceil() as usize;
        let low = (max_size as f64 * low_ratio).floor() as usize;
        Self::new(max_size, high, low)
    }

    pub fn enqueue(&mut self, item: T) -> EnqueueOutcome {
        let outcome = if self.items.len() >= self.max_size {
            self.items.pop_front();
            self.stats.dropped += 1;
            EnqueueOutcome::DroppedOldest
        } else {
            EnqueueOutcome::Queued
        };

        self.items.push_back(item);
        self.stats.enqueued += 1;

        if !self.backpressured && self.items.len() >= self.high_water_mark {
            self.backpressured = true;
            self.stats.high_water_events += 1;
        }

        outcome
    }

    /// Remove up to `max` frames from the front, oldest first.
    pub fn dequeue(&mut self, max: usize) -> Vec<T> {
        let take = max.min(self.items.len());
        let batch: Vec<T> = self.items.drain(..take).collect();
        if self.backpressured && self.items.len() <= self.low_water_mark {
            self.backpressured = false;
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_backpressured(&self) -> bool {
        self.backpressured
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_oldest() {
        let mut queue = BoundedOutboundQueue::new(100, 80, 50);
        for i in 0..150 {
            queue.enqueue(i);
        }

        assert_eq!(queue.len(), 100);
        let stats = queue.stats();
        assert_eq!(stats.enqueued, 150);
        assert_eq!(stats.dropped, 50);

        let batch = queue.dequeue(10);
        assert_eq!(batch, (50..60).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_outcome() {
        let mut queue = BoundedOutboundQueue::new(2, 2, 0);
        assert_eq!(queue.enqueue("a"), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue("b"), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue("c"), EnqueueOutcome::DroppedOldest);
        assert_eq!(queue.dequeue(5), vec!["b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure_hysteresis() {
        let mut queue = BoundedOutboundQueue::new(10, 8, 5);
        for i in 0..7 {
            queue.enqueue(i);
        }
        assert!(!queue.is_backpressured());

        queue.enqueue(7);
        assert!(queue.is_backpressured());
        assert_eq!(queue.stats().high_water_events, 1);

        // 8 -> 6: still above the low mark
        queue.dequeue(2);
        assert!(queue.is_backpressured());

        // 6 -> 5: released
        queue.dequeue(1);
        assert!(!queue.is_backpressured());

        queue.enqueue(8);
        queue.enqueue(9);
        queue.enqueue(10);
        assert!(queue.is_backpressured());
        assert_eq!(queue.stats().high_water_events, 2);
    }

    #[test]
    fn test_ratio_constructor() {
        let mut queue: BoundedOutboundQueue<u8> = BoundedOutboundQueue::with_ratios(100, 0.8, 0.5);
        for _ in 0..79 {
            queue.enqueue(0);
        }
        assert!(!queue.is_backpressured());
        queue.enqueue(0);
        assert!(queue.is_backpressured());
        queue.dequeue(29);
        assert!(queue.is_backpressured());
        queue.dequeue(1);
        assert!(!queue.is_backpressured());
    }
}
