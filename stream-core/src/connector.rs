//! Bounded multi-lane queue between two elements.
//!
//! A connector has `lanes` independent queues, one per worker lane of the downstream
//! element. Producers pick a lane with [`Connector::lane_for`] so every record of a
//! stream lands on the same downstream lane.

use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

pub const DEFAULT_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the record as soon as the lane is full.
    Drop,
    /// Retry for at most `timeout` before rejecting.
    Block { timeout: Duration },
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The lane is full; the record is handed back to the caller.
    Full(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) => item,
        }
    }
}

pub struct Connector<T> {
    lanes: Vec<ArrayQueue<T>>,
    policy: OverflowPolicy,
}

impl<T> Connector<T> {
    pub fn new(lanes: usize, depth: usize, policy: OverflowPolicy) -> Self {
        let lanes = lanes.max(1);
        let depth = depth.max(1);
        Self {
            lanes: (0..lanes).map(|_| ArrayQueue::new(depth)).collect(),
            policy,
        }
    }

    /// Number of lanes. This is the capacity used by the destination-slot formula.
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn lane_for(&self, slot: usize) -> usize {
        slot % self.lanes.len()
    }

    fn lane(&self, lane: usize) -> &ArrayQueue<T> {
        &self.lanes[lane % self.lanes.len()]
    }

    pub fn push(&self, lane: usize, item: T) -> Result<(), PushError<T>> {
        self.lane(lane).push(item).map_err(PushError::Full)
    }

    pub fn pop(&self, lane: usize) -> Option<T> {
        self.lane(lane).pop()
    }

    /// Pushes following the connector's overflow policy. Blocks the calling thread
    /// for at most the policy timeout.
    pub fn push_with_policy(&self, lane: usize, item: T) -> Result<(), PushError<T>> {
        match self.policy {
            OverflowPolicy::Drop => self.push(lane, item),
            OverflowPolicy::Block { timeout } => self.push_timeout(lane, item, timeout),
        }
    }

    pub fn push_timeout(&self, lane: usize, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        loop {
            match self.push(lane, item) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(rejected)) => {
                    if Instant::now() >= deadline {
                        return Err(PushError::Full(rejected));
                    }
                    item = rejected;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Sleep-and-retry pop, bounded by `wait`.
    pub fn pop_timeout(&self, lane: usize, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.pop(lane) {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }

    pub fn len(&self, lane: usize) -> usize {
        self.lane(lane).len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|q| q.is_empty())
    }
}

#[cfg(test)]
#[path = "connector_test.rs"]
mod connector_test;
