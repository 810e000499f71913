//! Logical time for the tandem harness
//!
//! There is no wall clock here. Every log in one harness draws its times from
//! a shared [`LogicalClock`], so a new action is always stamped
//! `max(last, 0) + 1` and ids stay comparable across nodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{NodeId, NodeIdentity};

/// Shared logical clock
/// INVARIANT: `tick` results are strictly increasing
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        LogicalClock::default()
    }

    /// Advance and return the next logical time
    pub fn tick(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last time handed out
    pub fn now(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Move forward to `time` if it is ahead (explicit time overrides)
    /// Never moves backwards
    pub fn observe(&self, time: u64) {
        self.last.fetch_max(time, Ordering::SeqCst);
    }
}

/// Time source for one harness: node ids plus logical clock
///
/// Cloning shares the underlying counters.
#[derive(Clone, Debug, Default)]
pub struct TestTime {
    inner: Arc<TimeInner>,
}

#[derive(Debug, Default)]
struct TimeInner {
    identity: NodeIdentity,
    clock: LogicalClock,
}

impl TestTime {
    /// Fresh time source: no node ids issued, clock at 0
    pub fn new() -> Self {
        TestTime::default()
    }

    /// Allocate a node id for a new participant
    pub fn next_node_id(&self, label: &str) -> NodeId {
        self.inner.identity.create(label)
    }

    #[inline]
    pub fn tick(&self) -> u64 {
        self.inner.clock.tick()
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.inner.clock.now()
    }

    #[inline]
    pub fn observe(&self, time: u64) {
        self.inner.clock.observe(time)
    }
}
