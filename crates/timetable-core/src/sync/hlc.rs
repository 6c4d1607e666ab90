//! Hybrid Logical Clock (HLC) for ordering mutations across devices.
//!
//! A timestamp combines the wall clock (milliseconds since the Unix epoch), a
//! logical counter for events within the same millisecond, and the id of the
//! node that produced it. Timestamps are totally ordered by
//! `(wall_clock, logical, node_id)`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Source of physical time for the clock.
pub trait WallClock: Send + Sync {
    /// Current wall clock in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> i64 {
        crate::util::unix_millis_now()
    }
}

/// A single HLC reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlcTimestamp {
    /// Physical component (Unix ms)
    pub wall_clock: i64,
    /// Logical counter within `wall_clock`
    pub logical: i32,
    /// Node (device) that produced this reading
    pub node_id: String,
}

impl HlcTimestamp {
    pub fn new(wall_clock: i64, logical: i32, node_id: impl Into<String>) -> Self {
        Self {
            wall_clock,
            logical,
            node_id: node_id.into(),
        }
    }
}

impl Ord for HlcTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_clock
            .cmp(&other.wall_clock)
            .then(self.logical.cmp(&other.logical))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for HlcTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.wall_clock, self.logical, self.node_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClockState {
    last_wall: i64,
    counter: i32,
}

/// Per-node clock generating strictly increasing timestamps.
///
/// Shared between the outbox writer and the sync cycle; the state sits behind
/// one mutex so concurrent callers still observe a single sequence.
pub struct HybridLogicalClock {
    node_id: String,
    state: Mutex<ClockState>,
    wall: Arc<dyn WallClock>,
}

impl fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node_id", &self.node_id)
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl HybridLogicalClock {
    /// Create a clock for `node_id` using the system time.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_wall_clock(node_id, Arc::new(SystemClock))
    }

    /// Create a clock with an explicit wall clock source.
    pub fn with_wall_clock(node_id: impl Into<String>, wall: Arc<dyn WallClock>) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new(ClockState::default()),
            wall,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Produce a timestamp greater than every timestamp generated or merged so far.
    pub fn generate(&self) -> HlcTimestamp {
        let now = self.wall.now_millis();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now > state.last_wall {
            state.last_wall = now;
            state.counter = 0;
        } else {
            state.counter = state.counter.saturating_add(1);
        }

        HlcTimestamp::new(state.last_wall, state.counter, self.node_id.clone())
    }

    /// Fold in a timestamp observed from another node.
    ///
    /// The next `generate` is guaranteed to exceed `remote`.
    pub fn merge(&self, remote: &HlcTimestamp) {
        let now = self.wall.now_millis();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let local_wall = state.last_wall;
        let new_wall = local_wall.max(remote.wall_clock).max(now);

        let counter = if new_wall == local_wall && new_wall == remote.wall_clock {
            state.counter.max(remote.logical).saturating_add(1)
        } else if new_wall == remote.wall_clock {
            remote.logical.saturating_add(1)
        } else if new_wall == local_wall {
            // Local reading is still the maximum; keep its counter so the
            // sequence never moves backwards.
            state.counter
        } else {
            0
        };

        state.last_wall = new_wall;
        state.counter = counter;
    }

    /// Last reading produced or merged, as seen by this node.
    pub fn snapshot(&self) -> HlcTimestamp {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        HlcTimestamp::new(state.last_wall, state.counter, self.node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::ManualClock;

    #[test]
    fn generate_is_strictly_increasing_within_one_millisecond() {
        let wall = ManualClock::at(1_000);
        let clock = HybridLogicalClock::with_wall_clock("A", wall);

        let first = clock.generate();
        let second = clock.generate();
        let third = clock.generate();

        assert_eq!(first, HlcTimestamp::new(1_000, 0, "A"));
        assert_eq!(second, HlcTimestamp::new(1_000, 1, "A"));
        assert!(first < second && second < third);
    }

    #[test]
    fn generate_resets_counter_when_wall_clock_advances() {
        let wall = ManualClock::at(1_000);
        let clock = HybridLogicalClock::with_wall_clock("A", wall.clone());
        clock.generate();
        clock.generate();

        wall.set(2_000);
        assert_eq!(clock.generate(), HlcTimestamp::new(2_000, 0, "A"));
    }

    #[test]
    fn generate_stays_monotonic_when_wall_clock_goes_backwards() {
        let wall = ManualClock::at(5_000);
        let clock = HybridLogicalClock::with_wall_clock("A", wall.clone());
        let before = clock.generate();

        wall.set(1_000);
        let after = clock.generate();

        assert!(after > before);
        assert_eq!(after.wall_clock, 5_000);
    }

    #[test]
    fn merge_with_remote_ahead_makes_next_reading_exceed_remote() {
        let wall = ManualClock::at(100);
        let clock = HybridLogicalClock::with_wall_clock("A", wall);
        clock.generate();

        let remote = HlcTimestamp::new(900, 4, "B");
        clock.merge(&remote);
        let next = clock.generate();

        assert!(next > remote);
        assert_eq!(next.wall_clock, 900);
        assert_eq!(next.logical, 6);
    }

    #[test]
    fn merge_with_equal_walls_takes_max_counter() {
        let wall = ManualClock::at(500);
        let clock = HybridLogicalClock::with_wall_clock("A", wall);
        clock.generate();
        clock.generate();

        clock.merge(&HlcTimestamp::new(500, 7, "B"));
        assert_eq!(clock.snapshot(), HlcTimestamp::new(500, 8, "A"));
    }

    #[test]
    fn merge_with_remote_behind_keeps_local_sequence() {
        let wall = ManualClock::at(100);
        let clock = HybridLogicalClock::with_wall_clock("A", wall.clone());
        clock.merge(&HlcTimestamp::new(1_000, 5, "B"));
        let high = clock.generate();

        wall.set(200);
        clock.merge(&HlcTimestamp::new(300, 0, "C"));
        let next = clock.generate();

        assert!(next > high);
    }

    #[test]
    fn merge_resets_counter_when_physical_time_leads() {
        let wall = ManualClock::at(100);
        let clock = HybridLogicalClock::with_wall_clock("A", wall.clone());
        clock.generate();

        wall.set(10_000);
        clock.merge(&HlcTimestamp::new(50, 3, "B"));
        assert_eq!(clock.snapshot(), HlcTimestamp::new(10_000, 0, "A"));
    }

    #[test]
    fn ordering_breaks_ties_by_node_id() {
        let a = HlcTimestamp::new(10, 1, "A");
        let b = HlcTimestamp::new(10, 1, "B");
        let later = HlcTimestamp::new(10, 2, "A");

        assert!(a < b);
        assert!(b < later);
        assert_eq!(a.to_string(), "10.1@A");
    }
}
