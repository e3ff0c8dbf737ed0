use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::time::Instant;

type WallSource = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Millisecond clock for the pure state machines.
///
/// Reads the later of two elapsed times: `tokio::time::Instant`, which
/// follows a paused test clock but stops while the OS is suspended, and wall
/// time, which keeps running through a suspend. Readings never go backwards,
/// even when the wall clock is stepped back.
#[derive(Clone)]
pub struct Clock {
    origin: Instant,
    wall_origin_ms: i64,
    wall: WallSource,
    high_water: Arc<AtomicU64>,
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("now_ms", &self.now_ms())
            .finish_non_exhaustive()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self::with_wall_source(|| Utc::now().timestamp_millis())
    }

    /// Use `wall` (epoch milliseconds) in place of the system wall clock.
    pub fn with_wall_source(wall: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        let wall: WallSource = Arc::new(wall);
        Self {
            origin: Instant::now(),
            wall_origin_ms: wall(),
            wall,
            high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        let monotonic = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        let wall = u64::try_from((self.wall)().saturating_sub(self.wall_origin_ms)).unwrap_or(0);
        let now = monotonic.max(wall);
        let previous = self.high_water.fetch_max(now, Ordering::AcqRel);
        now.max(previous)
    }
}
