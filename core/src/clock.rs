//! An injectable clock, so the retention scheduler and lease expiry can be
//! tested without sleeping real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since the Unix epoch.
    fn now_ns(&self) -> i64;
}

/// The real wall clock, backed by `chrono`.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    }
}

/// A clock tests can advance explicitly.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start_ns: i64) -> Self {
        FakeClock { now: Arc::new(AtomicI64::new(start_ns)) }
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
