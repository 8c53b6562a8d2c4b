//! Clock abstraction for deterministic time in policy and trace-store paths.
//!
//! Mirrors the teacher's virtual-time service, but fully implemented: tests
//! that need reproducible `now()` (time-window policy checks, TTL eviction)
//! swap in a [`VirtualClock`] instead of depending on wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// Clock abstraction. Returns milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// System (production) clock, backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        crate::ids::now_ms()
    }
}

/// Deterministic clock with manual control, for tests.
#[derive(Debug)]
pub struct VirtualClock {
    now_ms: AtomicU64,
}

impl VirtualClock {
    /// Create a new virtual clock seeded at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(start_ms) }
    }

    /// Advance the virtual clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the virtual clock to an absolute millisecond value.
    pub fn set_ms(&self, value: u64) {
        self.now_ms.store(value, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

static PROCESS_CLOCK: OnceLock<RwLock<Arc<dyn Clock>>> = OnceLock::new();

fn cell() -> &'static RwLock<Arc<dyn Clock>> {
    PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)))
}

/// Get the current process-wide clock (cheap `Arc` clone).
pub fn process_clock() -> Arc<dyn Clock> {
    cell().read().expect("process clock lock poisoned").clone()
}

/// Set/swap the process-wide clock. Used by tests and deterministic replay.
pub fn set_process_clock(clock: Arc<dyn Clock>) {
    *cell().write().expect("process clock lock poisoned") = clock;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_is_deterministic() {
        let clk = VirtualClock::new(1_000);
        assert_eq!(clk.now_ms(), 1_000);
        clk.advance_ms(5);
        assert_eq!(clk.now_ms(), 1_005);
        clk.set_ms(42);
        assert_eq!(clk.now_ms(), 42);
    }

    #[test]
    fn process_clock_defaults_to_system_and_can_be_swapped() {
        let clk = Arc::new(VirtualClock::new(7));
        set_process_clock(clk);
        assert_eq!(process_clock().now_ms(), 7);
        // restore a system clock so later tests in this process see real time
        set_process_clock(Arc::new(SystemClock));
        assert!(process_clock().now_ms() > 0);
    }
}
