use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch; 0 when the system clock predates it.
pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Expiry is inclusive: a record is already expired at its `expires_at_unix_ms` instant.
pub fn is_expired_unix_ms(expires_at_unix_ms: u64, now_unix_ms: u64) -> bool {
    now_unix_ms >= expires_at_unix_ms
}

/// Source of "now" for every expiry decision.
pub trait Clock: Send + Sync {
    fn now_unix_ms(&self) -> u64;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_ms(&self) -> u64 {
        current_unix_timestamp_ms()
    }
}

/// Hand-driven clock for tests and replay tooling.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_unix_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now_unix_ms: u64) -> Self {
        Self {
            now_unix_ms: Arc::new(AtomicU64::new(now_unix_ms)),
        }
    }

    pub fn set(&self, now_unix_ms: u64) {
        self.now_unix_ms.store(now_unix_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_unix_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_ms(&self) -> u64 {
        self.now_unix_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp_ms, is_expired_unix_ms, Clock, ManualClock, SystemClock};

    #[test]
    fn unit_manual_clock_advances_shared_handle() {
        let clock = ManualClock::new(10);
        let handle = clock.clone();
        clock.advance_ms(5);
        assert_eq!(handle.now_unix_ms(), 15);
        handle.set(3);
        assert_eq!(clock.now_unix_ms(), 3);
    }

    #[test]
    fn unit_expiry_boundary_counts_as_expired() {
        assert!(is_expired_unix_ms(1_000, 1_000));
        assert!(is_expired_unix_ms(999, 1_000));
        assert!(!is_expired_unix_ms(1_001, 1_000));
    }

    #[test]
    fn unit_system_clock_reads_wall_time() {
        let before = current_unix_timestamp_ms();
        let now = SystemClock.now_unix_ms();
        assert!(now >= before);
        assert!(now > 1_600_000_000_000);
    }
}
