//! Millisecond clock abstraction and wraparound-safe deadlines

use core::future::Future;

/// Monotonic millisecond clock with an async delay
///
/// `now_ms` is allowed to wrap; all comparisons go through [`Deadline`].
pub trait Clock {
    /// Milliseconds since an arbitrary epoch
    fn now_ms(&self) -> u32;

    /// Wait for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32) -> impl Future<Output = ()>;
}

/// A timeout window measured from a start instant
///
/// Elapsed time is `now - start` in wrapping arithmetic, so a window that
/// straddles the `u32` overflow still expires on time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: u32,
    timeout_ms: u32,
}

impl Deadline {
    pub fn new(start: u32, timeout_ms: u32) -> Self {
        Self { start, timeout_ms }
    }

    /// Window starting at the clock's current time
    pub fn after<C: Clock>(clock: &C, timeout_ms: u32) -> Self {
        Self::new(clock.now_ms(), timeout_ms)
    }

    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.start)
    }

    pub fn expired(&self, now: u32) -> bool {
        self.elapsed(now) >= self.timeout_ms
    }

    pub fn remaining(&self, now: u32) -> u32 {
        self.timeout_ms.saturating_sub(self.elapsed(now))
    }
}

/// Clock backed by the embassy time driver
#[cfg(feature = "embassy")]
pub struct EmbassyClock;

#[cfg(feature = "embassy")]
impl Clock for EmbassyClock {
    fn now_ms(&self) -> u32 {
        embassy_time::Instant::now().as_millis() as u32
    }

    async fn delay_ms(&mut self, ms: u32) {
        embassy_time::Timer::after_millis(ms as u64).await;
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockClock;
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        let deadline = Deadline::new(1000, 250);
        assert!(!deadline.expired(1000));
        assert!(!deadline.expired(1249));
        assert!(deadline.expired(1250));
        assert_eq!(deadline.remaining(1100), 150);
        assert_eq!(deadline.remaining(2000), 0);
    }

    #[test]
    fn test_deadline_across_wraparound() {
        let deadline = Deadline::new(u32::MAX - 100, 250);
        assert!(!deadline.expired(u32::MAX));
        assert!(!deadline.expired(100));
        assert_eq!(deadline.elapsed(100), 201);
        assert!(deadline.expired(149));
    }

    #[test]
    fn test_mock_clock_delay_advances() {
        let mut clock = MockClock::starting_at(u32::MAX - 5);
        let shared = clock.clone();

        futures::executor::block_on(async {
            clock.delay_ms(10).await;
        });

        assert_eq!(shared.now_ms(), 4);
    }
}
