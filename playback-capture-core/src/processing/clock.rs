use std::time::{Duration, Instant};

/// Monotonic presentation-timestamp clock.
///
/// All timestamps handed to the encoder derive from one start instant, so
/// chunks read in order get non-decreasing timestamps.
#[derive(Debug, Clone, Copy)]
pub struct PtsClock {
    start: Instant,
}

impl PtsClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Share a timebase started elsewhere.
    pub fn from_instant(start: Instant) -> Self {
        Self { start }
    }

    /// Microseconds since the clock started.
    #[inline]
    pub fn now_us(&self) -> i64 {
        duration_to_us(self.start.elapsed())
    }

    /// Microseconds between the clock start and `instant`; zero if `instant` is earlier.
    #[inline]
    pub fn pts_at(&self, instant: Instant) -> i64 {
        duration_to_us(instant.saturating_duration_since(self.start))
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }
}

impl Default for PtsClock {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_to_us(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pts_is_monotonic() {
        let clock = PtsClock::new();
        let first = clock.now_us();
        thread::sleep(Duration::from_millis(5));
        let second = clock.now_us();
        assert!(second > first);
    }

    #[test]
    fn shared_start_gives_matching_pts() {
        let a = PtsClock::new();
        let b = PtsClock::from_instant(a.start_instant());
        let now = Instant::now();
        assert_eq!(a.pts_at(now), b.pts_at(now));
    }

    #[test]
    fn instants_before_start_clamp_to_zero() {
        let earlier = Instant::now();
        thread::sleep(Duration::from_millis(2));
        let clock = PtsClock::new();
        assert_eq!(clock.pts_at(earlier), 0);
    }
}
