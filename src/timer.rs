use std::time::{Duration, Instant};

/// Default tick interval (100 updates per second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

/// Fixed-rate tick source polled from the host event loop.
///
/// Fires at most once per [`Ticker::poll`]. When the loop stalls for longer
/// than an interval the missed ticks are dropped instead of replayed.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    /// First tick is due immediately.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next tick is due.
    pub fn timeout(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Returns `true` when a tick is due, scheduling the following one.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }

        self.next += self.interval;
        if self.next <= now {
            log::trace!("Ticker fell behind, skipping missed ticks");
            self.next = now + self.interval;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_is_immediate() {
        let start = Instant::now();
        let mut ticker = Ticker::new(DEFAULT_INTERVAL, start);
        assert_eq!(ticker.timeout(start), Duration::ZERO);
        assert!(ticker.poll(start));
        assert!(!ticker.poll(start));
        assert_eq!(ticker.timeout(start), DEFAULT_INTERVAL);
    }

    #[test]
    fn test_fires_once_per_interval() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Duration::from_millis(10), start);
        assert!(ticker.poll(start));

        assert!(!ticker.poll(start + Duration::from_millis(9)));
        assert_eq!(
            ticker.timeout(start + Duration::from_millis(4)),
            Duration::from_millis(6)
        );
        assert!(ticker.poll(start + Duration::from_millis(10)));
        assert!(ticker.poll(start + Duration::from_millis(21)));
        assert!(!ticker.poll(start + Duration::from_millis(25)));
    }

    #[test]
    fn test_stall_does_not_burst() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Duration::from_millis(10), start);
        assert!(ticker.poll(start));

        let late = start + Duration::from_millis(500);
        assert!(ticker.poll(late));
        assert!(!ticker.poll(late));
        assert_eq!(ticker.timeout(late), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_interval_is_raised() {
        let ticker = Ticker::new(Duration::ZERO, Instant::now());
        assert_eq!(ticker.interval(), Duration::from_millis(1));
    }
}
