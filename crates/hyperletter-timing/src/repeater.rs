use std::time::{Duration, Instant};

/// Fires at most once per `interval`, tracked lazily against wall-clock time.
///
/// Used to drive heartbeat idle-checks and outbound reconnect backoff: both
/// are "did enough time pass since the last time we acted" checks with no
/// need for a dedicated timer thread.
#[derive(Clone, Copy, Debug)]
pub struct Repeater {
    interval: Duration,
    last_acted: Option<Instant>,
}

impl Repeater {
    #[inline]
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_acted: None }
    }

    /// Calls `f` with the elapsed time iff `interval` has passed since the
    /// last fire, and records the new fire time.
    #[inline]
    pub fn maybe<F>(&mut self, mut f: F)
    where
        F: FnMut(Duration),
    {
        if let Some(elapsed) = self.due() {
            f(elapsed);
            self.last_acted = Some(Instant::now());
        }
    }

    /// Returns whether `interval` has passed since the last fire, recording
    /// a new fire time if so.
    #[inline]
    pub fn fired(&mut self) -> bool {
        if self.due().is_some() {
            self.last_acted = Some(Instant::now());
            true
        } else {
            false
        }
    }

    #[inline]
    fn due(&self) -> Option<Duration> {
        match self.last_acted {
            None => Some(Duration::ZERO),
            Some(last) => {
                let elapsed = last.elapsed();
                (elapsed >= self.interval).then_some(elapsed)
            }
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Marks "just fired", pushing the next fire `interval` into the future.
    pub fn reset(&mut self) {
        self.last_acted = Some(Instant::now());
    }

    /// Forces the next `fired()`/`maybe()` call to fire immediately.
    pub fn force_fire(&mut self) {
        self.last_acted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_first_call() {
        let mut r = Repeater::every(Duration::from_secs(10));
        assert!(r.fired());
    }

    #[test]
    fn does_not_refire_within_interval() {
        let mut r = Repeater::every(Duration::from_millis(50));
        assert!(r.fired());
        assert!(!r.fired());
    }

    #[test]
    fn refires_after_interval() {
        let mut r = Repeater::every(Duration::from_millis(10));
        assert!(r.fired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(r.fired());
    }

    #[test]
    fn force_fire_resets_immediately() {
        let mut r = Repeater::every(Duration::from_secs(10));
        assert!(r.fired());
        assert!(!r.fired());
        r.force_fire();
        assert!(r.fired());
    }
}
