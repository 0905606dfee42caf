/// Turns written timestamps into a fraction of the expected duration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressTracker {
    finish: i64,
    current: i64,
}

impl ProgressTracker {
    /// Tracker expecting `finish` microseconds.
    pub fn new(finish: i64) -> Self {
        Self { finish, current: 0 }
    }

    /// Sets the expected duration.
    pub fn set_finish(&mut self, finish: i64) {
        self.finish = finish;
    }

    /// Expected duration.
    pub fn finish(&self) -> i64 {
        self.finish
    }

    /// Records a written timestamp. Progress never moves backwards.
    pub fn track(&mut self, pts: i64) {
        self.current = self.current.max(pts);
    }

    /// Progress in `0.0..=1.0`; zero while the duration is unknown.
    pub fn progress(&self) -> f32 {
        if self.finish <= 0 {
            return 0.0;
        }
        (self.current as f64 / self.finish as f64).clamp(0.0, 1.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(ProgressTracker::new(1).progress(), 0.0);
        assert_eq!(ProgressTracker::new(0).progress(), 0.0);
    }

    #[test]
    fn test_fraction_of_finish() {
        let mut tracker = ProgressTracker::new(1000);
        for pts in [100, 200, 300, 400, 500] {
            tracker.track(pts);
        }
        assert!(close(tracker.progress(), 0.5));
    }

    #[test]
    fn test_monotonic() {
        let mut tracker = ProgressTracker::default();
        tracker.set_finish(1000);
        tracker.track(500);
        tracker.track(400);
        assert!(close(tracker.progress(), 0.5));
        tracker.track(5000);
        assert_eq!(tracker.progress(), 1.0);
    }
}
