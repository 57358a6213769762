/// Throttles byte-level transfer progress into at most `steps` callbacks.
///
/// A fraction is emitted only when `floor(steps * transferred / file_size)`
/// changes, so however finely the transfer reports, the caller sees at most
/// `steps + 1` strictly increasing fractions, the last being `1.0`.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    file_size: u64,
    transferred: u64,
    steps: u32,
    last_step: u64,
}

impl ProgressTracker {
    pub fn new(file_size: u64, steps: u32) -> Self {
        Self {
            file_size,
            transferred: 0,
            steps: steps.max(1),
            last_step: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Account for `bytes_seen` more bytes.
    pub fn observe(&mut self, bytes_seen: u64) -> Option<f64> {
        let total = self.transferred.saturating_add(bytes_seen);
        self.observe_total(total)
    }

    /// Account for a cumulative byte count. Counts never move backwards and
    /// are clamped to the file size.
    pub fn observe_total(&mut self, transferred: u64) -> Option<f64> {
        self.transferred = transferred.clamp(self.transferred, self.file_size);

        let step = self.step();
        if step == self.last_step {
            return None;
        }
        self.last_step = step;
        Some(self.fraction())
    }

    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            1.0
        } else {
            self.transferred as f64 / self.file_size as f64
        }
    }

    fn step(&self) -> u64 {
        if self.file_size == 0 {
            return u64::from(self.steps);
        }
        (u128::from(self.steps) * u128::from(self.transferred) / u128::from(self.file_size)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(file_size: u64, steps: u32, chunk: u64) -> Vec<f64> {
        let mut tracker = ProgressTracker::new(file_size, steps);
        let mut fractions = Vec::new();
        let mut sent = 0;
        while sent < file_size {
            let delta = chunk.min(file_size - sent);
            sent += delta;
            fractions.extend(tracker.observe(delta));
        }
        fractions
    }

    #[test]
    fn test_bounded_and_increasing() {
        for &(size, steps, chunk) in &[
            (1_000u64, 10u32, 1u64),
            (1_000, 10, 7),
            (1_000, 400, 3),
            (7, 400, 1),
            (10_000_000, 400, 8 * 1024),
            (5, 3, 5),
        ] {
            let fractions = emitted(size, steps, chunk);
            assert!(fractions.len() <= steps as usize + 1);
            assert!(fractions.windows(2).all(|w| w[1] > w[0]));
            assert_eq!(fractions.last().copied(), Some(1.0));
        }
    }

    #[test]
    fn test_small_increments_are_throttled() {
        let mut tracker = ProgressTracker::new(1_000, 10);
        assert_eq!(tracker.observe(50), None);
        assert_eq!(tracker.observe(50), Some(0.1));
        assert_eq!(tracker.observe(1), None);
        assert_eq!(tracker.transferred(), 101);
    }

    #[test]
    fn test_cumulative_counts() {
        let mut tracker = ProgressTracker::new(100, 4);
        assert_eq!(tracker.observe_total(25), Some(0.25));
        // A stale, smaller count does not move progress backwards
        assert_eq!(tracker.observe_total(10), None);
        assert_eq!(tracker.observe_total(150), Some(1.0));
        assert_eq!(tracker.transferred(), 100);
    }

    #[test]
    fn test_empty_file_completes_once() {
        let mut tracker = ProgressTracker::new(0, 400);
        assert_eq!(tracker.observe(0), Some(1.0));
        assert_eq!(tracker.observe(0), None);
    }
}
