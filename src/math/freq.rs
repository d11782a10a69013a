//! Arrival-rate estimation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Moving average of the interval between successive events
#[derive(Clone, Debug)]
pub struct FrequencyEstimator {
    window: usize,
    periods: VecDeque<Duration>,
    sum: Duration,
    last: Option<Instant>,
}

impl FrequencyEstimator {
    /// Average over the last `window` intervals (at least one)
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            periods: VecDeque::with_capacity(window),
            sum: Duration::ZERO,
            last: None,
        }
    }

    /// Record an event now
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record an event at `now`
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let period = now.saturating_duration_since(last);
            if self.periods.len() == self.window {
                if let Some(old) = self.periods.pop_front() {
                    self.sum -= old;
                }
            }
            self.periods.push_back(period);
            self.sum += period;
        }
        self.last = Some(now);
    }

    /// Mean interval, `None` until two events were seen
    pub fn period(&self) -> Option<Duration> {
        if self.periods.is_empty() {
            return None;
        }
        Some(self.sum / self.periods.len() as u32)
    }

    /// Events per second, 0.0 until two events were seen
    pub fn hz(&self) -> f64 {
        match self.period() {
            Some(p) if !p.is_zero() => 1.0 / p.as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.periods.clear();
        self.sum = Duration::ZERO;
        self.last = None;
    }
}

impl Default for FrequencyEstimator {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_rate() {
        let mut est = FrequencyEstimator::new(4);
        let t0 = Instant::now();
        assert_eq!(est.hz(), 0.0);
        for i in 0..10 {
            est.tick_at(t0 + Duration::from_millis(100 * i));
        }
        assert_eq!(est.period(), Some(Duration::from_millis(100)));
        assert!((est.hz() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_forgets_old_periods() {
        let mut est = FrequencyEstimator::new(2);
        let t0 = Instant::now();
        est.tick_at(t0);
        est.tick_at(t0 + Duration::from_millis(1000));
        est.tick_at(t0 + Duration::from_millis(1010));
        est.tick_at(t0 + Duration::from_millis(1020));
        assert_eq!(est.period(), Some(Duration::from_millis(10)));
    }
}
