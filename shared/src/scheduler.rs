//! # Drift-Correcting Scheduler
//!
//! Computes absolute tick times from a fixed origin and a tick counter
//! instead of adding a fixed delay to "now". A late tick therefore does not
//! push every later tick back; the schedule skips ahead to the first slot
//! after the current time.
//!
//! ```text
//!  origin     t1     t2     t3     t4     t5
//!    │────────│──────│──────│──────│──────│───►
//!                        ▲ now (late)
//!                        └──► next = t3, not now + period
//! ```
//!
//! The scheduler is pure arithmetic over millisecond timestamps; the caller
//! owns the clock and the "run at absolute time" primitive.

use serde::Serialize;

/// Achieved rate over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateReport {
    /// Ticks per second actually delivered
    pub rate_hz: f64,
    pub ticks: u64,
    pub elapsed_ms: u64,
}

/// Next absolute deadline plus an optional rate report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub at_ms: u64,
    pub report: Option<RateReport>,
}

#[derive(Debug, Clone)]
pub struct DriftScheduler {
    period_ms: f64,
    report_interval_ms: u64,
    start_ms: u64,
    tick_count: u64,
    delivered: u64,
}

impl DriftScheduler {
    /// `rate_hz` must be positive
    pub fn new(rate_hz: f32, report_interval_ms: u64, now_ms: u64) -> Self {
        debug_assert!(rate_hz > 0.0);
        Self {
            period_ms: 1000.0 / rate_hz as f64,
            report_interval_ms,
            start_ms: now_ms,
            tick_count: 0,
            delivered: 0,
        }
    }

    #[inline]
    pub fn period_ms(&self) -> f64 {
        self.period_ms
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Record a delivered tick at `now_ms` and compute the next deadline
    ///
    /// The deadline is always strictly after `now_ms`.
    pub fn next_tick(&mut self, now_ms: u64) -> Tick {
        let at_ms = loop {
            self.tick_count += 1;
            let candidate = self.start_ms + ceil_ms(self.tick_count as f64 * self.period_ms);
            if candidate > now_ms {
                break candidate;
            }
        };

        self.delivered += 1;
        let elapsed_ms = now_ms.saturating_sub(self.start_ms);
        let report = if elapsed_ms >= self.report_interval_ms && elapsed_ms > 0 {
            let report = RateReport {
                rate_hz: self.delivered as f64 * 1000.0 / elapsed_ms as f64,
                ticks: self.delivered,
                elapsed_ms,
            };
            self.start_ms = now_ms;
            self.tick_count = 0;
            self.delivered = 0;
            Some(report)
        } else {
            None
        };

        Tick { at_ms, report }
    }
}

// `f64::ceil` lives in std; this stays usable without it.
fn ceil_ms(value: f64) -> u64 {
    let whole = value as u64;
    if (whole as f64) < value {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_time_ticks_follow_grid() {
        let mut scheduler = DriftScheduler::new(100.0, 60_000, 0);
        let mut now = 0;
        for expected in [10, 20, 30, 40] {
            let tick = scheduler.next_tick(now);
            assert_eq!(tick.at_ms, expected);
            now = tick.at_ms;
        }
    }

    #[test]
    fn test_fractional_period_rounds_up() {
        // 120 Hz: 8.33 ms period.
        let mut scheduler = DriftScheduler::new(120.0, 60_000, 1000);
        assert_eq!(scheduler.next_tick(1000).at_ms, 1009);
        assert_eq!(scheduler.next_tick(1009).at_ms, 1017);
    }

    #[test]
    fn test_late_wakeups_do_not_accumulate_lag() {
        let mut scheduler = DriftScheduler::new(100.0, 60_000, 0);
        let period = scheduler.period_ms();
        let mut previous_count = 0;
        let mut now = 0u64;

        for lag in [0u64, 3, 27, 1, 55, 9, 102, 0, 14] {
            now += lag;
            let tick = scheduler.next_tick(now);

            assert!(tick.at_ms > now);
            assert!(((tick.at_ms - now) as f64) < period + 1.0);
            assert!(scheduler.tick_count() > previous_count);
            previous_count = scheduler.tick_count();

            // Deadline stays on the original grid.
            assert_eq!(tick.at_ms % 10, 0);
            now = tick.at_ms;
        }
    }

    #[test]
    fn test_rate_report_resets_counters() {
        let mut scheduler = DriftScheduler::new(100.0, 1000, 0);
        let mut now = 0;
        let mut report = None;
        while report.is_none() {
            let tick = scheduler.next_tick(now);
            report = tick.report;
            now = tick.at_ms;
        }

        let report = report.unwrap();
        assert_eq!(report.elapsed_ms, 1000);
        assert_eq!(report.ticks, 101);
        assert!((report.rate_hz - 101.0).abs() < 1e-9);
        assert_eq!(scheduler.tick_count(), 0);

        // The next window starts at the report time.
        assert_eq!(scheduler.next_tick(1000).at_ms, 1010);
    }

    #[test]
    fn test_stalled_clock_still_advances() {
        let mut scheduler = DriftScheduler::new(50.0, 60_000, 500);
        let first = scheduler.next_tick(500).at_ms;
        let second = scheduler.next_tick(500).at_ms;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_paces_a_real_timer() {
        let origin = std::time::Instant::now();
        let now_ms = || origin.elapsed().as_millis() as u64;
        let mut scheduler = DriftScheduler::new(200.0, 60_000, now_ms());

        for _ in 0..20 {
            let tick = scheduler.next_tick(now_ms());
            let deadline = origin + std::time::Duration::from_millis(tick.at_ms);
            tokio::time::sleep_until(deadline.into()).await;
        }

        // 20 ticks of 5 ms; late wakeups are absorbed, not added.
        let elapsed = origin.elapsed().as_millis();
        assert!(elapsed >= 95, "finished early: {} ms", elapsed);
    }
}
