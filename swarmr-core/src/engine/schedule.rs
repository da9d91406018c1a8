use std::time::Duration;

use super::plan::Stage;

/// Where a staged run currently sits, for progress reporting.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone, Copy)]
struct StageBounds {
    index: usize,
    start: Duration,
    end: Duration,
    start_target: u64,
    end_target: u64,
}

/// Piecewise-linear VU target over elapsed run time. The ramp starts at zero
/// active VUs; each stage interpolates from the previous stage's target.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl StageSchedule {
    pub fn new(stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for stage in &stages {
            acc = acc.saturating_add(stage.duration);
            cumulative_ends.push(acc);
        }
        Self {
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    fn locate(&self, elapsed: Duration) -> Option<StageBounds> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let index = if clamped >= total {
            self.stages.len() - 1
        } else {
            match self.cumulative_ends.binary_search(&clamped) {
                Ok(i) => i,
                Err(i) => i,
            }
        };

        let end = self.cumulative_ends[index];
        let start = if index == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[index - 1]
        };
        let start_target = if index == 0 {
            0
        } else {
            self.stages[index - 1].target
        };

        Some(StageBounds {
            index,
            start,
            end,
            start_target,
            end_target: self.stages[index].target,
        })
    }

    /// Active-VU target at `elapsed`, linearly interpolated within the
    /// current stage. Past the final stage it holds the last target.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(bounds) = self.locate(elapsed) else {
            return 0;
        };

        if elapsed >= self.total_duration() {
            return bounds.end_target;
        }

        let stage_duration = bounds.end.saturating_sub(bounds.start);
        if stage_duration.is_zero() {
            return bounds.end_target;
        }
        let stage_elapsed = elapsed.saturating_sub(bounds.start);

        let from = bounds.start_target as i128;
        let to = bounds.end_target as i128;
        let num = stage_elapsed.as_nanos() as i128;
        let den = (stage_duration.as_nanos() as i128).max(1);

        // Floor division so a descending ramp sheds VUs at the interpolated
        // rate instead of rounding the target up between whole seconds.
        let current = from + (to - from).saturating_mul(num).div_euclid(den);
        current.clamp(0, u64::MAX as i128) as u64
    }

    pub fn snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let bounds = self.locate(elapsed)?;
        let clamped = elapsed.min(self.total_duration());

        let stage_elapsed = clamped.saturating_sub(bounds.start);
        let stage_duration = bounds.end.saturating_sub(bounds.start);

        Some(StageSnapshot {
            index: bounds.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: bounds.start_target,
            end_target: bounds.end_target,
            current_target: self.target_at(clamped),
        })
    }

    /// How long a parked VU with 1-based index `vu_index` should sleep before
    /// re-checking whether the ramp has reached it. Scheduled suspension, not
    /// a busy wait.
    pub fn next_recheck_in(&self, elapsed: Duration, vu_index: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        let Some(bounds) = self.locate(elapsed) else {
            return default_sleep;
        };
        if elapsed >= self.total_duration() {
            return Duration::ZERO;
        }

        // Already inside the target: re-check almost immediately so a
        // ramp-down is noticed without delay.
        if vu_index <= self.target_at(elapsed) {
            return Duration::from_millis(1);
        }

        let until_stage_end = bounds.end.saturating_sub(elapsed);

        // Flat or descending stage: this VU cannot activate before the stage
        // ends.
        if bounds.end_target <= bounds.start_target {
            return until_stage_end.min(default_sleep);
        }
        if vu_index > bounds.end_target {
            return until_stage_end.min(default_sleep);
        }

        // Ascending: solve when the interpolated target first reaches this
        // index.
        let from = bounds.start_target as i128;
        let delta = bounds.end_target as i128 - from;
        let stage_ns = bounds.end.saturating_sub(bounds.start).as_nanos() as i128;
        let elapsed_ns = elapsed.saturating_sub(bounds.start).as_nanos() as i128;

        let needed_ns = ((vu_index as i128 - from).saturating_mul(stage_ns) / delta.max(1)).max(0);
        let wait_ns = needed_ns.saturating_sub(elapsed_ns).max(0);

        Duration::from_nanos(wait_ns.min(u64::MAX as i128) as u64).min(default_sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn ramp() -> StageSchedule {
        StageSchedule::new(vec![
            Stage {
                target: 10,
                duration: secs(10),
            },
            Stage {
                target: 10,
                duration: secs(20),
            },
            Stage {
                target: 0,
                duration: secs(10),
            },
        ])
    }

    #[test]
    fn interpolates_up_holds_then_ramps_down() {
        let schedule = ramp();

        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(secs(5)), 5);
        assert_eq!(schedule.target_at(secs(10)), 10);
        assert_eq!(schedule.target_at(secs(20)), 10);
        assert_eq!(schedule.target_at(secs(35)), 5);
        assert_eq!(schedule.target_at(secs(40)), 0);
        assert_eq!(schedule.target_at(secs(999)), 0);
    }

    #[test]
    fn reports_totals() {
        let schedule = ramp();
        assert_eq!(schedule.total_duration(), secs(40));
        assert_eq!(schedule.max_target(), 10);
        assert!(!schedule.is_done(secs(39)));
        assert!(schedule.is_done(secs(40)));
    }

    #[test]
    fn snapshot_tracks_the_current_stage() {
        let schedule = ramp();

        let snap = schedule
            .snapshot_at(secs(15))
            .unwrap_or_else(|| panic!("expected a snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(15));
        assert_eq!(snap.start_target, 10);
        assert_eq!(snap.end_target, 10);
        assert_eq!(snap.current_target, 10);
    }

    #[test]
    fn parked_vu_wakes_when_the_ramp_reaches_it() {
        let schedule = ramp();

        // VU 8 activates at t=8s on a 0->10 over 10s ramp; at t=5s the exact
        // wait is 3s but rechecks are capped.
        let wait = schedule.next_recheck_in(secs(5), 8);
        assert_eq!(wait, Duration::from_millis(50));

        // Just below its activation point the wait is the true remainder.
        let wait = schedule.next_recheck_in(secs(7) + Duration::from_millis(990), 8);
        assert!(wait <= Duration::from_millis(10));

        // An active VU rechecks promptly.
        assert_eq!(schedule.next_recheck_in(secs(9), 5), Duration::from_millis(1));

        // Past the end of the plan there is nothing to wait for.
        assert_eq!(schedule.next_recheck_in(secs(40), 3), Duration::ZERO);
    }

    #[test]
    fn descending_stage_never_activates_higher_indices() {
        let schedule = StageSchedule::new(vec![
            Stage {
                target: 10,
                duration: secs(10),
            },
            Stage {
                target: 2,
                duration: secs(10),
            },
        ]);

        // 2s into the 10->2 ramp the interpolated target floors to 8, so VU 9
        // is already shed.
        assert_eq!(schedule.target_at(secs(12)), 8);

        // During the ramp-down VU 9 can only become active again in a later
        // stage, so it sleeps until the stage boundary (capped).
        let wait = schedule.next_recheck_in(secs(12), 9);
        assert_eq!(wait, Duration::from_millis(50));
    }
}
