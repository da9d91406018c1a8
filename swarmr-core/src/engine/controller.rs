use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use super::schedule::StageSchedule;

/// Cooperative stop signal. Set once, never cleared; VUs poll it between
/// iterations and parked VUs wake on it, so nothing is interrupted
/// mid-request.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopFlag {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        while !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

/// Where the run stands. Transitions are monotonic:
/// `Idle -> Ramping(stage) -> ... -> Draining -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// Inside stage `stage` of `stages` (1-based); a flat stage holds the
    /// target steady rather than ramping it.
    Ramping { stage: usize, stages: usize },
    /// The planned window elapsed or an abort fired; in-flight iterations
    /// finish, no new ones start.
    Draining,
    Completed,
}

impl RunPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Ramping { .. } => 1,
            Self::Draining => 2,
            Self::Completed => 3,
        }
    }
}

/// Drives the phase machine off elapsed time and owns the stop signal that
/// tells the VU pool to wind down.
#[derive(Debug)]
pub struct LoadController {
    schedule: Option<StageSchedule>,
    total_duration: Duration,
    phase: Mutex<RunPhase>,
    stop: Arc<StopFlag>,
}

impl LoadController {
    pub fn constant(total_duration: Duration) -> Self {
        Self {
            schedule: None,
            total_duration,
            phase: Mutex::new(RunPhase::Idle),
            stop: Arc::new(StopFlag::default()),
        }
    }

    pub fn staged(schedule: StageSchedule) -> Self {
        let total_duration = schedule.total_duration();
        Self {
            schedule: Some(schedule),
            total_duration,
            phase: Mutex::new(RunPhase::Idle),
            stop: Arc::new(StopFlag::default()),
        }
    }

    /// The stop signal VUs poll; shared so the pool can outlive borrow scopes.
    pub fn stop_flag(&self) -> Arc<StopFlag> {
        self.stop.clone()
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn phase(&self) -> RunPhase {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Target concurrency at `elapsed`. Constant runs hold their target for
    /// the whole window.
    pub fn target_at(&self, elapsed: Duration, constant_vus: u64) -> u64 {
        match &self.schedule {
            Some(schedule) => schedule.target_at(elapsed),
            None if elapsed >= self.total_duration => 0,
            None => constant_vus,
        }
    }

    /// Recompute the phase from elapsed time. Entering `Draining` raises the
    /// stop signal; an already-later phase is never rolled back.
    pub fn advance(&self, elapsed: Duration) -> RunPhase {
        let next = if elapsed >= self.total_duration {
            RunPhase::Draining
        } else {
            match &self.schedule {
                Some(schedule) => match schedule.snapshot_at(elapsed) {
                    Some(snap) => RunPhase::Ramping {
                        stage: snap.index + 1,
                        stages: snap.count,
                    },
                    None => RunPhase::Draining,
                },
                None => RunPhase::Ramping { stage: 1, stages: 1 },
            }
        };

        self.transition(next)
    }

    /// Abort path: stop admitting work now regardless of elapsed time.
    pub fn drain(&self) -> RunPhase {
        self.transition(RunPhase::Draining)
    }

    /// All VUs have exited; the run is over.
    pub fn complete(&self) -> RunPhase {
        self.transition(RunPhase::Completed)
    }

    fn transition(&self, next: RunPhase) -> RunPhase {
        let mut phase = self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if next.rank() > phase.rank()
            || matches!((*phase, next), (RunPhase::Ramping { .. }, RunPhase::Ramping { .. }))
        {
            *phase = next;
        }
        if matches!(*phase, RunPhase::Draining | RunPhase::Completed) {
            self.stop.stop();
        }

        *phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::plan::Stage;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn constant_run_walks_the_phase_machine() {
        let controller = LoadController::constant(secs(60));
        assert_eq!(controller.phase(), RunPhase::Idle);

        assert_eq!(
            controller.advance(secs(10)),
            RunPhase::Ramping { stage: 1, stages: 1 }
        );
        assert!(!controller.stop_flag().is_stopped());

        assert_eq!(controller.advance(secs(60)), RunPhase::Draining);
        assert!(controller.stop_flag().is_stopped());

        assert_eq!(controller.complete(), RunPhase::Completed);
    }

    #[test]
    fn staged_run_reports_the_active_stage() {
        let controller = LoadController::staged(StageSchedule::new(vec![
            Stage {
                target: 5,
                duration: secs(10),
            },
            Stage {
                target: 0,
                duration: secs(10),
            },
        ]));

        assert_eq!(
            controller.advance(secs(3)),
            RunPhase::Ramping { stage: 1, stages: 2 }
        );
        assert_eq!(
            controller.advance(secs(15)),
            RunPhase::Ramping { stage: 2, stages: 2 }
        );
        assert_eq!(controller.advance(secs(20)), RunPhase::Draining);
    }

    #[test]
    fn phases_never_roll_back() {
        let controller = LoadController::constant(secs(60));
        controller.drain();
        assert_eq!(
            controller.advance(secs(5)),
            RunPhase::Draining,
            "an aborted run must stay draining"
        );
        assert!(controller.stop_flag().is_stopped());
    }

    #[test]
    fn constant_target_drops_to_zero_after_the_window() {
        let controller = LoadController::constant(secs(60));
        assert_eq!(controller.target_at(secs(30), 10), 10);
        assert_eq!(controller.target_at(secs(60), 10), 0);
    }

    #[tokio::test]
    async fn stop_flag_wakes_waiters() {
        let flag = std::sync::Arc::new(StopFlag::default());
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait().await })
        };

        tokio::task::yield_now().await;
        flag.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap_or_else(|_| panic!("waiter did not wake"))
            .unwrap_or_else(|e| panic!("{e}"));
    }
}
