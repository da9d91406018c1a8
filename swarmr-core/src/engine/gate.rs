use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared admission control for iteration starts: a run-wide iteration
/// budget, a wall-clock deadline, or both. VUs call [`next`] between
/// iterations; a `false` answer means stop cleanly.
///
/// [`next`]: IterationGate::next
#[derive(Debug)]
pub struct IterationGate {
    claimed: AtomicU64,
    budget: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationGate {
    pub fn new(budget: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            claimed: AtomicU64::new(0),
            budget,
            duration,
            deadline: OnceLock::new(),
        }
    }

    /// Anchor the deadline to the run's start instant. Idempotent.
    pub fn start_at(&self, started: Instant) {
        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    /// Claim the next iteration slot. Deadline first so the hot path does no
    /// timekeeping in pure budget mode.
    pub fn next(&self) -> bool {
        if self.duration.is_some() {
            let now = Instant::now();
            // Lazily anchored if the runner never called start_at.
            let deadline = *self.deadline.get_or_init(|| {
                now + self.duration.unwrap_or(Duration::ZERO)
            });
            if now >= deadline {
                return false;
            }
        }

        if let Some(budget) = self.budget {
            let index = self.claimed.fetch_add(1, Ordering::Relaxed);
            if index >= budget {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_shared_across_callers() {
        let gate = IterationGate::new(Some(3), None);
        assert!(gate.next());
        assert!(gate.next());
        assert!(gate.next());
        assert!(!gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn deadline_in_the_past_refuses_immediately() {
        let gate = IterationGate::new(None, Some(Duration::ZERO));
        gate.start_at(Instant::now() - Duration::from_secs(1));
        assert!(!gate.next());
    }

    #[test]
    fn unlimited_gate_always_admits() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(3600)));
        gate.start_at(Instant::now());
        for _ in 0..100 {
            assert!(gate.next());
        }
    }

    #[test]
    fn budget_and_deadline_combine() {
        let gate = IterationGate::new(Some(2), Some(Duration::from_secs(3600)));
        gate.start_at(Instant::now());
        assert!(gate.next());
        assert!(gate.next());
        assert!(!gate.next());
    }
}
