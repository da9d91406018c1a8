use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use swarmr_http::HttpClient;
use tokio::sync::{Barrier, Notify};

use super::controller::StopFlag;
use super::gate::IterationGate;
use super::scenario::{Iteration, RunEnv, Scenario};
use super::schedule::StageSchedule;
use super::stats::RunStats;

/// One-shot broadcast flipping all parked VUs into their loops at once.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

/// What governs a VU's admission to the next iteration.
#[derive(Debug, Clone)]
pub enum VuWork {
    /// Always admitted while the shared gate allows it.
    Constant { gate: Arc<IterationGate> },
    /// Admitted while the ramp target covers this VU's index; parked
    /// otherwise.
    Ramping { schedule: Arc<StageSchedule> },
}

/// Everything one VU task needs, cloned per VU at spawn time.
#[derive(Clone)]
pub struct VuContext {
    /// 1-based; doubles as the activation index for ramped runs.
    pub vu_id: u64,
    pub max_vus: u64,
    pub scenario: Arc<dyn Scenario>,
    pub client: Arc<HttpClient>,
    pub stats: Arc<RunStats>,
    pub env: RunEnv,
    pub work: VuWork,
    pub request_timeout: std::time::Duration,
    pub stop: Arc<StopFlag>,
    pub run_started: Arc<OnceLock<Instant>>,
    pub ready_barrier: Arc<Barrier>,
    pub start_signal: Arc<StartSignal>,
}

/// The virtual-user loop. Waits at the ready barrier so setup stays out of
/// measured time, then iterates until the gate, the schedule, or the stop
/// flag says otherwise. Every per-iteration failure is swallowed into the
/// metrics stream; this function itself cannot fail.
pub async fn run_vu(ctx: VuContext) {
    ctx.ready_barrier.wait().await;
    ctx.start_signal.wait().await;

    let started = ctx
        .run_started
        .get()
        .copied()
        .unwrap_or_else(Instant::now);

    let mut iteration: u64 = 0;

    match &ctx.work {
        VuWork::Constant { gate } => {
            while !ctx.stop.is_stopped() && gate.next() {
                run_one(&ctx, iteration).await;
                iteration += 1;
            }
        }
        VuWork::Ramping { schedule } => {
            while !ctx.stop.is_stopped() {
                let elapsed = started.elapsed();
                if schedule.is_done(elapsed) {
                    break;
                }

                if ctx.vu_id <= schedule.target_at(elapsed) {
                    run_one(&ctx, iteration).await;
                    iteration += 1;
                } else {
                    // Parked: sleep until the ramp could reach this index,
                    // waking early if the run starts draining.
                    let pause = schedule.next_recheck_in(elapsed, ctx.vu_id);
                    tokio::select! {
                        () = tokio::time::sleep(pause) => {}
                        () = ctx.stop.wait() => break,
                    }
                }
            }
        }
    }
}

async fn run_one(ctx: &VuContext, iteration: u64) {
    let iter = Iteration::new(
        ctx.env.clone(),
        ctx.client.clone(),
        ctx.stats.clone(),
        ctx.stop.clone(),
        ctx.request_timeout,
        ctx.vu_id,
        iteration,
    );

    let started = Instant::now();
    if ctx.scenario.run(&iter).await.is_err() {
        ctx.stats.record_scenario_error();
    }
    ctx.stats.record_iteration(started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scenario::{BoxFuture, ScenarioError};
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;
    use url::Url;

    struct AlwaysFails {
        attempts: AtomicU64,
    }

    impl Scenario for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn run<'a>(&'a self, iter: &'a Iteration) -> BoxFuture<'a, Result<(), ScenarioError>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                iter.check("always false", false);
                Ok(())
            })
        }
    }

    fn context(scenario: Arc<dyn Scenario>, work: VuWork) -> VuContext {
        VuContext {
            vu_id: 1,
            max_vus: 1,
            scenario,
            client: Arc::new(HttpClient::default()),
            stats: Arc::new(RunStats::default()),
            env: RunEnv::new(
                Url::parse("http://127.0.0.1:1").unwrap_or_else(|e| panic!("{e}")),
                Arc::from(Vec::new().into_boxed_slice()),
            ),
            work,
            request_timeout: Duration::from_secs(1),
            stop: Arc::new(StopFlag::default()),
            run_started: Arc::new(OnceLock::new()),
            ready_barrier: Arc::new(Barrier::new(1)),
            start_signal: Arc::new(StartSignal::default()),
        }
    }

    #[tokio::test]
    async fn failing_checks_never_kill_the_loop() {
        let scenario = Arc::new(AlwaysFails {
            attempts: AtomicU64::new(0),
        });
        let gate = Arc::new(IterationGate::new(Some(20), None));
        let ctx = context(scenario.clone(), VuWork::Constant { gate });

        ctx.start_signal.start();
        let stats = ctx.stats.clone();
        run_vu(ctx).await;

        assert_eq!(scenario.attempts.load(Ordering::Relaxed), 20);
        assert_eq!(stats.iterations_total(), 20);
        assert_eq!(stats.checks_failed_total(), 20);
    }

    #[tokio::test]
    async fn stop_flag_ends_the_loop_between_iterations() {
        let scenario = Arc::new(AlwaysFails {
            attempts: AtomicU64::new(0),
        });
        let gate = Arc::new(IterationGate::new(None, Some(Duration::from_secs(3600))));
        gate.start_at(Instant::now());
        let ctx = context(scenario, VuWork::Constant { gate });

        ctx.stop.stop();
        ctx.start_signal.start();
        let stats = ctx.stats.clone();
        run_vu(ctx).await;

        assert_eq!(stats.iterations_total(), 0);
    }

    #[tokio::test]
    async fn parked_vu_exits_when_the_schedule_is_done() {
        let scenario = Arc::new(AlwaysFails {
            attempts: AtomicU64::new(0),
        });
        let schedule = Arc::new(StageSchedule::new(vec![crate::engine::plan::Stage {
            target: 0,
            duration: Duration::from_millis(20),
        }]));
        let ctx = context(scenario.clone(), VuWork::Ramping { schedule });

        let _ = ctx.run_started.set(Instant::now());
        ctx.start_signal.start();
        run_vu(ctx).await;

        assert_eq!(scenario.attempts.load(Ordering::Relaxed), 0);
    }
}
