use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use swarmr_http::HttpClient;
use tokio::sync::Barrier;
use tokio::time::MissedTickBehavior;
use url::Url;

use super::controller::LoadController;
use super::error::{Error, Result};
use super::gate::IterationGate;
use super::plan::{LoadShape, RunPlan};
use super::progress::{LiveMetrics, ProgressFn, ProgressUpdate};
use super::scenario::{EnvVars, RunEnv, Scenario};
use super::schedule::StageSchedule;
use super::stats::{RunStats, RunSummary};
use super::thresholds::{ThresholdViolation, evaluate_thresholds};
use super::vu::{StartSignal, VuContext, VuWork, run_vu};

/// Final outcome of a run: the metrics summary plus the threshold verdict.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Thresholds out of bounds at final evaluation. Empty means the run
    /// passed.
    pub violations: Vec<ThresholdViolation>,
    /// True when abort-on-breach cut the run short of its planned window.
    pub aborted_on_breach: bool,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Snapshot the process environment once, before any VU starts. Scenarios
/// only ever see this immutable copy.
pub fn process_env_snapshot() -> EnvVars {
    let vars: Vec<(Arc<str>, Arc<str>)> = std::env::vars()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();
    Arc::from(vars.into_boxed_slice())
}

/// Execute `plan` against `scenario`. Validates the plan, spawns the VU
/// pool behind a ready barrier, drives phases and periodic threshold
/// evaluation from a ticker, then produces the final report. Only
/// configuration and startup problems surface as `Err`; everything that
/// happens after the start signal lands in the metrics stream instead.
pub async fn run_plan(
    plan: RunPlan,
    scenario: Arc<dyn Scenario>,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    plan.validate()?;
    preflight(&plan.base_url).await?;

    let client = Arc::new(HttpClient::default());
    let stats = Arc::new(RunStats::default());

    let env_vars: Vec<(Arc<str>, Arc<str>)> = plan
        .env
        .iter()
        .map(|(k, v)| (Arc::<str>::from(k.as_str()), Arc::<str>::from(v.as_str())))
        .collect();
    let env = RunEnv::new(plan.base_url.clone(), Arc::from(env_vars.into_boxed_slice()));

    let shape = plan.shape();
    let total_duration = shape.total_duration();
    let max_vus = shape.max_vus();

    let (work, controller) = match &shape {
        LoadShape::Constant { duration, .. } => {
            let gate = Arc::new(IterationGate::new(plan.iterations, Some(*duration)));
            (
                VuWork::Constant { gate },
                Arc::new(LoadController::constant(*duration)),
            )
        }
        LoadShape::Staged { stages } => {
            let schedule = Arc::new(StageSchedule::new(stages.clone()));
            (
                VuWork::Ramping {
                    schedule: schedule.clone(),
                },
                Arc::new(LoadController::staged(StageSchedule::new(stages.clone()))),
            )
        }
    };
    let stop = controller.stop_flag();

    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());
    let ready_barrier = Arc::new(Barrier::new((max_vus as usize).saturating_add(1)));
    let start_signal = Arc::new(StartSignal::default());

    let mut handles = Vec::with_capacity(max_vus as usize);
    for vu_id in 1..=max_vus {
        let ctx = VuContext {
            vu_id,
            max_vus,
            scenario: scenario.clone(),
            client: client.clone(),
            stats: stats.clone(),
            env: env.clone(),
            work: work.clone(),
            request_timeout: plan.request_timeout,
            stop: stop.clone(),
            run_started: run_started.clone(),
            ready_barrier: ready_barrier.clone(),
            start_signal: start_signal.clone(),
        };
        handles.push(tokio::spawn(run_vu(ctx)));
    }

    // All VUs are parked at the barrier; setup stays out of measured time.
    ready_barrier.wait().await;

    let started = Instant::now();
    let _ = run_started.set(started);
    if let VuWork::Constant { gate } = &work {
        gate.start_at(started);
    }
    controller.advance(Duration::ZERO);
    start_signal.start();

    let aborted = Arc::new(AtomicBool::new(false));
    let ticker = {
        let stats = stats.clone();
        let controller = controller.clone();
        let thresholds = plan.thresholds.clone();
        let abort_on_breach = plan.abort_on_breach;
        let aborted = aborted.clone();
        let schedule = match &work {
            VuWork::Ramping { schedule } => Some(schedule.clone()),
            VuWork::Constant { .. } => None,
        };
        let constant_vus = plan.vus;
        let progress = progress.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the immediate first tick so every interval is ~1s.
            interval.tick().await;

            let mut tick: u64 = 0;
            let mut last_at = Instant::now();
            let mut last_requests: u64 = 0;
            let mut last_failed: u64 = 0;
            let mut last_iterations: u64 = 0;
            let mut last_bytes_received: u64 = 0;
            let mut last_bytes_sent: u64 = 0;

            loop {
                interval.tick().await;
                tick = tick.saturating_add(1);

                let now = Instant::now();
                let dt = now.duration_since(last_at).as_secs_f64().max(1e-9);
                last_at = now;
                let elapsed = started.elapsed();

                let phase = controller.advance(elapsed);

                let requests_total = stats.requests_total();
                let delta_requests = requests_total.saturating_sub(last_requests);
                last_requests = requests_total;
                let rps_now = delta_requests as f64 / dt;
                stats.record_rps_sample(rps_now);

                let failed_total = stats.failed_requests_total();
                let delta_failed = failed_total.saturating_sub(last_failed);
                last_failed = failed_total;

                let iterations_total = stats.iterations_total();
                let delta_iterations = iterations_total.saturating_sub(last_iterations);
                last_iterations = iterations_total;

                let bytes_received_total = stats.bytes_received_total();
                let delta_received = bytes_received_total.saturating_sub(last_bytes_received);
                last_bytes_received = bytes_received_total;

                let bytes_sent_total = stats.bytes_sent_total();
                let delta_sent = bytes_sent_total.saturating_sub(last_bytes_sent);
                last_bytes_sent = bytes_sent_total;

                let violations = if thresholds.is_empty() {
                    Vec::new()
                } else {
                    evaluate_thresholds(&thresholds, &stats.metrics_snapshot())
                };
                if abort_on_breach && !violations.is_empty() {
                    aborted.store(true, Ordering::Release);
                    controller.drain();
                }

                if let Some(progress) = &progress {
                    let (p50, p90, p95, p99) = stats.take_latency_window_ms();
                    let (req_per_sec_avg, _, req_per_sec_max, _) = stats.req_per_sec_summary();

                    let metrics = LiveMetrics {
                        rps_now,
                        bytes_received_per_sec_now: (delta_received as f64 / dt).round() as u64,
                        bytes_sent_per_sec_now: (delta_sent as f64 / dt).round() as u64,
                        requests_total,
                        failed_requests_total: failed_total,
                        checks_failed_total: stats.checks_failed_total(),
                        iterations_total,
                        bytes_received_total,
                        bytes_sent_total,
                        iterations_per_sec_now: delta_iterations as f64 / dt,
                        error_rate_now: if delta_requests == 0 {
                            0.0
                        } else {
                            delta_failed as f64 / delta_requests as f64
                        },
                        req_per_sec_avg,
                        req_per_sec_max,
                        latency_p50_ms_now: p50,
                        latency_p90_ms_now: p90,
                        latency_p95_ms_now: p95,
                        latency_p99_ms_now: p99,
                    };

                    (progress)(ProgressUpdate {
                        tick,
                        elapsed,
                        total_duration,
                        phase,
                        vus_target: match &schedule {
                            Some(schedule) => schedule.target_at(elapsed),
                            None => controller.target_at(elapsed, constant_vus),
                        },
                        max_vus,
                        stage: schedule.as_ref().and_then(|s| s.snapshot_at(elapsed)),
                        metrics,
                        violations,
                    });
                }
            }
        })
    };

    // VUs stop themselves off the gate/schedule/stop-flag; the deadline only
    // bounds the drain of in-flight iterations.
    let drain_deadline =
        tokio::time::Instant::from_std(started + total_duration + plan.drain_timeout);
    for mut handle in handles {
        match tokio::time::timeout_at(drain_deadline, &mut handle).await {
            Ok(join) => join?,
            Err(_) => {
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    ticker.abort();
    let _ = ticker.await;
    controller.complete();

    let violations = evaluate_thresholds(&plan.thresholds, &stats.metrics_snapshot());
    let summary = stats.summarize(started.elapsed());

    Ok(RunReport {
        summary,
        violations,
        aborted_on_breach: aborted.load(Ordering::Acquire),
    })
}

/// Fail fast on an unreachable target: one TCP connect before any VU is
/// spawned. DNS and refused connections surface here instead of as a wall
/// of failed samples.
async fn preflight(base_url: &Url) -> Result<()> {
    let host = base_url
        .host_str()
        .ok_or_else(|| Error::InvalidBaseUrl(format!("missing host in {base_url}")))?;
    let port = base_url.port_or_known_default().unwrap_or(80);
    let addr = format!("{host}:{port}");

    match tokio::time::timeout(
        Duration::from_secs(5),
        tokio::net::TcpStream::connect(&addr),
    )
    .await
    {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(Error::BaseUrlUnreachable {
            url: base_url.to_string(),
            reason: err.to_string(),
        }),
        Err(_) => Err(Error::BaseUrlUnreachable {
            url: base_url.to_string(),
            reason: "connect timed out".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::engine::scenario::{BoxFuture, Iteration, ScenarioError};
    use crate::engine::thresholds::Threshold;

    struct Counting {
        iterations: AtomicU64,
        pause: Duration,
    }

    impl Counting {
        fn new(pause: Duration) -> Arc<Self> {
            Arc::new(Self {
                iterations: AtomicU64::new(0),
                pause,
            })
        }
    }

    impl Scenario for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn run<'a>(
            &'a self,
            _iter: &'a Iteration,
        ) -> BoxFuture<'a, std::result::Result<(), ScenarioError>> {
            Box::pin(async move {
                self.iterations.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.pause).await;
                Ok(())
            })
        }
    }

    fn plan_for(base_url: &str) -> RunPlan {
        RunPlan::new(Url::parse(base_url).unwrap_or_else(|e| panic!("{e}")))
    }

    fn local_base_url() -> String {
        // A bound-then-dropped listener yields a port that refuses connects;
        // good enough for preflight without touching the network.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap_or_else(|e| panic!("bind: {e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));
        drop(listener);
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn invalid_plan_is_rejected_before_preflight() {
        let plan = plan_for("http://127.0.0.1:1").with_vus(0);
        let result = run_plan(plan, Counting::new(Duration::ZERO), None).await;
        assert!(matches!(result, Err(Error::InvalidVus)));
    }

    #[tokio::test]
    async fn unreachable_target_fails_fast() {
        let plan = plan_for(&local_base_url()).with_vus(2);
        let result = run_plan(plan, Counting::new(Duration::ZERO), None).await;
        assert!(matches!(result, Err(Error::BaseUrlUnreachable { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn iteration_budget_is_shared_and_exact() {
        let server = swarmr_testserver::TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("testserver: {e}"));

        let scenario = Counting::new(Duration::from_millis(1));
        let plan = plan_for(server.base_url())
            .with_vus(4)
            .with_duration(Duration::from_secs(30))
            .with_iterations(25);

        let report = run_plan(plan, scenario.clone(), None)
            .await
            .unwrap_or_else(|e| panic!("run: {e}"));

        assert_eq!(scenario.iterations.load(Ordering::Relaxed), 25);
        assert_eq!(report.summary.iterations_total, 25);
        assert!(report.passed());

        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abort_on_breach_ends_the_run_early() {
        let server = swarmr_testserver::TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("testserver: {e}"));

        // http_reqs stays at zero (the scenario never calls out), so
        // count<0 is breached at the first evaluation tick.
        let threshold =
            Threshold::new("http_reqs", "count<0").unwrap_or_else(|e| panic!("{e}"));
        let plan = plan_for(server.base_url())
            .with_vus(2)
            .with_duration(Duration::from_secs(60))
            .with_thresholds(vec![threshold])
            .with_abort_on_breach(true);

        let started = Instant::now();
        let report = run_plan(plan, Counting::new(Duration::from_millis(10)), None)
            .await
            .unwrap_or_else(|e| panic!("run: {e}"));

        assert!(report.aborted_on_breach);
        assert!(!report.passed());
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "run did not stop early: {:?}",
            started.elapsed()
        );

        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn report_only_breach_lets_the_run_finish() {
        let server = swarmr_testserver::TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("testserver: {e}"));

        let threshold =
            Threshold::new("http_reqs", "count<0").unwrap_or_else(|e| panic!("{e}"));
        let scenario = Counting::new(Duration::from_millis(5));
        let plan = plan_for(server.base_url())
            .with_vus(2)
            .with_duration(Duration::from_secs(2))
            .with_thresholds(vec![threshold]);

        let report = run_plan(plan, scenario.clone(), None)
            .await
            .unwrap_or_else(|e| panic!("run: {e}"));

        assert!(!report.aborted_on_breach);
        assert_eq!(report.violations.len(), 1);
        assert!(scenario.iterations.load(Ordering::Relaxed) > 0);

        server.shutdown().await;
    }
}