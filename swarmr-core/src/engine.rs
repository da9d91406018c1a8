mod controller;
mod error;
mod gate;
mod metrics;
mod plan;
mod progress;
mod run;
mod sample;
mod scenario;
mod schedule;
mod stats;
mod thresholds;
mod vu;

pub use controller::{LoadController, RunPhase, StopFlag};
pub use error::{Error, Result};
pub use gate::IterationGate;
pub use metrics::{MetricKind, MetricSeriesSummary, MetricValues, MetricsRegistry, SeriesHandle};
pub use plan::{LoadShape, RunPlan, Stage};
pub use progress::{LiveMetrics, ProgressFn, ProgressUpdate};
pub use run::{RunReport, process_env_snapshot, run_plan};
pub use sample::{CallOutcome, Sample};
pub use scenario::{
    BoxFuture, EnvVars, Iteration, RunEnv, Scenario, ScenarioError, status_is_one_of,
};
pub use schedule::{StageSchedule, StageSnapshot};
pub use stats::{CheckSummary, EndpointSummary, LatencySummary, RunStats, RunSummary};
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdViolation, evaluate_thresholds,
    parse_threshold_expr,
};
pub use vu::{VuContext, VuWork, run_vu};
