use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use super::error::{Error, Result};
use super::thresholds::Threshold;

/// One leg of a staged ramp: linearly move the active-VU target to `target`
/// over `duration`, starting from wherever the previous stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub target: u64,
    pub duration: Duration,
}

/// How concurrency evolves over the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadShape {
    /// Flat: `vus` virtual users for the whole window.
    Constant { vus: u64, duration: Duration },
    /// Piecewise-linear ramp starting from zero active VUs.
    Staged { stages: Vec<Stage> },
}

impl LoadShape {
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Staged { stages } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }

    /// Number of VU slots to allocate up front.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::Constant { vus, .. } => *vus,
            Self::Staged { stages } => stages.iter().map(|s| s.target).max().unwrap_or(0),
        }
    }
}

/// Everything a run needs, validated once before any VU starts. Immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub base_url: Url,
    pub vus: u64,
    pub duration: Duration,
    /// Total iteration budget shared by all VUs; `None` means time-bounded.
    pub iterations: Option<u64>,
    pub stages: Vec<Stage>,
    pub env: HashMap<String, String>,
    pub request_timeout: Duration,
    pub thresholds: Vec<Threshold>,
    /// When true a breached threshold stops the run early; default is to
    /// keep going and only fail the exit status.
    pub abort_on_breach: bool,
    /// How long to wait for in-flight iterations after the stop signal.
    pub drain_timeout: Duration,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl RunPlan {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            vus: 1,
            duration: Duration::from_secs(60),
            iterations: None,
            stages: Vec::new(),
            env: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            thresholds: Vec::new(),
            abort_on_breach: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_vus(mut self, vus: u64) -> Self {
        self.vus = vus;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_abort_on_breach(mut self, abort: bool) -> Self {
        self.abort_on_breach = abort;
        self
    }

    pub fn shape(&self) -> LoadShape {
        if self.stages.is_empty() {
            LoadShape::Constant {
                vus: self.vus,
                duration: self.duration,
            }
        } else {
            LoadShape::Staged {
                stages: self.stages.clone(),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidBaseUrl(format!(
                    "unsupported scheme `{other}` in {}",
                    self.base_url
                )));
            }
        }
        if self.base_url.host_str().is_none() {
            return Err(Error::InvalidBaseUrl(format!(
                "missing host in {}",
                self.base_url
            )));
        }

        if self.stages.is_empty() {
            if self.vus == 0 {
                return Err(Error::InvalidVus);
            }
            if self.iterations == Some(0) {
                return Err(Error::InvalidIterations);
            }
        } else {
            if self.iterations.is_some() {
                return Err(Error::IterationsWithStages);
            }
            let shape = self.shape();
            if shape.total_duration().is_zero() || shape.max_vus() == 0 {
                return Err(Error::InvalidStages);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("http://127.0.0.1:8080").unwrap_or_else(|e| panic!("{e}"))
    }

    fn staged(stages: Vec<Stage>) -> RunPlan {
        RunPlan::new(base_url()).with_stages(stages)
    }

    #[test]
    fn constant_plan_validates() {
        let plan = RunPlan::new(base_url())
            .with_vus(10)
            .with_duration(Duration::from_secs(120));
        assert!(plan.validate().is_ok());
        assert_eq!(
            plan.shape(),
            LoadShape::Constant {
                vus: 10,
                duration: Duration::from_secs(120),
            }
        );
    }

    #[test]
    fn zero_vus_is_rejected() {
        let plan = RunPlan::new(base_url()).with_vus(0);
        assert!(matches!(plan.validate(), Err(Error::InvalidVus)));
    }

    #[test]
    fn iterations_cannot_be_combined_with_stages() {
        let plan = staged(vec![Stage {
            target: 5,
            duration: Duration::from_secs(30),
        }])
        .with_iterations(100);
        assert!(matches!(plan.validate(), Err(Error::IterationsWithStages)));
    }

    #[test]
    fn all_zero_stages_are_rejected() {
        let plan = staged(vec![Stage {
            target: 0,
            duration: Duration::from_secs(30),
        }]);
        assert!(matches!(plan.validate(), Err(Error::InvalidStages)));

        let plan = staged(vec![Stage {
            target: 5,
            duration: Duration::ZERO,
        }]);
        assert!(matches!(plan.validate(), Err(Error::InvalidStages)));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let plan = RunPlan::new(Url::parse("ftp://example.com").unwrap_or_else(|e| panic!("{e}")));
        assert!(matches!(plan.validate(), Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn staged_shape_reports_peak_and_total() {
        let shape = staged(vec![
            Stage {
                target: 10,
                duration: Duration::from_secs(30),
            },
            Stage {
                target: 50,
                duration: Duration::from_secs(60),
            },
            Stage {
                target: 0,
                duration: Duration::from_secs(30),
            },
        ])
        .shape();

        assert_eq!(shape.max_vus(), 50);
        assert_eq!(shape.total_duration(), Duration::from_secs(120));
    }
}
