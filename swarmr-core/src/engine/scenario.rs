use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use swarmr_http::{
    HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind, estimate_request_bytes,
};
use url::Url;

use super::controller::StopFlag;
use super::sample::{CallOutcome, Sample};
use super::stats::RunStats;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Immutable environment parameters, snapshotted before any VU starts.
pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

/// A scenario iteration failed outside any single call (bad payload
/// construction, missing environment value, ...). Recorded and swallowed;
/// the VU moves on to the next iteration.
#[derive(Debug)]
pub struct ScenarioError {
    message: String,
}

impl ScenarioError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScenarioError {}

impl From<String> for ScenarioError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ScenarioError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Run parameters handed to every iteration: the target base URL plus the
/// merged environment (process env overlaid with explicit settings).
#[derive(Debug, Clone)]
pub struct RunEnv {
    base_url: Url,
    vars: EnvVars,
}

impl RunEnv {
    pub fn new(base_url: Url, vars: EnvVars) -> Self {
        Self { base_url, vars }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn var_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.var(key).unwrap_or(default)
    }

    /// Resolve `path` against the base URL. Invalid joins surface as a
    /// scenario error rather than a panic.
    pub fn url(&self, path: &str) -> Result<String, ScenarioError> {
        self.base_url
            .join(path)
            .map(String::from)
            .map_err(|err| ScenarioError::new(format!("invalid path `{path}`: {err}")))
    }
}

/// One iteration's toolkit: issue tagged HTTP calls, record checks, pace
/// with think-time. Handed to [`Scenario::run`], dropped when the iteration
/// ends.
pub struct Iteration {
    env: RunEnv,
    client: Arc<HttpClient>,
    stats: Arc<RunStats>,
    stop: Arc<StopFlag>,
    request_timeout: Duration,
    vu_id: u64,
    iteration: u64,
}

impl Iteration {
    pub(super) fn new(
        env: RunEnv,
        client: Arc<HttpClient>,
        stats: Arc<RunStats>,
        stop: Arc<StopFlag>,
        request_timeout: Duration,
        vu_id: u64,
        iteration: u64,
    ) -> Self {
        Self {
            env,
            client,
            stats,
            stop,
            request_timeout,
            vu_id,
            iteration,
        }
    }

    pub fn env(&self) -> &RunEnv {
        &self.env
    }

    /// 1-based id of the VU executing this iteration.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration counter local to this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Issue one call and record its sample under `tag`. Network failures
    /// and timeouts are recorded as failed samples and yield `None`; they
    /// never abort the iteration. The tag is the semantic endpoint name,
    /// never the interpolated URL.
    pub async fn http(&self, tag: &str, mut request: HttpRequest) -> Option<HttpResponse> {
        if request.timeout.is_none() {
            request.timeout = Some(self.request_timeout);
        }
        let method = request.method.clone();
        let estimated_sent = estimate_request_bytes(&request).unwrap_or(0);

        let started = Instant::now();
        let result = self.client.request(request).await;
        let latency = started.elapsed();

        let (outcome, bytes_sent, bytes_received, response) = match result {
            Ok(response) => (
                CallOutcome::Status(response.status),
                response.bytes_sent,
                response.bytes_received,
                Some(response),
            ),
            Err(err) => {
                let outcome = match err.transport_error_kind() {
                    HttpTransportErrorKind::Timeout => CallOutcome::Timeout,
                    kind => CallOutcome::Transport(kind),
                };
                (outcome, estimated_sent, 0, None)
            }
        };

        self.stats.record_sample(&Sample {
            tag: Arc::from(tag),
            method,
            outcome,
            latency,
            bytes_sent,
            bytes_received,
        });

        response
    }

    /// Record a named boolean check. Fail-open: the result is returned so
    /// callers may branch, but a `false` never aborts the iteration.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        self.stats.record_check(name, ok);
        ok
    }

    /// Shorthand for the common status-whitelist check. A missing response
    /// (transport failure) fails the check.
    pub fn check_status(&self, name: &str, response: Option<&HttpResponse>, allowed: &[u16]) -> bool {
        self.check(name, status_is_one_of(response, allowed))
    }

    /// Think-time: a scheduled suspension between calls emulating human
    /// pacing. Never counted against the next call's latency.
    pub async fn think(&self, pause: Duration) {
        tokio::time::sleep(pause).await;
    }

    /// True once the run is draining; long scenarios may use this to skip
    /// optional tail calls.
    pub fn stopping(&self) -> bool {
        self.stop.is_stopped()
    }
}

pub fn status_is_one_of(response: Option<&HttpResponse>, allowed: &[u16]) -> bool {
    response.is_some_and(|r| allowed.contains(&r.status))
}

/// A user-supplied workload: one object, invoked repeatedly and
/// independently; iterations share no state through the scenario itself.
pub trait Scenario: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Execute one iteration against the injected toolkit.
    fn run<'a>(&'a self, iter: &'a Iteration) -> BoxFuture<'a, Result<(), ScenarioError>>;
}
