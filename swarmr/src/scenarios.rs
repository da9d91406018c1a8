use std::sync::Arc;
use std::time::Duration;

use swarmr_core::{Iteration, Scenario};

mod checkout;
mod storefront;
mod upload;

pub use checkout::Checkout;
pub use storefront::StorefrontBrowse;
pub use upload::MediaUpload;

/// A built-in scenario plus the plan its source script ran it with.
pub struct ScenarioEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub default_vus: u64,
    pub default_duration: Duration,
    /// `(metric, expression)` pairs; parsed during plan assembly.
    pub default_thresholds: &'static [(&'static str, &'static str)],
    pub build: fn() -> Arc<dyn Scenario>,
}

static CATALOG: &[ScenarioEntry] = &[
    ScenarioEntry {
        name: "storefront-browse",
        description: "Browse the catalog, active shops, and product reviews",
        default_vus: 10,
        default_duration: Duration::from_secs(120),
        default_thresholds: &[
            ("http_req_duration", "p(90)<800"),
            ("http_req_duration", "p(95)<1200"),
            ("http_req_failed", "rate<0.01"),
        ],
        build: || Arc::new(StorefrontBrowse),
    },
    ScenarioEntry {
        name: "checkout",
        description: "Fetch a product and place an order",
        default_vus: 5,
        default_duration: Duration::from_secs(180),
        default_thresholds: &[
            ("http_req_duration", "p(90)<1000"),
            ("http_req_duration", "p(95)<1500"),
            ("http_req_failed", "rate<0.02"),
        ],
        build: || Arc::new(Checkout),
    },
    ScenarioEntry {
        name: "media-upload",
        description: "Upload a small file as multipart form data",
        default_vus: 3,
        default_duration: Duration::from_secs(120),
        default_thresholds: &[
            ("http_req_duration", "p(90)<1500"),
            ("http_req_duration", "p(95)<2000"),
            ("http_req_failed", "rate<0.05"),
        ],
        build: || Arc::new(MediaUpload),
    },
];

pub fn catalog() -> &'static [ScenarioEntry] {
    CATALOG
}

pub fn by_name(name: &str) -> Option<&'static ScenarioEntry> {
    catalog().iter().find(|entry| entry.name == name)
}

pub fn print_catalog() {
    for entry in catalog() {
        println!("{}", entry.name);
        println!("  {}", entry.description);
        println!(
            "  defaults: vus={} duration={}",
            entry.default_vus,
            humantime::format_duration(entry.default_duration)
        );
        for (metric, expr) in entry.default_thresholds {
            println!("  threshold: {metric}:{expr}");
        }
        println!();
    }
}

/// Per-call pacing, overridable so tests can run un-throttled.
fn think_time(iter: &Iteration) -> Duration {
    let ms = iter
        .env()
        .var("THINK_TIME_MS")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1000);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = catalog().iter().map(|e| e.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), catalog().len());
    }

    #[test]
    fn lookup_finds_every_entry() {
        for entry in catalog() {
            assert!(by_name(entry.name).is_some());
        }
        assert!(by_name("no-such-scenario").is_none());
    }

    #[test]
    fn default_thresholds_parse() {
        for entry in catalog() {
            for (metric, expr) in entry.default_thresholds {
                if let Err(err) = swarmr_core::Threshold::new(*metric, expr) {
                    panic!("{}: {err}", entry.name);
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_scenario_runs_clean_against_the_mock_target() {
        let server = swarmr_testserver::TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("testserver: {e}"));
        let base_url =
            url::Url::parse(server.base_url()).unwrap_or_else(|e| panic!("{e}"));

        for entry in catalog() {
            let env: std::collections::HashMap<String, String> = [
                ("THINK_TIME_MS", "0"),
                ("PRODUCT_ID", swarmr_testserver::KNOWN_PRODUCT_ID),
                ("USER_ID", "1"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

            let plan = swarmr_core::RunPlan::new(base_url.clone())
                .with_vus(2)
                .with_duration(Duration::from_secs(30))
                .with_iterations(6)
                .with_env(env);

            let report = swarmr_core::run_plan(plan, (entry.build)(), None)
                .await
                .unwrap_or_else(|e| panic!("{}: {e}", entry.name));

            assert_eq!(report.summary.iterations_total, 6, "{}", entry.name);
            assert_eq!(report.summary.checks_failed, 0, "{}", entry.name);
            assert_eq!(report.summary.scenario_errors_total, 0, "{}", entry.name);
        }

        server.shutdown().await;
    }
}
