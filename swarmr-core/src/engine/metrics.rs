use ahash::RandomState;
use dashmap::DashMap;
use hdrhistogram::Histogram;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Trend,
    Counter,
    Gauge,
    Rate,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValues,
}

#[derive(Debug, Clone)]
pub enum MetricValues {
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        p50: Option<f64>,
        p75: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        total: u64,
        trues: u64,
        rate: Option<f64>,
    },
}

impl MetricValues {
    fn empty_trend() -> Self {
        Self::Trend {
            count: 0,
            min: None,
            max: None,
            avg: None,
            p50: None,
            p75: None,
            p90: None,
            p95: None,
            p99: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    kind: MetricKind,
    name: Arc<str>,
    tags: Arc<[(Arc<str>, Arc<str>)]>,
}

fn normalize_tags(tags: &[(String, String)]) -> Arc<[(Arc<str>, Arc<str>)]> {
    if tags.is_empty() {
        return Arc::from([]);
    }

    let mut v: Vec<(Arc<str>, Arc<str>)> = tags
        .iter()
        .map(|(k, v)| (Arc::<str>::from(k.as_str()), Arc::<str>::from(v.as_str())))
        .collect();
    v.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Arc::from(v.into_boxed_slice())
}

/// Concurrent registry of metric series keyed by (kind, name, tags).
/// Ingestion never blocks on a registry-wide lock: the map is sharded and
/// each series accumulates via atomics (plus a short per-series histogram
/// lock for trends).
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    series: DashMap<SeriesKey, Arc<Series>, RandomState>,
}

/// Cheap handle to a base (untagged) series; tagged sub-series are resolved
/// through the registry on demand.
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    registry: Arc<MetricsRegistry>,
    base: Arc<Series>,
}

impl SeriesHandle {
    pub fn add(&self, value: f64) {
        self.base.add(value);
    }

    pub fn add_with_tags(&self, value: f64, tags: &[(String, String)]) {
        self.base.add(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.base.kind, &self.base.name, tags)
            .add(value);
    }

    pub fn observe(&self, value: bool) {
        self.base.observe(value);
    }

    pub fn observe_with_tags(&self, value: bool, tags: &[(String, String)]) {
        self.base.observe(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.base.kind, &self.base.name, tags)
            .observe(value);
    }
}

impl MetricsRegistry {
    pub fn handle(self: &Arc<Self>, kind: MetricKind, name: &str) -> SeriesHandle {
        let base = self.series(kind, name, &[]);
        SeriesHandle {
            registry: self.clone(),
            base,
        }
    }

    pub fn series(&self, kind: MetricKind, name: &str, tags: &[(String, String)]) -> Arc<Series> {
        let key = SeriesKey {
            kind,
            name: Arc::from(name),
            tags: normalize_tags(tags),
        };

        if let Some(existing) = self.series.get(&key) {
            return existing.clone();
        }

        self.series
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Series::new(kind, key.name.clone(), key.tags.clone())))
            .clone()
    }

    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out: Vec<MetricSeriesSummary> = self
            .series
            .iter()
            .map(|entry| entry.value().summarize())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

/// Trend accumulator: atomics for count/sum/min/max, hdrhistogram for
/// quantiles. Values are stored scaled x1000 so millisecond inputs keep
/// microsecond resolution.
#[derive(Debug)]
struct TrendAgg {
    count: AtomicU64,
    sum_scaled: AtomicU64,
    min_scaled: AtomicU64,
    max_scaled: AtomicU64,
    hist: Mutex<Histogram<u64>>,
}

const TREND_SCALE: f64 = 1000.0;

impl TrendAgg {
    fn new() -> Self {
        // Up to 60s at 3 significant figures. Out-of-range values saturate
        // (precision degrades, data is never rejected).
        let hist = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3)
            .unwrap_or_else(|err| panic!("failed to init histogram: {err}"));
        Self {
            count: AtomicU64::new(0),
            sum_scaled: AtomicU64::new(0),
            min_scaled: AtomicU64::new(u64::MAX),
            max_scaled: AtomicU64::new(0),
            hist: Mutex::new(hist),
        }
    }

    fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let scaled = (value * TREND_SCALE).round();
        if scaled <= 0.0 {
            return;
        }
        let scaled = scaled as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_scaled.fetch_add(scaled, Ordering::Relaxed);
        atomic_min(&self.min_scaled, scaled);
        atomic_max(&self.max_scaled, scaled);

        let mut h = self.hist.lock().unwrap_or_else(|p| p.into_inner());
        h.saturating_record(scaled);
    }

    fn summarize(&self) -> MetricValues {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return MetricValues::empty_trend();
        }

        let sum = self.sum_scaled.load(Ordering::Relaxed) as f64;
        let min = self.min_scaled.load(Ordering::Relaxed);
        let max = self.max_scaled.load(Ordering::Relaxed);

        let h = self.hist.lock().unwrap_or_else(|p| p.into_inner());
        let q = |quantile: f64| -> Option<f64> {
            if h.is_empty() {
                None
            } else {
                Some(h.value_at_quantile(quantile) as f64 / TREND_SCALE)
            }
        };

        MetricValues::Trend {
            count,
            min: Some(min as f64 / TREND_SCALE),
            max: Some(max as f64 / TREND_SCALE),
            avg: Some(sum / (count as f64) / TREND_SCALE),
            p50: q(0.50),
            p75: q(0.75),
            p90: q(0.90),
            p95: q(0.95),
            p99: q(0.99),
        }
    }
}

fn atomic_min(cell: &AtomicU64, value: u64) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value < cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(v) => cur = v,
        }
    }
}

fn atomic_max(cell: &AtomicU64, value: u64) {
    let mut cur = cell.load(Ordering::Relaxed);
    while value > cur {
        match cell.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(v) => cur = v,
        }
    }
}

/// Lock-free f64 accumulator (bit-cast CAS loop).
#[derive(Debug)]
struct ScalarAgg {
    bits: AtomicU64,
}

impl Default for ScalarAgg {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl ScalarAgg {
    fn add(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        let mut cur = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + v).to_bits();
            match self
                .bits
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    fn set(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        self.bits.store(v.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct RateAgg {
    total: AtomicU64,
    trues: AtomicU64,
}

impl RateAgg {
    fn observe(&self, v: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if v {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn summarize(&self) -> MetricValues {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed);
        let rate = if total == 0 {
            None
        } else {
            Some(trues as f64 / total as f64)
        };
        MetricValues::Rate { total, trues, rate }
    }
}

#[derive(Debug)]
enum Agg {
    Trend(TrendAgg),
    Counter(ScalarAgg),
    Gauge(ScalarAgg),
    Rate(RateAgg),
}

#[derive(Debug)]
pub struct Series {
    kind: MetricKind,
    name: Arc<str>,
    tags: Arc<[(Arc<str>, Arc<str>)]>,
    agg: Agg,
}

impl Series {
    fn new(kind: MetricKind, name: Arc<str>, tags: Arc<[(Arc<str>, Arc<str>)]>) -> Self {
        let agg = match kind {
            MetricKind::Trend => Agg::Trend(TrendAgg::new()),
            MetricKind::Counter => Agg::Counter(ScalarAgg::default()),
            MetricKind::Gauge => Agg::Gauge(ScalarAgg::default()),
            MetricKind::Rate => Agg::Rate(RateAgg::default()),
        };
        Self {
            kind,
            name,
            tags,
            agg,
        }
    }

    pub fn add(&self, value: f64) {
        match &self.agg {
            Agg::Trend(t) => t.record(value),
            Agg::Counter(c) => c.add(value),
            Agg::Gauge(g) => g.set(value),
            // Rate series take booleans; see observe().
            Agg::Rate(_) => {}
        }
    }

    pub fn observe(&self, value: bool) {
        if let Agg::Rate(r) = &self.agg {
            r.observe(value);
        }
    }

    fn summarize(&self) -> MetricSeriesSummary {
        let tags: Vec<(String, String)> = self
            .tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let values = match &self.agg {
            Agg::Trend(t) => t.summarize(),
            Agg::Counter(c) => MetricValues::Counter { value: c.get() },
            Agg::Gauge(g) => MetricValues::Gauge { value: g.get() },
            Agg::Rate(r) => r.summarize(),
        };

        MetricSeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            tags,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_tag_order_is_normalized() {
        let metrics = Arc::new(MetricsRegistry::default());

        let a = metrics.series(
            MetricKind::Counter,
            "m",
            &[
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ],
        );
        let b = metrics.series(
            MetricKind::Counter,
            "m",
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        );

        // Same logical tagset must resolve to the same underlying series.
        assert!(Arc::ptr_eq(&a, &b));

        a.add(1.0);
        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "m" && s.kind == MetricKind::Counter)
            .unwrap_or_else(|| panic!("missing metric summary"));

        assert_eq!(
            s.tags,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn trend_ignores_non_positive_and_non_finite_values() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Trend, "t");

        h.add(f64::NAN);
        h.add(0.0);
        h.add(-1.0);
        h.add(1.0);
        h.add(2.0);

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "t" && s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing trend summary"));

        let MetricValues::Trend {
            count,
            min,
            max,
            avg,
            ..
        } = &s.values
        else {
            panic!("expected trend values");
        };

        assert_eq!(*count, 2);
        assert_eq!(*min, Some(1.0));
        assert_eq!(*max, Some(2.0));
        assert_eq!(*avg, Some(1.5));
    }

    #[test]
    fn rate_records_total_and_trues() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Rate, "r");

        h.observe(true);
        h.observe(false);
        h.observe(true);

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "r" && s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing rate summary"));

        let MetricValues::Rate { total, trues, rate } = &s.values else {
            panic!("expected rate values");
        };

        assert_eq!(*total, 3);
        assert_eq!(*trues, 2);
        assert_eq!(*rate, Some(2.0 / 3.0));
    }

    #[test]
    fn concurrent_counter_adds_are_not_lost() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Counter, "hits");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let h = h.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        h.add(1.0);
                    }
                });
            }
        });

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "hits")
            .unwrap_or_else(|| panic!("missing counter summary"));
        let MetricValues::Counter { value } = &s.values else {
            panic!("expected counter values");
        };
        assert_eq!(*value, 8000.0);
    }

    #[test]
    fn trend_percentiles_track_a_uniform_distribution() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Trend, "latency");

        // 1000 samples uniform over (0, 1000] ms.
        for i in 1..=1000 {
            h.add(i as f64);
        }

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "latency")
            .unwrap_or_else(|| panic!("missing trend summary"));
        let MetricValues::Trend { p95, .. } = &s.values else {
            panic!("expected trend values");
        };

        let p95 = p95.unwrap_or_else(|| panic!("missing p95"));
        // True p95 is 950ms; the sketch must land within +-5%.
        assert!((p95 - 950.0).abs() <= 950.0 * 0.05, "p95={p95}");
    }
}
