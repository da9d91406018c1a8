use std::fmt;

use super::error::Error;
use super::metrics::{MetricSeriesSummary, MetricValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl fmt::Display for ThresholdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
        };
        f.write_str(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u32),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.agg, self.op, self.value)
    }
}

/// A pass/fail condition over one untagged metric series, parsed up front so
/// a bad expression fails plan validation instead of the final report.
#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: String,
    pub expr: ThresholdExpr,
}

impl Threshold {
    pub fn new(metric: impl Into<String>, raw_expr: &str) -> Result<Self, Error> {
        let metric = metric.into();
        let expr = parse_threshold_expr(raw_expr).map_err(|reason| Error::InvalidThreshold {
            metric: metric.clone(),
            reason,
        })?;
        Ok(Self { metric, expr })
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdViolation {
    pub metric: String,
    pub expression: String,
    /// None when the series never received a sample.
    pub observed: Option<f64>,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.observed {
            Some(v) => write!(f, "{}: {} (observed {v:.4})", self.metric, self.expression),
            None => write!(f, "{}: {} (no data)", self.metric, self.expression),
        }
    }
}

/// Percentiles the trend summary exposes. Anything else is rejected at parse
/// time rather than silently evaluating to "no data".
const SUPPORTED_PERCENTILES: [u32; 5] = [50, 75, 90, 95, 99];

/// Grammar: `AGG OP NUMBER` where AGG is `avg|min|max|count|rate|p(N)`,
/// OP is `<|<=|>|>=|==`. Whitespace is insignificant.
pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err("empty expression".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (pos, len, op) = ops
        .iter()
        .find_map(|(tok, op)| compact.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("missing comparison operator in `{raw}`"))?;

    let agg_text = &compact[..pos];
    let value_text = &compact[pos + len..];
    if agg_text.is_empty() || value_text.is_empty() {
        return Err(format!("malformed expression `{raw}`"));
    }

    let agg = match agg_text.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{agg_text}`"))?;
            let p: u32 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !SUPPORTED_PERCENTILES.contains(&p) {
                return Err(format!(
                    "unsupported percentile p({p}); supported: p(50), p(75), p(90), p(95), p(99)"
                ));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = value_text
        .parse()
        .map_err(|_| format!("invalid numeric value `{value_text}`"))?;
    if !value.is_finite() {
        return Err(format!("non-finite value `{value_text}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Evaluate every threshold against the untagged base series. A threshold
/// over a series with no samples fails, surfacing misspelled metric names.
pub fn evaluate_thresholds(
    thresholds: &[Threshold],
    metrics: &[MetricSeriesSummary],
) -> Vec<ThresholdViolation> {
    let mut violations = Vec::new();

    for threshold in thresholds {
        let series = metrics
            .iter()
            .find(|m| m.name == threshold.metric && m.tags.is_empty());

        let observed = series.and_then(|s| observed_value(s, threshold.expr.agg));
        let passed = observed
            .map(|v| compare(v, threshold.expr.op, threshold.expr.value))
            .unwrap_or(false);

        if !passed {
            violations.push(ThresholdViolation {
                metric: threshold.metric.clone(),
                expression: threshold.expr.to_string(),
                observed,
            });
        }
    }

    violations
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(series: &MetricSeriesSummary, agg: ThresholdAgg) -> Option<f64> {
    match (&series.values, agg) {
        (MetricValues::Trend { avg, .. }, ThresholdAgg::Avg) => *avg,
        (MetricValues::Trend { min, .. }, ThresholdAgg::Min) => *min,
        (MetricValues::Trend { max, .. }, ThresholdAgg::Max) => *max,
        (MetricValues::Trend { count, .. }, ThresholdAgg::Count) => Some(*count as f64),
        (
            MetricValues::Trend {
                p50,
                p75,
                p90,
                p95,
                p99,
                ..
            },
            ThresholdAgg::P(p),
        ) => match p {
            50 => *p50,
            75 => *p75,
            90 => *p90,
            95 => *p95,
            99 => *p99,
            _ => None,
        },

        (MetricValues::Counter { value }, ThresholdAgg::Count | ThresholdAgg::Avg) => Some(*value),
        (
            MetricValues::Gauge { value },
            ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max,
        ) => Some(*value),

        (MetricValues::Rate { rate, .. }, ThresholdAgg::Rate) => *rate,
        (MetricValues::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),

        (_, _) => None,
    }
}
