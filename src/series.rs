//! Goal time-series alignment.
//!
//! Each goal category arrives as its own sparse list of samples. Charting
//! needs one shared x-axis, so `align` merges the timestamps of all samples
//! that carry a value into a sorted, deduplicated timeline (windowed to the
//! most recent points) and lays each category out against it with explicit
//! gaps.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::logging::{log, obj, Domain, Level, ProfileScope};
use crate::normalize::NormalizedDocument;

pub const DEFAULT_MAX_POINTS: usize = 50;

/// One goal observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Absent when the raw value was missing or non-numeric.
    pub value: Option<f64>,
    /// Epoch milliseconds. Absent when the raw timestamp did not parse.
    pub ts_ms: Option<i64>,
    pub source: String,
}

impl Sample {
    pub fn new(value: f64, ts_ms: i64, source: impl Into<String>) -> Self {
        Self { value: Some(value).filter(|v| v.is_finite()), ts_ms: Some(ts_ms), source: source.into() }
    }

    pub fn from_raw(value: &Value, ts: &Value, source: impl Into<String>) -> Self {
        Self { value: parse_value(value), ts_ms: parse_timestamp(ts), source: source.into() }
    }
}

/// Samples merged onto a common timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignedSeries {
    /// Strictly increasing epoch milliseconds.
    pub timeline: Vec<i64>,
    /// Same length as `timeline`; `None` is a gap, never zero.
    pub per_category: BTreeMap<String, Vec<Option<f64>>>,
    /// Source label of the sample at each point, for tooltips.
    pub per_category_labels: BTreeMap<String, Vec<Option<String>>>,
}

/// Aligned series plus the all-time maximum sample of each category.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GoalChart {
    pub series: AlignedSeries,
    pub max_by_category: BTreeMap<String, Option<Sample>>,
}

pub fn build_chart(samples: &BTreeMap<String, Vec<Sample>>, max_points: usize) -> GoalChart {
    GoalChart { series: align(samples, max_points), max_by_category: max_by_category(samples) }
}

pub fn align(samples: &BTreeMap<String, Vec<Sample>>, max_points: usize) -> AlignedSeries {
    let _scope = ProfileScope::with_context("series.align", &[("categories", json!(samples.len()))]);

    // only samples with both a value and a timestamp occupy a slot
    let mut dropped = 0usize;
    let mut stamps = BTreeSet::new();
    for s in samples.values().flatten() {
        match plottable(s) {
            Some(ts) => {
                stamps.insert(ts);
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        log(Level::Debug, Domain::Series, "unplottable_samples", obj(&[("dropped", json!(dropped))]));
    }

    let mut timeline: Vec<i64> = stamps.into_iter().collect();
    if timeline.len() > max_points {
        timeline.drain(..timeline.len() - max_points);
    }

    let mut per_category = BTreeMap::new();
    let mut per_category_labels = BTreeMap::new();
    for (category, list) in samples {
        let mut by_ts: HashMap<i64, &Sample> = HashMap::new();
        for s in list {
            if let Some(ts) = plottable(s) {
                by_ts.entry(ts).or_insert(s);
            }
        }
        let values = timeline.iter().map(|t| by_ts.get(t).and_then(|s| s.value)).collect();
        let labels = timeline.iter().map(|t| by_ts.get(t).map(|s| s.source.clone())).collect();
        per_category.insert(category.clone(), values);
        per_category_labels.insert(category.clone(), labels);
    }

    AlignedSeries { timeline, per_category, per_category_labels }
}

fn plottable(s: &Sample) -> Option<i64> {
    s.value.and(s.ts_ms)
}

/// Greatest-value sample per category over the full, unwindowed input.
/// Ties keep the first; samples without a value are skipped.
pub fn max_by_category(samples: &BTreeMap<String, Vec<Sample>>) -> BTreeMap<String, Option<Sample>> {
    samples
        .iter()
        .map(|(category, list)| {
            let mut best: Option<(&Sample, f64)> = None;
            for s in list {
                let Some(v) = s.value else { continue };
                if best.map_or(true, |(_, b)| v.total_cmp(&b).is_gt()) {
                    best = Some((s, v));
                }
            }
            (category.clone(), best.map(|(s, _)| s.clone()))
        })
        .collect()
}

// =============================================================================
// Raw coercion
// =============================================================================

pub fn parse_value(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Epoch milliseconds from a number, numeric string, RFC3339 text, or a
/// naive UTC date/datetime.
pub fn parse_timestamp(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(millis_from_f64)),
        Value::String(s) => parse_timestamp_text(s.trim()),
        _ => None,
    }
}

fn millis_from_f64(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.trunc() as i64)
}

fn parse_timestamp_text(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        return millis_from_f64(f);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

// =============================================================================
// Goal extraction
// =============================================================================

fn first_field<'a>(m: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| m.get(*k).filter(|v| !v.is_null()))
}

/// Collect goal samples for `categories` from normalized experiment records.
/// An empty `categories` accepts every goal.
pub fn samples_from_records(records: &[NormalizedDocument], categories: &[String]) -> BTreeMap<String, Vec<Sample>> {
    let mut out: BTreeMap<String, Vec<Sample>> =
        categories.iter().map(|c| (c.clone(), Vec::new())).collect();

    for record in records {
        let record_ts = record.get("created_at").cloned().unwrap_or(Value::Null);
        let record_source = record.str_field("name").or_else(|| record.str_field("id")).unwrap_or("");
        for goal in record.sequence("goals") {
            let Some(g) = goal.as_object() else { continue };
            let Some(category) = first_field(g, &["goal", "category", "name"]).and_then(Value::as_str) else {
                continue;
            };
            if !categories.is_empty() && !categories.iter().any(|c| c == category) {
                continue;
            }
            let value = g.get("value").unwrap_or(&Value::Null);
            let ts = first_field(g, &["timestamp", "ts", "created_at"]).unwrap_or(&record_ts);
            let source = g.get("source").and_then(Value::as_str).unwrap_or(record_source);
            out.entry(category.to_string()).or_default().push(Sample::from_raw(value, ts, source));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn cats(pairs: Vec<(&str, Vec<Sample>)>) -> BTreeMap<String, Vec<Sample>> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_timeline_sorted_dedup_and_gaps() {
        let input = cats(vec![
            ("open", vec![Sample::new(1.0, 300, "a"), Sample::new(2.0, 100, "b")]),
            ("high", vec![Sample::new(5.0, 100, "c"), Sample::new(6.0, 200, "d")]),
        ]);
        let aligned = align(&input, 50);
        assert_eq!(aligned.timeline, vec![100, 200, 300]);
        assert_eq!(aligned.per_category["open"], vec![Some(2.0), None, Some(1.0)]);
        assert_eq!(aligned.per_category["high"], vec![Some(5.0), Some(6.0), None]);
        assert_eq!(
            aligned.per_category_labels["high"],
            vec![Some("c".to_string()), Some("d".to_string()), None]
        );
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let list: Vec<Sample> = (0..80).map(|i| Sample::new(i as f64, i * 10, "s")).collect();
        let aligned = align(&cats(vec![("open", list)]), 50);
        assert_eq!(aligned.timeline.len(), 50);
        assert_eq!(aligned.timeline[0], 300);
        assert_eq!(*aligned.timeline.last().unwrap(), 790);
        for values in aligned.per_category.values() {
            assert_eq!(values.len(), aligned.timeline.len());
        }
    }

    #[test]
    fn test_invalid_timestamps_dropped() {
        let input = cats(vec![(
            "low",
            vec![
                Sample::from_raw(&json!(1.0), &json!("not a date"), "x"),
                Sample::from_raw(&json!(2.0), &json!("2024-01-01T00:00:00Z"), "y"),
                Sample::from_raw(&json!(3.0), &Value::Null, "z"),
            ],
        )]);
        let aligned = align(&input, 50);
        assert_eq!(aligned.timeline, vec![1_704_067_200_000]);
        assert_eq!(aligned.per_category["low"], vec![Some(2.0)]);
    }

    #[test]
    fn test_duplicate_timestamp_first_wins() {
        let input = cats(vec![("open", vec![Sample::new(1.0, 10, "first"), Sample::new(9.0, 10, "second")])]);
        let aligned = align(&input, 50);
        assert_eq!(aligned.per_category["open"], vec![Some(1.0)]);
        assert_eq!(aligned.per_category_labels["open"], vec![Some("first".to_string())]);
    }

    #[test]
    fn test_valueless_samples_take_no_slot() {
        let input = cats(vec![(
            "open",
            vec![
                Sample::from_raw(&json!("n/a"), &json!(100), "bad"),
                Sample::from_raw(&json!(5.0), &json!(100), "good"),
                Sample::from_raw(&json!(1.0), &json!(10), "old"),
                Sample::from_raw(&Value::Null, &json!(200), "empty"),
            ],
        )]);
        let aligned = align(&input, 2);
        assert_eq!(aligned.timeline, vec![10, 100]);
        assert_eq!(aligned.per_category["open"], vec![Some(1.0), Some(5.0)]);
        assert_eq!(
            aligned.per_category_labels["open"],
            vec![Some("old".to_string()), Some("good".to_string())]
        );
    }

    #[test]
    fn test_max_scans_unwindowed_input() {
        let input = cats(vec![(
            "open",
            vec![Sample::new(1.2, 100, "a"), Sample::new(3.4, 50, "b"), Sample::new(2.0, 10, "c")],
        )]);
        let chart = build_chart(&input, 1);
        assert_eq!(chart.series.timeline, vec![100]);
        let max = chart.max_by_category["open"].clone().unwrap();
        assert_eq!(max.value, Some(3.4));
        assert_eq!(max.ts_ms, Some(50));
    }

    #[test]
    fn test_max_ties_and_absent() {
        let input = cats(vec![
            ("open", vec![Sample::new(2.0, 1, "first"), Sample::new(2.0, 2, "second")]),
            ("high", vec![]),
            (
                "low",
                vec![
                    Sample::from_raw(&Value::Null, &json!(1), "none"),
                    Sample::from_raw(&json!("-4.5"), &json!(2), "neg"),
                ],
            ),
        ]);
        let max = max_by_category(&input);
        assert_eq!(max["open"].as_ref().unwrap().source, "first");
        assert!(max["high"].is_none());
        assert_eq!(max["low"].as_ref().unwrap().value, Some(-4.5));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp(&json!(1000)), Some(1000));
        assert_eq!(parse_timestamp(&json!(1000.9)), Some(1000));
        assert_eq!(parse_timestamp(&json!("1500")), Some(1500));
        assert_eq!(parse_timestamp(&json!("2024-01-01")), Some(1_704_067_200_000));
        assert_eq!(parse_timestamp(&json!("2024-01-01 00:00:01.5")), Some(1_704_067_201_500));
        assert_eq!(parse_timestamp(&json!("2024-01-01T01:00:00+01:00")), Some(1_704_067_200_000));
        assert_eq!(parse_timestamp(&json!("NaN")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&json!("")), None);
    }

    #[test]
    fn test_samples_from_records() {
        let records = vec![
            normalize(&json!({
                "id": "exp-1",
                "name": "momentum-a",
                "created_at": "2024-01-02",
                "goals": "[{\"goal\": \"open\", \"value\": \"1.5\"}, {\"goal\": \"close\", \"value\": 9}]",
            })),
            normalize(&json!({
                "id": "exp-2",
                "goals": [{"category": "open", "value": 2.5, "ts": 5, "source": "manual"}, "junk"],
            })),
        ];
        let wanted = vec!["open".to_string(), "high".to_string()];
        let samples = samples_from_records(&records, &wanted);
        assert_eq!(samples.len(), 2);
        assert!(samples["high"].is_empty());
        let open = &samples["open"];
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].value, Some(1.5));
        assert_eq!(open[0].ts_ms, Some(1_704_153_600_000));
        assert_eq!(open[0].source, "momentum-a");
        assert_eq!(open[1].source, "manual");
        assert_eq!(open[1].ts_ms, Some(5));
    }
}
