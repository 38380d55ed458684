//! Experiment manager: goal values across runs, charted over time.

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::logging::{log, log_view_error, obj, Domain, Level};
use crate::normalize::{normalize, NormalizedDocument};
use crate::series::{build_chart, samples_from_records, GoalChart};
use crate::source::{ExperimentSource, GoalFilters};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerView {
    pub filters: GoalFilters,
    pub records: Vec<NormalizedDocument>,
    pub chart: GoalChart,
    pub error: Option<String>,
    #[serde(skip)]
    categories: Vec<String>,
    #[serde(skip)]
    max_points: usize,
}

impl ManagerView {
    pub fn new(cfg: &Config) -> Self {
        Self {
            categories: cfg.chart_categories().to_vec(),
            max_points: cfg.chart_max_points,
            ..Default::default()
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Fetch goal records for `filters` and rebuild the chart. On failure
    /// the previous records and chart stay on screen.
    pub async fn load<S: ExperimentSource + ?Sized>(&mut self, source: &S, filters: GoalFilters) {
        match source.fetch_goal_records(&filters).await {
            Ok(raw) => {
                self.filters = filters;
                self.error = None;
                self.set_records(&raw);
            }
            Err(err) => {
                let msg = format!("failed to load goals: {:#}", err);
                log_view_error("manager", &msg);
                self.error = Some(msg);
            }
        }
    }

    pub fn set_records(&mut self, raw: &[Value]) {
        self.records = raw.iter().map(normalize).collect();
        let samples = samples_from_records(&self.records, &self.categories);
        self.chart = build_chart(&samples, self.max_points);
        log(
            Level::Info,
            Domain::View,
            "goal_chart_built",
            obj(&[
                ("records", json!(self.records.len())),
                ("points", json!(self.chart.series.timeline.len())),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_from_raw_records() {
        let cfg = Config { chart_max_points: 2, ..Default::default() };
        let mut view = ManagerView::new(&cfg);
        view.set_records(&[
            json!({"id": "a", "goals": [{"goal": "open", "value": 9.0, "timestamp": 1}]}),
            json!({"id": "b", "goals": "[{\"goal\": \"open\", \"value\": 1.0, \"timestamp\": 2}]"}),
            json!({"id": "c", "goals": [{"goal": "high", "value": 3.0, "timestamp": 3}]}),
        ]);
        assert_eq!(view.chart.series.timeline, vec![2, 3]);
        assert_eq!(view.chart.series.per_category["open"], vec![Some(1.0), None]);
        assert_eq!(view.chart.series.per_category["low"], vec![None, None]);
        assert_eq!(view.chart.max_by_category["open"].as_ref().unwrap().value, Some(9.0));
        assert!(view.chart.max_by_category["low"].is_none());
    }
}
