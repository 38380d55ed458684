/// Maximum number of goal categories plotted on one chart.
pub const MAX_CHART_CATEGORIES: usize = 3;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    pub fixture_path: Option<String>,
    pub timeout_ms: u64,
    pub diff_max_items: usize,
    pub diff_max_depth: usize,
    pub chart_max_points: usize,
    pub suggest_limit: usize,
    pub goal_categories: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".to_string(),
            fixture_path: None,
            timeout_ms: 10_000,
            diff_max_items: 300,
            diff_max_depth: 32,
            chart_max_points: 50,
            suggest_limit: 10,
            goal_categories: vec!["open".to_string(), "high".to_string(), "low".to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_base: std::env::var("RUNLENS_API_BASE").unwrap_or(d.api_base),
            fixture_path: std::env::var("RUNLENS_FIXTURE").ok().filter(|p| !p.trim().is_empty()),
            timeout_ms: std::env::var("RUNLENS_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.timeout_ms),
            diff_max_items: std::env::var("RUNLENS_DIFF_MAX_ITEMS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.diff_max_items),
            diff_max_depth: std::env::var("RUNLENS_DIFF_MAX_DEPTH").ok().and_then(|v| v.parse().ok()).unwrap_or(d.diff_max_depth),
            chart_max_points: std::env::var("RUNLENS_CHART_MAX_POINTS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.chart_max_points),
            suggest_limit: std::env::var("RUNLENS_SUGGEST_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.suggest_limit),
            goal_categories: std::env::var("RUNLENS_GOAL_CATEGORIES")
                .ok()
                .map(|v| parse_categories(&v))
                .filter(|c| !c.is_empty())
                .unwrap_or(d.goal_categories),
        }
    }

    /// Categories actually plotted, capped at [`MAX_CHART_CATEGORIES`].
    pub fn chart_categories(&self) -> &[String] {
        let n = self.goal_categories.len().min(MAX_CHART_CATEGORIES);
        &self.goal_categories[..n]
    }
}

fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.diff_max_items, 300);
        assert_eq!(cfg.chart_max_points, 50);
        assert_eq!(cfg.chart_categories().len(), 3);
    }

    #[test]
    fn test_chart_categories_capped() {
        let cfg = Config {
            goal_categories: parse_categories("a, b,,c,d"),
            ..Default::default()
        };
        assert_eq!(cfg.goal_categories.len(), 4);
        assert_eq!(cfg.chart_categories(), &["a", "b", "c"]);
    }
}
