//! Backend access for the review views.
//!
//! `ExperimentSource` is the seam between the views and wherever experiment
//! records live. `HttpSource` talks to the results API; `FixtureSource` serves
//! a JSON file for offline review and tests.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
}

// Ids arrive as either numbers or strings.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}

/// One side of a comparison, still raw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSide {
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub summary: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonDocument {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "docA")]
    pub doc_a: Option<ComparisonSide>,
    #[serde(default, alias = "docB")]
    pub doc_b: Option<ComparisonSide>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalFilters {
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}

impl GoalFilters {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(s) = &self.strategy {
            q.push(("strategy", s.clone()));
        }
        if let Some(s) = &self.symbol {
            q.push(("symbol", s.clone()));
        }
        if let Some(n) = self.limit {
            q.push(("limit", n.to_string()));
        }
        q
    }

    fn matches(&self, record: &Value) -> bool {
        let field_eq = |key: &str, want: &Option<String>| match want {
            Some(w) => record.get(key).and_then(Value::as_str) == Some(w.as_str()),
            None => true,
        };
        field_eq("strategy", &self.strategy) && field_eq("symbol", &self.symbol)
    }
}

#[async_trait]
pub trait ExperimentSource: Send + Sync {
    /// Ranked experiments matching `query`. `page` is 1-based.
    async fn fetch_candidates(&self, query: &str, limit: usize, page: usize, exclude: &[String]) -> Result<Vec<Candidate>>;
    async fn fetch_comparison(&self, id_a: &str, id_b: &str) -> Result<ComparisonDocument>;
    /// Raw experiment records carrying goal samples.
    async fn fetch_goal_records(&self, filters: &GoalFilters) -> Result<Vec<Value>>;
}

/// Accept a bare array or an envelope such as `{"items": [...]}`.
fn unwrap_list(v: Value) -> Result<Vec<Value>> {
    match v {
        Value::Array(items) => Ok(items),
        Value::Object(mut m) => {
            for key in ["items", "results", "experiments", "data"] {
                if let Some(Value::Array(items)) = m.remove(key) {
                    return Ok(items);
                }
            }
            Err(anyhow!("response has no list field"))
        }
        other => Err(anyhow!("expected list, got {}", other)),
    }
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpSource {
    client: Client,
    base: Url,
}

impl HttpSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut base = Url::parse(&cfg.api_base).with_context(|| format!("bad api base {}", cfg.api_base))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
        Ok(Self { client, base })
    }

    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base.join(path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let _scope = ProfileScope::with_context("source.http", &[("path", v_str(url.path()))]);
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {} failed", url.path()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", url.path(), status, body.trim());
        }
        resp.json::<T>().await.with_context(|| format!("decoding {}", url.path()))
    }
}

#[async_trait]
impl ExperimentSource for HttpSource {
    async fn fetch_candidates(&self, query: &str, limit: usize, page: usize, exclude: &[String]) -> Result<Vec<Candidate>> {
        let mut params = vec![("q", query.to_string()), ("limit", limit.to_string()), ("page", page.to_string())];
        if !exclude.is_empty() {
            params.push(("exclude", exclude.join(",")));
        }
        let url = self.endpoint("api/experiments/search", &params)?;
        let raw: Value = self.get_json(url).await?;
        unwrap_list(raw)?
            .into_iter()
            .map(|v| Ok(serde_json::from_value::<Candidate>(v)?))
            .collect()
    }

    async fn fetch_comparison(&self, id_a: &str, id_b: &str) -> Result<ComparisonDocument> {
        let url = self.endpoint("api/experiments/compare", &[("a", id_a.to_string()), ("b", id_b.to_string())])?;
        self.get_json(url).await
    }

    async fn fetch_goal_records(&self, filters: &GoalFilters) -> Result<Vec<Value>> {
        let url = self.endpoint("api/goals", &filters.to_query())?;
        let raw: Value = self.get_json(url).await?;
        unwrap_list(raw)
    }
}

// =============================================================================
// Fixture file
// =============================================================================

/// Serves experiments from a JSON document `{"experiments": [...]}` (or a
/// bare array).
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    experiments: Vec<Value>,
}

impl FixtureSource {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let raw: Value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let experiments = unwrap_list(raw)?;
        log(
            Level::Info,
            Domain::Source,
            "fixture_loaded",
            obj(&[("path", v_str(&path.to_string_lossy())), ("count", json!(experiments.len()))]),
        );
        Ok(Self { experiments })
    }

    pub fn from_values(experiments: Vec<Value>) -> Self {
        Self { experiments }
    }

    fn find(&self, id: &str) -> Option<&Value> {
        self.experiments.iter().find(|e| record_id(e).as_deref() == Some(id))
    }
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn side_of(record: &Value) -> ComparisonSide {
    ComparisonSide {
        params: record.get("params").cloned().unwrap_or(Value::Null),
        summary: record.get("summary").cloned().unwrap_or(Value::Null),
    }
}

#[async_trait]
impl ExperimentSource for FixtureSource {
    async fn fetch_candidates(&self, query: &str, limit: usize, page: usize, exclude: &[String]) -> Result<Vec<Candidate>> {
        let needle = query.to_lowercase();
        let hits = self.experiments.iter().filter(|e| {
            let id = record_id(e).unwrap_or_default();
            let name = e.get("name").and_then(Value::as_str).unwrap_or("");
            !exclude.contains(&id)
                && (id.to_lowercase().contains(&needle) || name.to_lowercase().contains(&needle))
        });
        Ok(hits
            .skip(page.saturating_sub(1) * limit)
            .take(limit)
            .filter_map(|e| serde_json::from_value(e.clone()).ok())
            .collect())
    }

    async fn fetch_comparison(&self, id_a: &str, id_b: &str) -> Result<ComparisonDocument> {
        let a = self.find(id_a);
        let b = self.find(id_b);
        let missing: Vec<&str> = [(id_a, a.is_none()), (id_b, b.is_none())]
            .into_iter()
            .filter(|(_, gone)| *gone)
            .map(|(id, _)| id)
            .collect();
        Ok(ComparisonDocument {
            success: missing.is_empty(),
            doc_a: a.map(side_of),
            doc_b: b.map(side_of),
            message: (!missing.is_empty()).then(|| format!("experiment not found: {}", missing.join(", "))),
        })
    }

    async fn fetch_goal_records(&self, filters: &GoalFilters) -> Result<Vec<Value>> {
        let matched = self.experiments.iter().filter(|e| filters.matches(e)).cloned();
        Ok(match filters.limit {
            Some(n) => matched.take(n).collect(),
            None => matched.collect(),
        })
    }
}
