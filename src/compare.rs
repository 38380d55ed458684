//! Side-by-side comparison of two experiment runs.
//!
//! Both runs' `params` and `summary` sections are diffed independently, each
//! with its own capped change list.

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::diff::{diff_capped, render, summarize, ChangeEntry, ChangeKind, DiffOptions, DiffSummary};
use crate::logging::{log, log_view_error, obj, v_str, Domain, Level};
use crate::normalize::{normalize, NormalizedDocument};
use crate::source::{ComparisonSide, ExperimentSource};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionDiff {
    pub changes: Vec<ChangeEntry>,
    pub summary: DiffSummary,
}

impl SectionDiff {
    fn compute(a: Option<&NormalizedDocument>, b: Option<&NormalizedDocument>, section: &str, opts: &DiffOptions) -> Self {
        let (changes, truncated) =
            diff_capped(a.and_then(|d| d.mapping(section)), b.and_then(|d| d.mapping(section)), "", opts);
        let summary = summarize(&changes, truncated);
        Self { changes, summary }
    }

    pub fn rows(&self) -> Vec<DiffRow> {
        render_rows(&self.changes)
    }
}

/// A change entry in display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRow {
    pub path: String,
    pub kind: ChangeKind,
    pub before: String,
    pub after: String,
}

pub fn render_rows(changes: &[ChangeEntry]) -> Vec<DiffRow> {
    changes
        .iter()
        .map(|c| DiffRow {
            path: c.path.clone(),
            kind: c.kind,
            before: render(c.before.as_ref()).to_string(),
            after: render(c.after.as_ref()).to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComparisonView {
    pub id_a: String,
    pub id_b: String,
    pub doc_a: Option<NormalizedDocument>,
    pub doc_b: Option<NormalizedDocument>,
    pub params: SectionDiff,
    pub summary: SectionDiff,
    pub error: Option<String>,
    #[serde(skip)]
    opts: DiffOptions,
    #[serde(skip)]
    fingerprint: Option<String>,
}

impl ComparisonView {
    pub fn new(opts: DiffOptions) -> Self {
        Self { opts, ..Default::default() }
    }

    /// Fetch both runs and diff them. On failure the previous documents stay
    /// in place and `error` carries the message.
    pub async fn load<S: ExperimentSource + ?Sized>(&mut self, source: &S, id_a: &str, id_b: &str) {
        self.id_a = id_a.to_string();
        self.id_b = id_b.to_string();
        match source.fetch_comparison(id_a, id_b).await {
            Ok(doc) => {
                self.error = if doc.success {
                    None
                } else {
                    Some(doc.message.clone().unwrap_or_else(|| "comparison unavailable".to_string()))
                };
                if let Some(msg) = &self.error {
                    log_view_error("compare", msg);
                }
                let a = doc.doc_a.as_ref().map(normalize_side);
                let b = doc.doc_b.as_ref().map(normalize_side);
                self.set_documents(a, b);
            }
            Err(err) => {
                let msg = format!("failed to load comparison: {:#}", err);
                log_view_error("compare", &msg);
                self.error = Some(msg);
            }
        }
    }

    /// Replace the documents; recomputes only when their content changed.
    /// Returns whether the diffs were recomputed.
    pub fn set_documents(&mut self, a: Option<NormalizedDocument>, b: Option<NormalizedDocument>) -> bool {
        let fp = fingerprint(a.as_ref(), b.as_ref());
        self.doc_a = a;
        self.doc_b = b;
        if self.fingerprint.as_deref() == Some(fp.as_str()) {
            return false;
        }
        self.params = SectionDiff::compute(self.doc_a.as_ref(), self.doc_b.as_ref(), "params", &self.opts);
        self.summary = SectionDiff::compute(self.doc_a.as_ref(), self.doc_b.as_ref(), "summary", &self.opts);
        self.fingerprint = Some(fp);
        log(
            Level::Info,
            Domain::View,
            "comparison_computed",
            obj(&[
                ("a", v_str(&self.id_a)),
                ("b", v_str(&self.id_b)),
                ("params_changes", json!(self.params.summary.total)),
                ("summary_changes", json!(self.summary.summary.total)),
            ]),
        );
        true
    }
}

pub fn normalize_side(side: &ComparisonSide) -> NormalizedDocument {
    normalize(&json!({"params": side.params, "summary": side.summary}))
}

fn fingerprint(a: Option<&NormalizedDocument>, b: Option<&NormalizedDocument>) -> String {
    let side = |d: Option<&NormalizedDocument>| d.map(NormalizedDocument::to_value).unwrap_or(Value::Null);
    let mut hasher = Sha256::new();
    hasher.update(json!([side(a), side(b)]).to_string().as_bytes());
    hex::encode(hasher.finalize())
}
