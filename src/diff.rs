//! Structural diff between two result documents.
//!
//! The diff walks the union of keys of both mappings and emits a flat list of
//! path-addressed changes. Nested mappings are recursed into; everything else
//! (scalars, sequences, mappings below the depth bound) is compared whole.
//!
//! Output is capped at `max_items` entries across the whole recursion. Once the
//! cap is reached the walk stops, so the list holds the first N changes in key
//! iteration order.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::config::Config;
use crate::logging::log_diff_truncated;

pub const MAX_DIFF_ITEMS: usize = 300;
pub const MAX_DIFF_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// One difference at a dotted key path.
///
/// `Added` has no `before`, `Removed` has no `after`, `Changed` has both and
/// they are not deeply equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl ChangeEntry {
    pub fn added(path: String, after: Value) -> Self {
        Self { path, kind: ChangeKind::Added, before: None, after: Some(after) }
    }

    pub fn removed(path: String, before: Value) -> Self {
        Self { path, kind: ChangeKind::Removed, before: Some(before), after: None }
    }

    pub fn changed(path: String, before: Value, after: Value) -> Self {
        Self { path, kind: ChangeKind::Changed, before: Some(before), after: Some(after) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub max_items: usize,
    /// Nesting level below which mappings are compared whole instead of
    /// recursed into.
    pub max_depth: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { max_items: MAX_DIFF_ITEMS, max_depth: MAX_DIFF_DEPTH }
    }
}

impl DiffOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self { max_items: cfg.diff_max_items, max_depth: cfg.diff_max_depth }
    }
}

/// Diff with the default cap and depth bound.
pub fn diff(a: Option<&Map<String, Value>>, b: Option<&Map<String, Value>>, base_path: &str) -> Vec<ChangeEntry> {
    diff_with(a, b, base_path, &DiffOptions::default())
}

pub fn diff_with(
    a: Option<&Map<String, Value>>,
    b: Option<&Map<String, Value>>,
    base_path: &str,
    opts: &DiffOptions,
) -> Vec<ChangeEntry> {
    diff_capped(a, b, base_path, opts).0
}

/// Like [`diff_with`], also reporting whether the cap cut the walk short.
pub fn diff_capped(
    a: Option<&Map<String, Value>>,
    b: Option<&Map<String, Value>>,
    base_path: &str,
    opts: &DiffOptions,
) -> (Vec<ChangeEntry>, bool) {
    let mut out = Vec::new();
    let truncated = walk(a, b, base_path, 0, opts, &mut out);
    if truncated {
        log_diff_truncated(base_path, opts.max_items);
    }
    (out, truncated)
}

/// Returns true when the walk stopped early on the cap.
fn walk(
    a: Option<&Map<String, Value>>,
    b: Option<&Map<String, Value>>,
    base_path: &str,
    depth: usize,
    opts: &DiffOptions,
    out: &mut Vec<ChangeEntry>,
) -> bool {
    for key in union_keys(a, b) {
        if out.len() >= opts.max_items {
            return true;
        }
        let path = join_path(base_path, key);
        let av = a.and_then(|m| m.get(key));
        let bv = b.and_then(|m| m.get(key));
        match (av, bv) {
            (None, Some(after)) => out.push(ChangeEntry::added(path, after.clone())),
            (Some(before), None) => out.push(ChangeEntry::removed(path, before.clone())),
            (Some(Value::Object(x)), Some(Value::Object(y))) if depth < opts.max_depth => {
                if walk(Some(x), Some(y), &path, depth + 1, opts, out) {
                    return true;
                }
            }
            (Some(before), Some(after)) => {
                if !values_equal(before, after) {
                    out.push(ChangeEntry::changed(path, before.clone(), after.clone()));
                }
            }
            (None, None) => {}
        }
    }
    false
}

/// Keys of `a` in document order, then keys only in `b`.
fn union_keys<'a>(a: Option<&'a Map<String, Value>>, b: Option<&'a Map<String, Value>>) -> Vec<&'a str> {
    let mut keys: Vec<&'a str> = a.map(|m| m.keys().map(String::as_str).collect()).unwrap_or_default();
    if let Some(b) = b {
        for k in b.keys() {
            if !a.is_some_and(|m| m.contains_key(k)) {
                keys.push(k.as_str());
            }
        }
    }
    keys
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

/// Deep structural equality. Sequences are order-sensitive; numbers compare
/// by value so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm.iter().all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(p), Some(q)) = (x.as_i64(), y.as_i64()) {
        return p == q;
    }
    if let (Some(p), Some(q)) = (x.as_u64(), y.as_u64()) {
        return p == q;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(p), Some(q)) => p == q,
        _ => false,
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub total: usize,
    /// The cap stopped the walk before every key was visited.
    pub truncated: bool,
}

pub fn summarize(entries: &[ChangeEntry], truncated: bool) -> DiffSummary {
    let mut s = DiffSummary { total: entries.len(), truncated, ..Default::default() };
    for e in entries {
        match e.kind {
            ChangeKind::Added => s.added += 1,
            ChangeKind::Removed => s.removed += 1,
            ChangeKind::Changed => s.changed += 1,
        }
    }
    s
}

// =============================================================================
// Rendering
// =============================================================================

/// Display form of a before/after value.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// The key does not exist on this side. Never shown as empty text.
    Missing,
    Null,
    Bool(bool),
    /// Fixed six-decimal text.
    Number(String),
    Text(String),
    /// `object{n}` / `array[n]`, expandable to the full value.
    Collapsed { summary: String, value: Value },
}

impl Rendered {
    /// Full pretty-printed form for collapsed values, otherwise the display text.
    pub fn expanded(&self) -> String {
        match self {
            Rendered::Collapsed { value, .. } => serde_json::to_string_pretty(value).unwrap_or_default(),
            other => other.to_string(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Rendered::Missing)
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Missing => write!(f, "(missing)"),
            Rendered::Null => write!(f, "null"),
            Rendered::Bool(b) => write!(f, "{}", b),
            Rendered::Number(s) | Rendered::Text(s) => write!(f, "{}", s),
            Rendered::Collapsed { summary, .. } => write!(f, "{}", summary),
        }
    }
}

pub fn render(value: Option<&Value>) -> Rendered {
    match value {
        None => Rendered::Missing,
        Some(Value::Null) => Rendered::Null,
        Some(Value::Bool(b)) => Rendered::Bool(*b),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) => Rendered::Number(format!("{:.6}", f)),
            None => Rendered::Text(n.to_string()),
        },
        Some(Value::String(s)) => Rendered::Text(s.clone()),
        Some(v @ Value::Object(m)) => Rendered::Collapsed { summary: format!("object{{{}}}", m.len()), value: v.clone() },
        Some(v @ Value::Array(xs)) => Rendered::Collapsed { summary: format!("array[{}]", xs.len()), value: v.clone() },
    }
}

// =============================================================================
// Patch application
// =============================================================================

/// Rebuild the right-hand document by writing each entry's `after` value onto `a`.
pub fn apply(a: &Map<String, Value>, changes: &[ChangeEntry]) -> Map<String, Value> {
    let mut root = a.clone();
    for c in changes {
        set_path(&mut root, &c.path, c.after.clone());
    }
    root
}

/// Rebuild the left-hand document by writing each entry's `before` value onto `b`.
pub fn revert(b: &Map<String, Value>, changes: &[ChangeEntry]) -> Map<String, Value> {
    let mut root = b.clone();
    for c in changes {
        set_path(&mut root, &c.path, c.before.clone());
    }
    root
}

// Keys containing '.' are not addressable.
fn set_path(root: &mut Map<String, Value>, path: &str, value: Option<Value>) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return };
    let mut cur = root;
    for p in parts {
        let slot = cur.entry(p.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cur = match slot {
            Value::Object(m) => m,
            _ => return,
        };
    }
    match value {
        Some(v) => {
            cur.insert(last.to_string(), v);
        }
        None => {
            cur.remove(last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_identical_is_empty() {
        let a = map(json!({"a": 1, "b": {"c": [1, 2, {"d": null}]}, "e": "x"}));
        assert!(diff(Some(&a), Some(&a), "").is_empty());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let a = map(json!({"a": 1, "b": {"x": 1}}));
        let b = map(json!({"a": 2, "b": {"x": 1, "y": 2}}));
        let changes = diff(Some(&a), Some(&b), "");
        assert_eq!(
            changes,
            vec![
                ChangeEntry::changed("a".into(), json!(1), json!(2)),
                ChangeEntry::added("b.y".into(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_base_path_prefix() {
        let a = map(json!({"lr": 0.1}));
        let b = map(json!({}));
        let changes = diff(Some(&a), Some(&b), "params");
        assert_eq!(changes[0].path, "params.lr");
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert!(changes[0].after.is_none());
    }

    #[test]
    fn test_absent_sides() {
        let b = map(json!({"x": 1, "y": {"z": 2}}));
        let added = diff(None, Some(&b), "");
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|c| c.kind == ChangeKind::Added));
        let removed = diff(Some(&b), None, "");
        assert!(removed.iter().all(|c| c.kind == ChangeKind::Removed));
        assert!(diff(None, None, "").is_empty());
    }

    #[test]
    fn test_key_order_a_then_b() {
        let a = map(json!({"z": 1, "m": 1}));
        let b = map(json!({"b": 1, "z": 2}));
        let paths: Vec<_> = diff(Some(&a), Some(&b), "").into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["z", "m", "b"]);
    }

    #[test]
    fn test_sequences_order_sensitive() {
        let a = map(json!({"s": [1, 2]}));
        let b = map(json!({"s": [2, 1]}));
        let changes = diff(Some(&a), Some(&b), "");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Changed);
    }

    #[test]
    fn test_numeric_equality_across_repr() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2.5]}), &json!({"a": [1.0, 2.5]})));
        assert!(!values_equal(&json!(1), &json!(1.000001)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_type_change_is_changed() {
        let a = map(json!({"k": {"x": 1}}));
        let b = map(json!({"k": [1]}));
        let changes = diff(Some(&a), Some(&b), "");
        assert_eq!(changes, vec![ChangeEntry::changed("k".into(), json!({"x": 1}), json!([1]))]);
    }

    #[test]
    fn test_cap_enforced() {
        let mut a = Map::new();
        let mut b = Map::new();
        for i in 0..500 {
            a.insert(format!("k{}", i), json!(i));
            b.insert(format!("k{}", i), json!({"nested": {"v": i + 1}}));
            b.insert(format!("n{}", i), json!(i));
        }
        let changes = diff(Some(&a), Some(&b), "");
        assert_eq!(changes.len(), MAX_DIFF_ITEMS);
        assert_eq!(changes[0].path, "k0");

        let opts = DiffOptions { max_items: 7, ..Default::default() };
        let (small, truncated) = diff_capped(Some(&a), Some(&b), "", &opts);
        assert_eq!(small.len(), 7);
        assert!(truncated);
        assert!(summarize(&small, truncated).truncated);
    }

    #[test]
    fn test_cap_across_recursion() {
        let mut inner_a = Map::new();
        let mut inner_b = Map::new();
        for i in 0..400 {
            inner_a.insert(format!("p{}", i), json!(i));
            inner_b.insert(format!("p{}", i), json!(-(i as i64)));
        }
        let a = map(json!({"deep": {"deeper": inner_a}}));
        let b = map(json!({"deep": {"deeper": inner_b}, "after": 1}));
        let changes = diff(Some(&a), Some(&b), "");
        // p0 is 0 == -0, so it produces nothing
        assert_eq!(changes.len(), MAX_DIFF_ITEMS);
        assert_eq!(changes[0].path, "deep.deeper.p1");
        assert!(changes.iter().all(|c| c.path != "after"));
    }

    #[test]
    fn test_exactly_at_cap_not_truncated() {
        let a = map(json!({"x": 1, "y": 1, "z": 1}));
        let b = map(json!({"x": 2, "y": 2, "z": 2}));
        let opts = DiffOptions { max_items: 3, ..Default::default() };
        let (changes, truncated) = diff_capped(Some(&a), Some(&b), "", &opts);
        assert_eq!(changes.len(), 3);
        assert!(!truncated);
        assert!(!summarize(&changes, truncated).truncated);

        // one more changed key past the cap is a real cut
        let b2 = map(json!({"x": 2, "y": 2, "z": 2, "w": 0}));
        let (changes, truncated) = diff_capped(Some(&a), Some(&b2), "", &opts);
        assert_eq!(changes.len(), 3);
        assert!(truncated);
    }

    #[test]
    fn test_depth_bound_compares_whole() {
        let a = map(json!({"l0": {"l1": {"l2": {"v": 1}}}}));
        let b = map(json!({"l0": {"l1": {"l2": {"v": 2}}}}));
        let opts = DiffOptions { max_depth: 1, ..Default::default() };
        let changes = diff_with(Some(&a), Some(&b), "", &opts);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "l0.l1");
        assert_eq!(changes[0].kind, ChangeKind::Changed);

        let full = diff(Some(&a), Some(&b), "");
        assert_eq!(full[0].path, "l0.l1.l2.v");
    }

    #[test]
    fn test_round_trip() {
        let a = map(json!({
            "a": 1,
            "gone": "x",
            "b": {"x": 1, "drop": [1], "inner": {"k": true}},
            "t": {"was": "map"},
        }));
        let b = map(json!({
            "a": 2.5,
            "b": {"x": 1, "y": {"new": 1}, "inner": {}},
            "t": "now scalar",
            "fresh": null,
        }));
        let changes = diff(Some(&a), Some(&b), "");
        assert_eq!(apply(&a, &changes), b);
        assert_eq!(revert(&b, &changes), a);

        let mut seen = std::collections::HashSet::new();
        for c in &changes {
            assert!(seen.insert(c.path.clone()), "duplicate path {}", c.path);
        }
    }

    #[test]
    fn test_render_policy() {
        assert_eq!(render(Some(&json!(1))).to_string(), "1.000000");
        assert_eq!(render(Some(&json!(0.1234567))).to_string(), "0.123457");
        assert_eq!(render(Some(&json!({"a": 1, "b": 2}))).to_string(), "object{2}");
        assert_eq!(render(Some(&json!([1, 2, 3]))).to_string(), "array[3]");
        assert_eq!(render(Some(&json!(""))).to_string(), "");
        assert!(render(None).is_missing());
        assert_ne!(render(None).to_string(), "");
        assert_eq!(render(Some(&json!(null))).to_string(), "null");
        assert!(render(Some(&json!([1]))).expanded().contains('1'));
    }

    #[test]
    fn test_summary_counts() {
        let a = map(json!({"a": 1, "b": 2}));
        let b = map(json!({"a": 3, "c": 4}));
        let s = summarize(&diff(Some(&a), Some(&b), ""), false);
        assert_eq!((s.added, s.removed, s.changed, s.total), (1, 1, 1, 3));
        assert!(!s.truncated);
    }
}
