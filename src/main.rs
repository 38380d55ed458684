use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::json;

use runlens::compare::ComparisonView;
use runlens::config::Config;
use runlens::diff::DiffOptions;
use runlens::logging::{log, obj, v_str, Domain, Level};
use runlens::manager::ManagerView;
use runlens::search::{SearchSession, SuggestionController};
use runlens::source::{ExperimentSource, FixtureSource, GoalFilters, HttpSource};

const USAGE: &str = "usage: runlens compare <id_a> <id_b> | goals [strategy] | search <query...>";

fn build_source(cfg: &Config) -> Result<Arc<dyn ExperimentSource>> {
    match &cfg.fixture_path {
        Some(path) => Ok(Arc::new(FixtureSource::load(Path::new(path))?)),
        None => Ok(Arc::new(HttpSource::new(cfg)?)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).ok_or_else(|| anyhow!(USAGE))?;

    log(
        Level::Info,
        Domain::System,
        "start",
        obj(&[
            ("command", v_str(command)),
            ("source", v_str(if cfg.fixture_path.is_some() { "fixture" } else { "http" })),
        ]),
    );
    let source = build_source(&cfg)?;

    let out = match command {
        "compare" => {
            let (Some(a), Some(b)) = (args.get(1), args.get(2)) else { bail!(USAGE) };
            let mut view = ComparisonView::new(DiffOptions::from_config(&cfg));
            view.load(source.as_ref(), a, b).await;
            json!({
                "a": a,
                "b": b,
                "error": view.error,
                "params": { "summary": view.params.summary, "rows": view.params.rows() },
                "summary": { "summary": view.summary.summary, "rows": view.summary.rows() },
            })
        }
        "goals" => {
            let filters = GoalFilters { strategy: args.get(1).cloned(), ..Default::default() };
            let mut view = ManagerView::new(&cfg);
            view.load(source.as_ref(), filters).await;
            json!({ "error": view.error, "categories": view.categories(), "chart": view.chart })
        }
        "search" => {
            let query = args[1..].join(" ");
            if query.trim().is_empty() {
                bail!(USAGE);
            }
            // Replay the query as keystrokes so earlier prefixes race the final one.
            let mut session = SearchSession::new(SuggestionController::new(cfg.suggest_limit), source.clone());
            let mut typed = String::new();
            for ch in query.chars() {
                typed.push(ch);
                session.on_input(&typed);
            }
            let outcomes = session.settle().await;
            json!({
                "responses": outcomes.len(),
                "state": session.controller.state(),
            })
        }
        other => bail!("unknown command {}\n{}", other, USAGE),
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    if out.get("error").is_some_and(|e| !e.is_null()) || out["state"]["error"].is_string() {
        std::process::exit(1);
    }
    Ok(())
}
