//! Experiment suggestion search.
//!
//! Keystrokes can issue lookups faster than the backend answers them, and the
//! answers may come back in any order. Every lookup is tagged with the epoch
//! current when it was issued; `apply` only accepts a response whose epoch is
//! still current, so visible candidates always belong to the latest query.
//! Superseded responses are dropped without touching state.
//!
//! The controller is split into `set_query` / `lookup` / `apply` so no
//! borrow of the controller is held across the network await.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use tokio::task::{JoinHandle, JoinSet};

use crate::logging::{log_search, log_view_error};
use crate::source::{Candidate, ExperimentSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Idle,
    Searching,
    Resolved,
    Failed,
}

/// Outcome of handing a response to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Resolved,
    /// Stale epoch; nothing changed.
    Suppressed,
    Failed,
}

/// Everything a lookup needs, captured when it is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub epoch: u64,
    pub query: String,
    pub limit: usize,
    pub page: usize,
    pub exclude: Vec<String>,
}

#[derive(Debug)]
pub struct SearchResponse {
    pub epoch: u64,
    pub query: String,
    pub result: Result<Vec<Candidate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionState {
    pub query: String,
    pub candidates: Vec<Candidate>,
    pub request_epoch: u64,
    pub status: SearchStatus,
    pub error: Option<String>,
    pub highlighted: Option<usize>,
}

impl Default for SuggestionState {
    fn default() -> Self {
        Self {
            query: String::new(),
            candidates: Vec::new(),
            request_epoch: 0,
            status: SearchStatus::Idle,
            error: None,
            highlighted: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionController {
    state: SuggestionState,
    exclude: Vec<String>,
    limit: usize,
}

impl SuggestionController {
    pub fn new(limit: usize) -> Self {
        Self { state: SuggestionState::default(), exclude: Vec::new(), limit }
    }

    /// Ids never offered as suggestions (e.g. the run already on screen).
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn state(&self) -> &SuggestionState {
        &self.state
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.state.candidates
    }

    pub fn status(&self) -> SearchStatus {
        self.state.status
    }

    /// Record new query text. Returns a ticket when a lookup should be
    /// issued; `None` when the text is unchanged or empty.
    ///
    /// Clearing also advances the epoch so in-flight lookups cannot
    /// repopulate the list afterwards.
    pub fn set_query(&mut self, text: &str) -> Option<SearchTicket> {
        let query = text.trim();
        if query == self.state.query && self.state.status != SearchStatus::Idle {
            return None;
        }
        self.state.query = query.to_string();
        self.state.request_epoch += 1;
        if query.is_empty() {
            self.state.status = SearchStatus::Idle;
            self.state.error = None;
            self.set_candidates(Vec::new());
            return None;
        }
        Some(self.issue())
    }

    /// Reissue the current query.
    pub fn retry(&mut self) -> Option<SearchTicket> {
        if self.state.query.is_empty() {
            return None;
        }
        self.state.request_epoch += 1;
        Some(self.issue())
    }

    fn issue(&mut self) -> SearchTicket {
        self.state.status = SearchStatus::Searching;
        let ticket = SearchTicket {
            epoch: self.state.request_epoch,
            query: self.state.query.clone(),
            limit: self.limit,
            page: 1,
            exclude: self.exclude.clone(),
        };
        log_search("issued", ticket.epoch, &ticket.query, &[]);
        ticket
    }

    pub fn apply(&mut self, resp: SearchResponse) -> Applied {
        if resp.epoch != self.state.request_epoch {
            log_search("suppressed", resp.epoch, &resp.query, &[("current", json!(self.state.request_epoch))]);
            return Applied::Suppressed;
        }
        match resp.result {
            Ok(found) => {
                let visible: Vec<Candidate> = found.into_iter().filter(|c| !self.exclude.contains(&c.id)).collect();
                log_search("resolved", resp.epoch, &resp.query, &[("count", json!(visible.len()))]);
                self.state.status = SearchStatus::Resolved;
                self.state.error = None;
                self.set_candidates(visible);
                Applied::Resolved
            }
            Err(err) => {
                let message = format!("search failed: {:#}", err);
                log_view_error("search", &message);
                self.state.status = SearchStatus::Failed;
                self.state.error = Some(message);
                self.set_candidates(Vec::new());
                Applied::Failed
            }
        }
    }

    fn set_candidates(&mut self, candidates: Vec<Candidate>) {
        self.state.candidates = candidates;
        self.state.highlighted = None;
    }

    // Keyboard navigation. Purely local; wraps at both ends.

    pub fn highlighted(&self) -> Option<usize> {
        self.state.highlighted
    }

    pub fn highlight_next(&mut self) -> Option<usize> {
        let n = self.state.candidates.len();
        if n == 0 {
            return None;
        }
        let next = match self.state.highlighted {
            Some(i) => (i + 1) % n,
            None => 0,
        };
        self.state.highlighted = Some(next);
        self.state.highlighted
    }

    pub fn highlight_previous(&mut self) -> Option<usize> {
        let n = self.state.candidates.len();
        if n == 0 {
            return None;
        }
        let prev = match self.state.highlighted {
            Some(i) if i > 0 => i - 1,
            _ => n - 1,
        };
        self.state.highlighted = Some(prev);
        self.state.highlighted
    }

    pub fn select(&self) -> Option<&Candidate> {
        self.state.highlighted.and_then(|i| self.state.candidates.get(i))
    }
}

/// Run the lookup a ticket describes.
pub async fn lookup<S: ExperimentSource + ?Sized>(source: &S, ticket: SearchTicket) -> SearchResponse {
    let result = source.fetch_candidates(&ticket.query, ticket.limit, ticket.page, &ticket.exclude).await;
    SearchResponse { epoch: ticket.epoch, query: ticket.query, result }
}

/// Run a lookup on the runtime.
pub fn spawn_lookup<S>(source: Arc<S>, ticket: SearchTicket) -> JoinHandle<SearchResponse>
where
    S: ExperimentSource + ?Sized + 'static,
{
    tokio::spawn(async move { lookup(source.as_ref(), ticket).await })
}

/// Controller wired to a source: keystrokes spawn lookups and responses are
/// applied in completion order. A lookup task that dies without answering
/// is applied as a failure for its epoch.
pub struct SearchSession<S: ExperimentSource + ?Sized + 'static> {
    pub controller: SuggestionController,
    source: Arc<S>,
    pending: JoinSet<SearchResponse>,
}

impl<S: ExperimentSource + ?Sized + 'static> SearchSession<S> {
    pub fn new(controller: SuggestionController, source: Arc<S>) -> Self {
        Self { controller, source, pending: JoinSet::new() }
    }

    pub fn on_input(&mut self, text: &str) {
        if let Some(ticket) = self.controller.set_query(text) {
            let (epoch, query) = (ticket.epoch, ticket.query.clone());
            let handle = spawn_lookup(self.source.clone(), ticket);
            self.pending.spawn(async move {
                match handle.await {
                    Ok(resp) => resp,
                    Err(err) => SearchResponse { epoch, query, result: Err(anyhow!("lookup task failed: {}", err)) },
                }
            });
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next response and apply it. `None` when nothing is pending.
    pub async fn next_response(&mut self) -> Option<Applied> {
        loop {
            match self.pending.join_next().await? {
                Ok(resp) => return Some(self.controller.apply(resp)),
                // the wrapper itself was cancelled; its epoch is unknown
                Err(err) => log_view_error("search", &format!("lookup wrapper failed: {}", err)),
            }
        }
    }

    /// Apply responses until every issued lookup has answered.
    pub async fn settle(&mut self) -> Vec<Applied> {
        let mut out = Vec::new();
        while let Some(applied) = self.next_response().await {
            out.push(applied);
        }
        out
    }
}
