//! Per-session pipeline: filter, normalize, cluster, merge, encode.
//!
//! Each session owns one scheduler holding at most one cached result.
//! Starting a run invalidates the cache; a run that finishes after a newer
//! one has started is discarded. Locks guard only the cache swap, never a
//! pipeline stage.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::cluster::{Candidate, ClusterPolicy, cluster};
use crate::core::codec::{self, Egress, FormatError, FormatHint, Segment};
use crate::core::comment::{Comment, IngressBatch, MergedComment};
use crate::core::filter::{BlacklistFilter, Whitelist, partition};
use crate::core::merge::MergePolicy;
use crate::core::normalize::TextNormalizer;
use crate::infra::config::Config;

pub type SessionId = u64;

/// Raw input handed to [`PipelineScheduler::run`]
#[derive(Debug, Clone)]
pub enum Ingress {
    /// One complete payload (XML document or a single binary segment)
    Document { bytes: Vec<u8>, hint: FormatHint },
    /// Time-sliced binary segments, any order
    Segments(Vec<Segment>),
    /// Already decoded comments
    Batch(IngressBatch),
}

/// Which side of the cached run to re-encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpStep {
    /// Decoded ingress before filtering
    Input,
    #[default]
    Output,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("no cached result for this session")]
    NoResult,
    #[error("run superseded by a newer run")]
    Superseded,
    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub input_count: usize,
    pub output_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub malformed: usize,
    pub blacklisted: usize,
    pub whitelisted: usize,
    pub passthrough: usize,
    /// Members absorbed into another comment's cluster
    pub merged: usize,
    /// Members of dropped clusters
    pub dropped: usize,
    pub shrunk: usize,
    pub elevated: usize,
    pub combined: usize,
    pub elapsed_ms: u64,
}

/// Outcome of one successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub run_id: u64,
    pub batch_id: String,
    pub egress: Egress,
    pub chat_id: Option<String>,
    /// Decoded ingress, kept for input dumps
    pub input: Vec<Comment>,
    pub merged: Vec<MergedComment>,
    pub stats: RunStats,
    /// `merged` encoded as `egress`
    pub payload: Vec<u8>,
}

/// Ticket for an in-flight run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunTicket(u64);

#[derive(Debug, Default)]
pub struct PipelineScheduler {
    generation: AtomicU64,
    latest: Mutex<Option<Arc<RunResult>>>,
    last_stats: Mutex<Option<RunStats>>,
}

impl PipelineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the whole pipeline and cache the result.
    #[instrument(level = "debug", skip_all, fields(egress = ?egress))]
    pub fn run(
        &self,
        ingress: Ingress,
        cfg: &Config,
        egress: Egress,
    ) -> Result<Arc<RunResult>, PipelineError> {
        let ticket = self.begin();

        let outcome = catch_unwind(AssertUnwindSafe(|| process(ingress, cfg, egress, ticket.0)))
            .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(&*panic))));

        self.finish(ticket, outcome)
    }

    fn begin(&self) -> RunTicket {
        let mut latest = self.latest.lock();
        *latest = None;
        RunTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn finish(
        &self,
        ticket: RunTicket,
        outcome: Result<RunResult, PipelineError>,
    ) -> Result<Arc<RunResult>, PipelineError> {
        let mut latest = self.latest.lock();

        if self.generation.load(Ordering::SeqCst) != ticket.0 {
            debug!(run = ticket.0, "discarding superseded run");
            return Err(PipelineError::Superseded);
        }

        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                *self.last_stats.lock() = Some(result.stats.clone());
                *latest = Some(Arc::clone(&result));
                Ok(result)
            }
            Err(e) => {
                warn!(run = ticket.0, error = %e, "run failed");
                *self.last_stats.lock() = Some(RunStats { error: Some(e.to_string()), ..RunStats::default() });
                Err(e)
            }
        }
    }

    /// Cached result of the latest completed run
    pub fn latest(&self) -> Option<Arc<RunResult>> {
        self.latest.lock().clone()
    }

    /// Stats of the latest finished run, failed runs included
    pub fn last_stats(&self) -> Option<RunStats> {
        self.last_stats.lock().clone()
    }

    /// Re-encode the cached run without recomputing it
    pub fn dump_result(&self, step: DumpStep, egress: Egress) -> Result<Vec<u8>, PipelineError> {
        let result = self.latest().ok_or(PipelineError::NoResult)?;

        Ok(match step {
            DumpStep::Output if egress == result.egress => result.payload.clone(),
            DumpStep::Output => codec::encode(&result.merged, egress, result.chat_id.as_deref()),
            DumpStep::Input => codec::encode_comments(&result.input, egress, result.chat_id.as_deref()),
        })
    }

    /// View requests carry protocol metadata, not comments
    pub fn handle_view(&self, payload: Vec<u8>) -> Vec<u8> {
        debug!(len = payload.len(), "passing view payload through");
        payload
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn decode(ingress: Ingress) -> Result<IngressBatch, FormatError> {
    match ingress {
        Ingress::Document { bytes, hint } => codec::decode(&bytes, hint),
        Ingress::Segments(segments) => codec::decode_segments(segments),
        Ingress::Batch(batch) => Ok(batch),
    }
}

fn process(
    ingress: Ingress,
    cfg: &Config,
    egress: Egress,
    run_id: u64,
) -> Result<RunResult, PipelineError> {
    let start = Instant::now();
    let batch = decode(ingress)?;
    let input = batch.comments.clone();

    let mut stats = RunStats {
        input_count: batch.comments.len(),
        malformed: batch.malformed,
        ..RunStats::default()
    };

    let blacklist = BlacklistFilter::from_config(cfg);
    let (kept, blocked) = partition(batch.comments, &blacklist);
    stats.blacklisted = blocked;

    let whitelist = Whitelist::from_config(cfg);
    let normalizer = TextNormalizer::from_config(cfg);
    let candidates: Vec<Candidate> = kept
        .into_iter()
        .map(|comment| Candidate {
            key: normalizer.normalize(&comment.content),
            exempt: whitelist.is_exempt(&comment.content),
            comment,
        })
        .collect();
    stats.whitelisted = candidates.iter().filter(|c| c.exempt).count();

    let clustered = cluster(&candidates, &ClusterPolicy::from_config(cfg), cfg.combine_threads.max(1));
    stats.passthrough = clustered.passthrough;
    stats.merged = candidates.len() - clustered.clusters.len();

    let merged = MergePolicy::from_config(cfg).apply(clustered.clusters);
    stats.dropped = merged.dropped_members;
    stats.shrunk = merged.shrunk;
    stats.elevated = merged.elevated;
    stats.combined = merged.combined;
    stats.output_count = merged.merged.len();

    let payload = codec::encode(&merged.merged, egress, batch.chat_id.as_deref());
    stats.elapsed_ms = start.elapsed().as_millis() as u64;

    info!(
        run = run_id,
        batch = %batch.batch_id,
        input = stats.input_count,
        output = stats.output_count,
        blacklisted = stats.blacklisted,
        merged = stats.merged,
        elapsed_ms = stats.elapsed_ms,
        "pipeline run complete"
    );

    Ok(RunResult {
        run_id,
        batch_id: batch.batch_id,
        egress,
        chat_id: batch.chat_id,
        input,
        merged: merged.merged,
        stats,
        payload,
    })
}

/// One viewer session: an immutable config snapshot and its scheduler
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub config: Arc<Config>,
    pub scheduler: PipelineScheduler,
}

impl Session {
    pub fn run(&self, ingress: Ingress, egress: Egress) -> Result<Arc<RunResult>, PipelineError> {
        self.scheduler.run(ingress, &self.config, egress)
    }
}

/// Live sessions by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with `config`, replacing any session under `id`
    pub fn open(&self, id: SessionId, config: Config) -> Arc<Session> {
        let session = Arc::new(Session {
            id,
            config: Arc::new(config),
            scheduler: PipelineScheduler::new(),
        });
        if self.sessions.write().insert(id, Arc::clone(&session)).is_some() {
            debug!(session = id, "replaced existing session");
        }
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Discard a session and its cached result
    pub fn end_session(&self, id: SessionId) -> bool {
        self.sessions.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
