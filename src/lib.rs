//! **danmerge** - Fast, deterministic merge/dedup pipeline for danmaku comments
//!
//! Decodes XML comment lists and binary segments, clusters near-duplicate
//! comments inside a sliding time window, and re-encodes the merged stream.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core pipeline - codecs, normalization, clustering and per-session scheduling
pub mod core {
    /// Canonical comment records and merged output lines
    pub mod comment;
    pub use comment::{Comment, IngressBatch, Mark, MergedComment, Mode, Pool};

    /// XML / binary ingress and XML / binary / debug egress
    pub mod codec;
    pub use codec::{Egress, FormatError, FormatHint, Segment};

    /// Comparison-text canonicalization passes
    pub mod normalize;
    pub use normalize::TextNormalizer;

    /// Bounded edit distance and bigram cosine similarity
    pub mod similarity;
    pub use similarity::SimilarityPolicy;

    /// Sliding-window near-duplicate clustering
    pub mod cluster;
    pub use cluster::{Candidate, ClusterPolicy};

    /// Mark, enlarge, shrink/drop, elevation and slot combination
    pub mod merge;
    pub use merge::MergePolicy;

    /// Blacklist and whitelist rules
    pub mod filter;
    pub use filter::{BlacklistFilter, Whitelist};

    /// Per-session scheduler, cached results and the session registry
    pub mod scheduler;
    pub use scheduler::{
        DumpStep, Ingress, PipelineError, PipelineScheduler, RunResult, RunStats, Session,
        SessionRegistry,
    };

    /// "path[:segment[@from-to]]" input parsing
    pub mod target;
    pub use target::InputTarget;

    /// `dmerge process` command
    pub mod process;
    pub use process::run as process_run;
}

/// Infrastructure - Configuration, I/O and logging
pub mod infra {
    /// Configuration snapshot with lenient loading and documented ranges
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Memory-mapped file I/O for large payloads (>1MB threshold)
    pub mod io;
    pub use io::{FileContent, read_file_smart};

    /// tracing-subscriber setup
    pub mod logging;
    pub use logging::init_logging;
}

// Re-exports for the binary and library consumers
pub use cli::{AppContext, Cli, Commands};
pub use crate::core::process_run;
pub use crate::core::{
    Comment, Egress, FormatError, MergedComment, PipelineError, PipelineScheduler, RunResult,
    RunStats, Session, SessionRegistry,
};
pub use infra::{Config, load_config};
