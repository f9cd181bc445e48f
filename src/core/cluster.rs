//! Streaming near-duplicate clustering inside a sliding time window.
//!
//! Comments are visited in ascending time. Live clusters sit in a deque
//! ordered by anchor time; before each admission the clusters whose
//! anchor fell out of the window are evicted. The incoming comment joins
//! the first (oldest) live cluster whose current representative it is a
//! near-duplicate of, or opens a new one anchored at itself.

use std::collections::VecDeque;

use indexmap::IndexMap;
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::core::comment::{Comment, MergedComment};
use crate::core::similarity::SimilarityPolicy;
use crate::infra::config::Config;

/// A comment ready for clustering
#[derive(Debug, Clone)]
pub struct Candidate {
    pub comment: Comment,
    /// Normalized comparison text
    pub key: String,
    /// Whitelisted: never merged
    pub exempt: bool,
}

/// Clustering parameters taken from a config snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterPolicy {
    /// Window in centiseconds; None disables merging
    pub threshold_cs: Option<i64>,
    pub similarity: SimilarityPolicy,
    pub cross_mode: bool,
    pub proc_type7: bool,
    pub proc_type4: bool,
    pub proc_pool1: bool,
    pub representative_percent: u32,
}

impl ClusterPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            threshold_cs: cfg.threshold_cs(),
            similarity: SimilarityPolicy { max_dist: cfg.max_dist, max_cosine: cfg.max_cosine },
            cross_mode: cfg.cross_mode,
            proc_type7: cfg.proc_type7,
            proc_type4: cfg.proc_type4,
            proc_pool1: cfg.proc_pool1,
            representative_percent: cfg.representative_percent,
        }
    }

    /// Whether a comment takes part in clustering at all
    fn participates(&self, c: &Candidate) -> bool {
        use crate::core::comment::{Mode, Pool};

        let m = c.comment.mode;
        !(c.exempt
            || (m == Mode::Special && !self.proc_type7)
            || (m.is_type4() && !self.proc_type4)
            || (c.comment.pool == Pool::Subtitle && !self.proc_pool1))
    }

    fn compatible(&self, a: &Comment, b: &Comment) -> bool {
        self.cross_mode || (a.mode == b.mode && a.pool == b.pool)
    }
}

/// Result of one clustering pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterOutcome {
    /// One entry per cluster, ordered by anchor time then arrival
    pub clusters: Vec<MergedComment>,
    /// Comments that skipped clustering
    pub passthrough: usize,
}

/// Accumulator for one open cluster. Indices refer to the time-sorted view.
struct LiveCluster {
    anchor: usize,
    anchor_time: i64,
    members: SmallVec<[usize; 4]>,
    /// Member text -> (count, first position holding it)
    tally: IndexMap<String, (usize, usize)>,
    /// Position whose text currently stands for the cluster
    rep: usize,
}

impl LiveCluster {
    fn open(pos: usize, time: i64, text: &str) -> Self {
        let mut tally = IndexMap::new();
        tally.insert(text.to_string(), (1, pos));
        Self {
            anchor: pos,
            anchor_time: time,
            members: SmallVec::from_elem(pos, 1),
            tally,
            rep: pos,
        }
    }

    fn admit(&mut self, pos: usize, text: &str, percent: u32) {
        self.members.push(pos);
        self.tally.entry(text.to_string()).or_insert((0, pos)).0 += 1;
        self.rep = self.leader(percent).unwrap_or(self.anchor);
    }

    /// Most frequent text if it reaches `percent` of the members; ties go
    /// to the text seen first
    fn leader(&self, percent: u32) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for &(n, first) in self.tally.values() {
            if best.is_none_or(|(m, _)| n > m) {
                best = Some((n, first));
            }
        }
        best.filter(|&(n, _)| n * 100 >= percent as usize * self.members.len())
            .map(|(_, first)| first)
    }
}

/// Emitted cluster tagged with its anchor's sorted position
type Emitted = (usize, MergedComment);

/// Cluster `candidates` (any order). With `threads > 1` the stream is cut
/// at gaps wider than the window and the parts run on a dedicated pool;
/// the output is identical to the single-threaded pass.
pub fn cluster(candidates: &[Candidate], policy: &ClusterPolicy, threads: usize) -> ClusterOutcome {
    // Stable: equal times keep ingress order
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| candidates[i].comment.time_cs);

    let parts = match policy.threshold_cs {
        Some(window) if threads > 1 => partitions(candidates, &order, window),
        _ => vec![0..order.len()],
    };

    let mut emitted: Vec<Emitted> = if parts.len() > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => {
                debug!(parts = parts.len(), threads, "clustering partitions in parallel");
                pool.install(|| {
                    parts
                        .par_iter()
                        .map(|r| stream(candidates, &order, r.clone(), policy))
                        .collect::<Vec<_>>()
                })
                .into_iter()
                .flatten()
                .collect()
            }
            Err(e) => {
                warn!(error = %e, "cannot build worker pool, clustering on one thread");
                stream(candidates, &order, 0..order.len(), policy)
            }
        }
    } else {
        stream(candidates, &order, 0..order.len(), policy)
    };

    emitted.sort_by_key(|(pos, _)| *pos);

    let passthrough = candidates
        .iter()
        .filter(|c| policy.threshold_cs.is_none() || !policy.participates(c))
        .count();

    ClusterOutcome {
        clusters: emitted.into_iter().map(|(_, m)| m).collect(),
        passthrough,
    }
}

/// Split the sorted view wherever consecutive comments are further apart
/// than the window; no cluster can straddle such a cut
fn partitions(
    candidates: &[Candidate],
    order: &[usize],
    window: i64,
) -> Vec<std::ops::Range<usize>> {
    let mut parts = Vec::new();
    let mut start = 0;

    for pos in 1..order.len() {
        let prev = candidates[order[pos - 1]].comment.time_cs;
        let next = candidates[order[pos]].comment.time_cs;
        if next - prev > window {
            parts.push(start..pos);
            start = pos;
        }
    }
    if start < order.len() {
        parts.push(start..order.len());
    }
    parts
}

/// Single left-to-right pass over `order[range]`
fn stream(
    candidates: &[Candidate],
    order: &[usize],
    range: std::ops::Range<usize>,
    policy: &ClusterPolicy,
) -> Vec<Emitted> {
    let at = move |pos: usize| &candidates[order[pos]];

    let mut live: VecDeque<LiveCluster> = VecDeque::new();
    let mut out: Vec<Emitted> = Vec::with_capacity(range.len());

    let Some(window) = policy.threshold_cs else {
        // Merging disabled: every comment stands alone
        for pos in range {
            out.push((pos, MergedComment::passthrough(at(pos).comment.clone())));
        }
        return out;
    };

    for pos in range {
        let cand = at(pos);
        let now = cand.comment.time_cs;

        // Evict clusters whose anchor is outside the window
        while live
            .front()
            .is_some_and(|c| now - c.anchor_time > window)
        {
            if let Some(done) = live.pop_front() {
                out.push(resolve(candidates, order, done));
            }
        }

        if !policy.participates(cand) {
            out.push((pos, MergedComment::passthrough(cand.comment.clone())));
            continue;
        }

        let joined = live.iter_mut().find(|c| {
            policy.compatible(&at(c.anchor).comment, &cand.comment)
                && policy
                    .similarity
                    .is_near_duplicate(&at(c.rep).key, &cand.key)
        });

        match joined {
            Some(c) => c.admit(pos, &cand.comment.content, policy.representative_percent),
            None => live.push_back(LiveCluster::open(pos, now, &cand.comment.content)),
        }
    }

    for done in live {
        out.push(resolve(candidates, order, done));
    }
    out
}

/// Turn a closed cluster into its representative
fn resolve(candidates: &[Candidate], order: &[usize], cluster: LiveCluster) -> Emitted {
    let anchor = &candidates[order[cluster.anchor]].comment;
    let peers: Vec<String> = cluster
        .members
        .iter()
        .map(|&p| candidates[order[p]].comment.content.clone())
        .collect();

    let content = candidates[order[cluster.rep]].comment.content.clone();

    (
        cluster.anchor,
        MergedComment {
            representative: anchor.clone(),
            content,
            mode: anchor.mode,
            font_size: anchor.font_size,
            member_count: peers.len(),
            mark: None,
            shrunk: false,
            enlarged: false,
            elevated: false,
            peers,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comment::{Mode, sample};

    fn cand(id: i64, t: i64, text: &str) -> Candidate {
        Candidate { comment: sample(id, t, text), key: text.to_string(), exempt: false }
    }

    fn policy(threshold_s: i64, max_dist: u32) -> ClusterPolicy {
        ClusterPolicy {
            threshold_cs: Some(threshold_s * 100),
            similarity: SimilarityPolicy { max_dist, max_cosine: 101 },
            cross_mode: false,
            proc_type7: true,
            proc_type4: true,
            proc_pool1: false,
            representative_percent: 20,
        }
    }

    fn counts(out: &ClusterOutcome) -> Vec<usize> {
        out.clusters.iter().map(|m| m.member_count).collect()
    }

    #[test]
    fn test_window_boundary_inclusive() {
        let p = policy(5, 0);
        let inside = vec![cand(1, 100, "a"), cand(2, 600, "a")];
        assert_eq!(counts(&cluster(&inside, &p, 1)), vec![2]);

        let outside = vec![cand(1, 100, "a"), cand(2, 601, "a")];
        assert_eq!(counts(&cluster(&outside, &p, 1)), vec![1, 1]);
    }

    #[test]
    fn test_window_measured_from_anchor() {
        // 0 -> 400 -> 800: the third is 8s from the anchor
        let p = policy(5, 0);
        let input = vec![cand(1, 0, "a"), cand(2, 400, "a"), cand(3, 800, "a")];
        assert_eq!(counts(&cluster(&input, &p, 1)), vec![2, 1]);
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let p = policy(10, 1);
        // "ab" opens, "xy" opens, "xb" is within 1 of both: joins the older
        let input = vec![cand(1, 0, "ab"), cand(2, 10, "xy"), cand(3, 20, "xb")];
        let out = cluster(&input, &p, 1);
        assert_eq!(counts(&out), vec![2, 1]);
        assert_eq!(out.clusters[0].peers, vec!["ab", "xb"]);
    }

    #[test]
    fn test_unsorted_input_is_ordered_by_time() {
        let p = policy(5, 0);
        let input = vec![cand(2, 5_000, "b"), cand(1, 100, "a"), cand(3, 150, "a")];
        let out = cluster(&input, &p, 1);
        assert_eq!(counts(&out), vec![2, 1]);
        assert_eq!(out.clusters[0].representative.id, 1);
        assert_eq!(out.clusters[1].representative.id, 2);
    }

    #[test]
    fn test_cross_mode_isolation() {
        let mut top = cand(2, 110, "same");
        top.comment.mode = Mode::Top;
        let input = vec![cand(1, 100, "same"), top];

        let strict = policy(5, 0);
        assert_eq!(counts(&cluster(&input, &strict, 1)), vec![1, 1]);

        let cross = ClusterPolicy { cross_mode: true, ..strict };
        assert_eq!(counts(&cluster(&input, &cross, 1)), vec![2]);
    }

    #[test]
    fn test_excluded_kinds_pass_through() {
        let mut special = cand(2, 110, "x");
        special.comment.mode = Mode::Special;
        let mut exempt = cand(3, 120, "x");
        exempt.exempt = true;
        let input = vec![cand(1, 100, "x"), special, exempt, cand(4, 130, "x")];

        let p = ClusterPolicy { proc_type7: false, cross_mode: true, ..policy(5, 0) };
        let out = cluster(&input, &p, 1);
        assert_eq!(out.passthrough, 2);
        assert_eq!(counts(&out), vec![2, 1, 1]);
        let ids: Vec<i64> = out.clusters.iter().map(|m| m.representative.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_threshold_disabled() {
        let p = ClusterPolicy { threshold_cs: None, ..policy(5, 0) };
        let input = vec![cand(1, 100, "a"), cand(2, 100, "a")];
        let out = cluster(&input, &p, 4);
        assert_eq!(counts(&out), vec![1, 1]);
        assert_eq!(out.passthrough, 2);
    }

    #[test]
    fn test_parallel_matches_single_thread() {
        let p = policy(2, 1);
        let texts = ["aa", "ab", "zz", "aa", "zy", "qq"];
        let input: Vec<Candidate> = (0..240)
            .map(|i| {
                // bursts of comments separated by quiet gaps
                let t = (i / 12) * 1_000 + (i % 12) * 15;
                cand(i, t, texts[(i as usize * 7) % texts.len()])
            })
            .collect();

        let single = cluster(&input, &p, 1);
        let parallel = cluster(&input, &p, 4);
        assert_eq!(single, parallel);
        assert!(single.clusters.len() < input.len());
    }

    #[test]
    fn test_representative_follows_majority() {
        let texts = |ts: &[&str]| -> Vec<Candidate> {
            ts.iter().enumerate().map(|(i, t)| cand(i as i64, 100, t)).collect()
        };

        let p = ClusterPolicy { representative_percent: 50, ..policy(5, 1) };
        assert_eq!(cluster(&texts(&["a", "b", "b", "b"]), &p, 1).clusters[0].content, "b");

        let p = ClusterPolicy { representative_percent: 80, ..p };
        assert_eq!(cluster(&texts(&["a", "b", "b", "b"]), &p, 1).clusters[0].content, "a");

        let p = ClusterPolicy { representative_percent: 0, ..p };
        assert_eq!(cluster(&texts(&["x", "y", "y", "x"]), &p, 1).clusters[0].content, "x");
    }

    #[test]
    fn test_admission_compares_against_current_representative() {
        let p = policy(5, 1);
        let input = vec![
            cand(1, 0, "aaaa"),
            cand(2, 100, "aaab"),
            cand(3, 200, "aaab"),
            // distance 2 from the anchor, 1 from the representative
            cand(4, 300, "aabb"),
        ];
        let out = cluster(&input, &p, 1);
        assert_eq!(counts(&out), vec![4]);
        assert_eq!(out.clusters[0].content, "aaab");

        let again: Vec<Candidate> = out
            .clusters
            .iter()
            .map(|m| cand(m.representative.id, m.time_cs(), &m.content))
            .collect();
        assert_eq!(cluster(&again, &p, 1).clusters.len(), out.clusters.len());
    }

    #[test]
    fn test_type4_and_subtitle_pool_toggles() {
        use crate::core::comment::Pool;

        let mut bottom = cand(2, 110, "x");
        bottom.comment.mode = Mode::Bottom;
        let mut pooled = cand(3, 120, "x");
        pooled.comment.pool = Pool::Subtitle;
        let input = vec![cand(1, 100, "x"), bottom, pooled];
        let base = ClusterPolicy { cross_mode: true, ..policy(5, 0) };

        let neither = ClusterPolicy { proc_type4: false, proc_pool1: false, ..base };
        let out = cluster(&input, &neither, 1);
        assert_eq!(counts(&out), vec![1, 1, 1]);
        assert_eq!(out.passthrough, 2);

        let type4 = ClusterPolicy { proc_type4: true, proc_pool1: false, ..base };
        let out = cluster(&input, &type4, 1);
        assert_eq!(counts(&out), vec![2, 1]);
        assert_eq!(out.clusters[1].representative.id, 3);

        let pool1 = ClusterPolicy { proc_type4: false, proc_pool1: true, ..base };
        let out = cluster(&input, &pool1, 1);
        assert_eq!(counts(&out), vec![2, 1]);
        assert_eq!(out.clusters[0].peers.len(), 2);
        assert_eq!(out.clusters[1].representative.id, 2);

        let both = ClusterPolicy { proc_type4: true, proc_pool1: true, ..base };
        let out = cluster(&input, &both, 1);
        assert_eq!(counts(&out), vec![3]);
        assert_eq!(out.passthrough, 0);
    }
}
