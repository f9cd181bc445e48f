//! Post-clustering rules: drop, enlarge, shrink, mode elevation, marking
//! and slot combination.

use tracing::trace;

use crate::core::comment::{Mark, MarkPlacement, MergedComment, Mode};
use crate::infra::config::Config;

/// Scroll clusters at least this large are shown as top comments
pub const ELEVATION_MEMBER_COUNT: usize = 20;

/// Clusters up to this size keep their font size when enlarging
const ENLARGE_BASE: usize = 5;

/// Separator between texts combined into one line
const COMBINE_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub mark: Option<MarkPlacement>,
    pub mark_threshold: usize,
    pub subscript: bool,
    pub enlarge: bool,
    /// 0 disables
    pub shrink_threshold: usize,
    /// 0 disables
    pub drop_threshold: usize,
    pub mode_elevation: bool,
    /// Most clusters per combined line, 0 disables combination
    pub combine_limit: usize,
}

/// Counters produced by [`MergePolicy::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: Vec<MergedComment>,
    pub dropped_clusters: usize,
    pub dropped_members: usize,
    pub shrunk: usize,
    pub elevated: usize,
    /// Lines folded into an earlier line
    pub combined: usize,
}

impl MergePolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mark: cfg.danmu_mark.placement(),
            mark_threshold: cfg.mark_threshold,
            subscript: cfg.danmu_subscript,
            enlarge: cfg.enlarge,
            shrink_threshold: cfg.shrink_threshold,
            drop_threshold: cfg.drop_threshold,
            mode_elevation: cfg.mode_elevation,
            combine_limit: cfg.combine_threads,
        }
    }

    /// Apply every rule to clusters ordered by time
    pub fn apply(&self, clusters: Vec<MergedComment>) -> MergeOutcome {
        let mut out = MergeOutcome::default();
        let mut kept: Vec<MergedComment> = Vec::with_capacity(clusters.len());

        for mut m in clusters {
            let n = m.member_count;

            if self.drop_threshold > 0 && n > self.drop_threshold {
                trace!(id = m.representative.id, n, "dropping cluster");
                out.dropped_clusters += 1;
                out.dropped_members += n;
                continue;
            }

            if self.enlarge && n > ENLARGE_BASE {
                let rate = (n as f64).ln() / (ENLARGE_BASE as f64).ln();
                m.font_size = (m.font_size as f64 * rate).ceil() as u32;
                m.enlarged = true;
            }

            if self.shrink_threshold > 0 && n > self.shrink_threshold {
                m.font_size = m.font_size * 3 / 4;
                m.shrunk = true;
                out.shrunk += 1;
            }

            if self.mode_elevation && m.mode == Mode::Scroll && n >= ELEVATION_MEMBER_COUNT {
                m.mode = Mode::Top;
                m.elevated = true;
                out.elevated += 1;
            }

            if let Some(placement) = self.mark
                && n > 1
                && n >= self.mark_threshold
            {
                m.mark = Some(Mark { count: n, placement, subscript: self.subscript });
            }

            kept.push(m);
        }

        out.merged = self.combine(kept, &mut out.combined);
        out
    }

    /// Fold lines that share a rendering slot (same time and mode) into
    /// one, at most `combine_limit` per line. Special and raw comments
    /// carry structured payloads and are never combined.
    fn combine(&self, lines: Vec<MergedComment>, folded: &mut usize) -> Vec<MergedComment> {
        if self.combine_limit < 2 {
            return lines;
        }

        let mut out: Vec<MergedComment> = Vec::with_capacity(lines.len());
        let mut run = 1usize;

        for m in lines {
            let combinable = !matches!(m.mode, Mode::Special | Mode::Raw);

            if let Some(last) = out.last_mut()
                && combinable
                && run < self.combine_limit
                && last.time_cs() == m.time_cs()
                && last.mode == m.mode
            {
                last.content = format!("{}{COMBINE_SEPARATOR}{}", last.display_text(), m.display_text());
                last.mark = None;
                last.member_count += m.member_count;
                last.font_size = last.font_size.max(m.font_size);
                last.shrunk |= m.shrunk;
                last.enlarged |= m.enlarged;
                last.elevated |= m.elevated;
                last.peers.extend(m.peers);
                run += 1;
                *folded += 1;
                continue;
            }

            run = 1;
            out.push(m);
        }
        out
    }
}
