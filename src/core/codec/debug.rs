//! Debug dump: one JSON object per output comment.

use itertools::Itertools;
use serde::Serialize;
use tracing::warn;

use crate::core::comment::{Mode, MergedComment, Pool};

#[derive(Serialize)]
struct DebugLine<'a> {
    id: i64,
    time_cs: i64,
    mode: Mode,
    pool: Pool,
    font_size: u32,
    color: String,
    count: usize,
    text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    shrunk: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    enlarged: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    elevated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    peers: Option<&'a [String]>,
}

pub(super) fn encode(merged: &[MergedComment], show_peers: bool) -> String {
    merged
        .iter()
        .filter_map(|m| {
            let line = DebugLine {
                id: m.representative.id,
                time_cs: m.time_cs(),
                mode: m.mode,
                pool: m.representative.pool,
                font_size: m.font_size,
                color: format!("#{:06x}", m.representative.color),
                count: m.member_count,
                text: m.display_text(),
                shrunk: m.shrunk,
                enlarged: m.enlarged,
                elevated: m.elevated,
                peers: show_peers.then_some(m.peers.as_slice()),
            };
            match serde_json::to_string(&line) {
                Ok(json) => Some(json + "\n"),
                Err(e) => {
                    warn!(id = line.id, error = %e, "skipping unserializable debug line");
                    None
                }
            }
        })
        .join("")
}
