//! Binary segment messages, declared by hand with prost derives.

use tracing::trace;

use super::{FormatError, Segment};
use crate::core::comment::{Comment, MergedComment, Mode, Pool};

/// One segment reply: the comments of a time slice
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DmSegReply {
    #[prost(message, repeated, tag = "1")]
    pub elems: Vec<DanmakuElem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DanmakuElem {
    #[prost(int64, tag = "1")]
    pub id: i64,
    /// Offset in milliseconds
    #[prost(int32, tag = "2")]
    pub progress: i32,
    #[prost(int32, tag = "3")]
    pub mode: i32,
    #[prost(int32, tag = "4")]
    pub fontsize: i32,
    #[prost(uint32, tag = "5")]
    pub color: u32,
    #[prost(string, tag = "6")]
    pub mid_hash: String,
    #[prost(string, tag = "7")]
    pub content: String,
    #[prost(int64, tag = "8")]
    pub ctime: i64,
    #[prost(int32, tag = "9")]
    pub weight: i32,
    #[prost(string, tag = "10")]
    pub action: String,
    #[prost(int32, tag = "11")]
    pub pool: i32,
    #[prost(string, tag = "12")]
    pub id_str: String,
}

impl From<&Comment> for DanmakuElem {
    fn from(c: &Comment) -> Self {
        Self {
            id: c.id,
            progress: (c.time_cs.saturating_mul(10)).clamp(0, i32::MAX as i64) as i32,
            mode: c.wire_mode as i32,
            fontsize: c.font_size as i32,
            color: c.color,
            mid_hash: c.sender_hash.clone(),
            content: c.content.clone(),
            ctime: c.ctime,
            weight: c.weight as i32,
            action: c
                .extra
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
            pool: c.pool.wire_code() as i32,
            id_str: c.id.to_string(),
        }
    }
}

/// Validate one element; None when an enum field is out of range
fn comment_from_elem(e: DanmakuElem) -> Option<Comment> {
    let pool = Pool::from_wire(e.pool as i64)?;
    let mode = Mode::from_wire(e.mode as i64, pool)?;
    let wire_mode = u8::try_from(e.mode).ok()?;

    Some(Comment {
        id: e.id,
        time_cs: (e.progress.max(0) / 10) as i64,
        mode,
        wire_mode,
        pool,
        font_size: e.fontsize.max(0) as u32,
        color: e.color & 0xff_ffff,
        ctime: e.ctime,
        weight: e.weight.clamp(0, u8::MAX as i32) as u8,
        sender_hash: e.mid_hash,
        content: e.content,
        extra: (!e.action.is_empty()).then(|| e.action.into_bytes()),
    })
}

pub(super) struct DecodedSegment {
    pub comments: Vec<Comment>,
    pub malformed: usize,
}

pub(super) fn decode_segment(seg: &Segment) -> Result<DecodedSegment, FormatError> {
    use prost::Message;

    let reply = DmSegReply::decode(seg.bytes.as_slice()).map_err(|e| {
        FormatError::TruncatedSegment {
            index: seg.index,
            message: e.to_string(),
        }
    })?;

    let total = reply.elems.len();
    let comments: Vec<Comment> = reply
        .elems
        .into_iter()
        .filter_map(|e| {
            let id = e.id;
            let parsed = comment_from_elem(e);
            if parsed.is_none() {
                trace!(id, "dropping element with unknown mode/pool");
            }
            parsed
        })
        .collect();

    Ok(DecodedSegment {
        malformed: total - comments.len(),
        comments,
    })
}

/// Encode merged comments as a single segment reply
pub fn encode(merged: &[MergedComment]) -> Vec<u8> {
    use prost::Message;

    let elems = merged
        .iter()
        .map(|m| {
            let mut elem = DanmakuElem::from(&m.representative);
            elem.mode = m.representative.wire_mode_for(m.mode) as i32;
            elem.fontsize = m.font_size as i32;
            elem.content = m.display_text();
            elem
        })
        .collect();

    DmSegReply { elems }.encode_to_vec()
}
