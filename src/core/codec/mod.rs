//! Wire formats: XML comment lists and binary (protobuf) segments in,
//! XML / binary / debug dumps out.
//!
//! Decoding is tolerant per record (unknown enum values and short fields
//! drop the record and bump `malformed`) but strict per payload: a
//! truncated document or segment fails the whole decode.

pub mod debug;
pub mod proto;
pub mod xml;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::comment::{Comment, IngressBatch, MergedComment, SourceFormat};

/// Payload-level decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("truncated XML document: {0} element(s) left open")]
    TruncatedXml(usize),
    #[error("XML document has no root element")]
    MissingRoot,
    #[error("truncated binary segment {index}: {message}")]
    TruncatedSegment { index: u32, message: String },
    #[error("no segments to decode")]
    NoSegments,
}

/// Caller's guess about the payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatHint {
    /// Sniff: a leading `<` means XML, anything else is binary
    #[default]
    Auto,
    Xml,
    Binary,
}

/// Output format requested by the player or a debug view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Egress {
    Xml,
    Binary,
    Debug { show_peers: bool },
}

/// One time-sliced binary segment of a paginated feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Declared position in the feed (1-based on the platform)
    pub index: u32,
    /// Time slice covered, in centiseconds
    pub time_range: Option<(i64, i64)>,
    pub bytes: Vec<u8>,
}

/// Content id of one or more raw payloads (xxh64, hex)
pub fn batch_id<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = xxhash_rust::xxh64::Xxh64::new(0);
    for p in parts {
        hasher.update(&(p.len() as u64).to_le_bytes());
        hasher.update(p);
    }
    format!("{:016x}", hasher.digest())
}

fn sniff(raw: &[u8]) -> FormatHint {
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => FormatHint::Xml,
        _ => FormatHint::Binary,
    }
}

/// Decode one complete payload
#[instrument(level = "debug", skip(raw), fields(len = raw.len()))]
pub fn decode(raw: &[u8], hint: FormatHint) -> Result<IngressBatch, FormatError> {
    let hint = match hint {
        FormatHint::Auto => sniff(raw),
        other => other,
    };

    match hint {
        FormatHint::Binary => decode_segments(vec![Segment {
            index: 0,
            time_range: None,
            bytes: raw.to_vec(),
        }])
        .map(|mut batch| {
            batch.segment_index = Some(0);
            batch
        }),
        _ => xml::decode(raw),
    }
}

/// Decode and concatenate binary segments in ascending index order.
///
/// Gaps in the index sequence are skipped; a repeated index keeps the
/// first segment seen.
#[instrument(level = "debug", skip(segments), fields(count = segments.len()))]
pub fn decode_segments(mut segments: Vec<Segment>) -> Result<IngressBatch, FormatError> {
    if segments.is_empty() {
        return Err(FormatError::NoSegments);
    }

    // Stable sort keeps arrival order among duplicate indices
    segments.sort_by_key(|s| s.index);
    segments.dedup_by_key(|s| s.index);

    let id = batch_id(segments.iter().map(|s| s.bytes.as_slice()));

    let mut comments: Vec<Comment> = Vec::new();
    let mut malformed = 0;
    let mut prev: Option<u32> = None;

    for seg in &segments {
        if let Some(p) = prev
            && seg.index > p + 1
        {
            debug!(from = p, to = seg.index, "segment gap, skipping ahead");
        }
        prev = Some(seg.index);

        let decoded = proto::decode_segment(seg)?;
        debug!(
            index = seg.index,
            range = ?seg.time_range,
            comments = decoded.comments.len(),
            malformed = decoded.malformed,
            "decoded segment"
        );
        comments.extend(decoded.comments);
        malformed += decoded.malformed;
    }

    let segment_index = match segments.as_slice() {
        [only] => Some(only.index),
        _ => None,
    };

    Ok(IngressBatch {
        batch_id: id,
        source: SourceFormat::BinarySegment,
        segment_index,
        chat_id: None,
        comments,
        malformed,
    })
}

/// Encode processed comments. Output is a pure function of the input.
pub fn encode(merged: &[MergedComment], egress: Egress, chat_id: Option<&str>) -> Vec<u8> {
    match egress {
        Egress::Xml => xml::encode(merged, chat_id).into_bytes(),
        Egress::Binary => proto::encode(merged),
        Egress::Debug { show_peers } => debug::encode(merged, show_peers).into_bytes(),
    }
}

/// Encode raw ingress comments as if each were its own cluster
pub fn encode_comments(comments: &[Comment], egress: Egress, chat_id: Option<&str>) -> Vec<u8> {
    let wrapped: Vec<MergedComment> = comments
        .iter()
        .cloned()
        .map(MergedComment::passthrough)
        .collect();
    encode(&wrapped, egress, chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comment::sample;
    use prost::Message;

    fn segment(index: u32, comments: &[Comment]) -> Segment {
        let merged: Vec<MergedComment> =
            comments.iter().cloned().map(MergedComment::passthrough).collect();
        Segment { index, time_range: None, bytes: proto::encode(&merged) }
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"  \n<?xml"), FormatHint::Xml);
        assert_eq!(sniff(&[0x0a, 0x10]), FormatHint::Binary);
        assert_eq!(sniff(b""), FormatHint::Binary);
    }

    #[test]
    fn test_segments_sorted_with_gaps_and_duplicates() {
        let a = segment(3, &[sample(3, 30_000, "c")]);
        let b = segment(1, &[sample(1, 100, "a")]);
        let dup = segment(1, &[sample(9, 200, "dup")]);

        let batch = decode_segments(vec![a, b, dup]).unwrap();
        let ids: Vec<i64> = batch.comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(batch.segment_index, None);
        assert_eq!(batch.source, SourceFormat::BinarySegment);
    }

    #[test]
    fn test_truncated_segment_fails() {
        let mut seg = segment(2, &[sample(1, 100, "hello world")]);
        seg.bytes.truncate(seg.bytes.len() - 3);
        let err = decode_segments(vec![seg]).unwrap_err();
        assert!(matches!(err, FormatError::TruncatedSegment { index: 2, .. }));
    }

    #[test]
    fn test_empty_segment_list() {
        assert_eq!(decode_segments(Vec::new()).unwrap_err(), FormatError::NoSegments);
    }

    #[test]
    fn test_auto_decode_binary() {
        let reply = proto::DmSegReply { elems: vec![proto::DanmakuElem::from(&sample(5, 120, "x"))] };
        let batch = decode(&reply.encode_to_vec(), FormatHint::Auto).unwrap();
        assert_eq!(batch.segment_index, Some(0));
        assert_eq!(batch.comments[0].time_cs, 120);
    }

    #[test]
    fn test_batch_id_stable() {
        let a = batch_id([b"abc".as_slice()]);
        let b = batch_id([b"abc".as_slice()]);
        let c = batch_id([b"ab".as_slice(), b"c".as_slice()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
