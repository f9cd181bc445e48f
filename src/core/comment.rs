//! Canonical comment records shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// On-screen placement of a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scroll,
    Top,
    Bottom,
    Special,
    Subtitle,
    Raw,
}

impl Mode {
    /// Map a wire mode code to a mode. Bottom comments in the subtitle
    /// pool are subtitles. Returns None for unknown codes.
    pub fn from_wire(code: i64, pool: Pool) -> Option<Self> {
        match code {
            1 | 2 | 3 | 6 => Some(Mode::Scroll),
            4 if pool == Pool::Subtitle => Some(Mode::Subtitle),
            4 => Some(Mode::Bottom),
            5 => Some(Mode::Top),
            7 => Some(Mode::Special),
            8 | 9 => Some(Mode::Raw),
            _ => None,
        }
    }

    /// Canonical wire code for this mode
    pub fn wire_code(self) -> u8 {
        match self {
            Mode::Scroll => 1,
            Mode::Bottom | Mode::Subtitle => 4,
            Mode::Top => 5,
            Mode::Special => 7,
            Mode::Raw => 8,
        }
    }

    /// Type-4 comments (bottom-anchored, including subtitles)
    pub fn is_type4(self) -> bool {
        matches!(self, Mode::Bottom | Mode::Subtitle)
    }
}

/// Comment pool the platform stored the comment in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Normal,
    Subtitle,
    Special,
}

impl Pool {
    pub fn from_wire(code: i64) -> Option<Self> {
        match code {
            0 => Some(Pool::Normal),
            1 => Some(Pool::Subtitle),
            2 => Some(Pool::Special),
            _ => None,
        }
    }

    pub fn wire_code(self) -> u8 {
        match self {
            Pool::Normal => 0,
            Pool::Subtitle => 1,
            Pool::Special => 2,
        }
    }
}

/// A single parsed comment. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Platform id, unique within one ingress
    pub id: i64,
    /// Offset into the video in centiseconds
    pub time_cs: i64,
    pub mode: Mode,
    /// Exact mode code as received (2, 3 and 6 collapse into Scroll)
    pub wire_mode: u8,
    pub pool: Pool,
    pub font_size: u32,
    /// 24-bit RGB
    pub color: u32,
    /// Send timestamp (unix seconds)
    pub ctime: i64,
    /// Platform weight, 0-11
    pub weight: u8,
    pub sender_hash: String,
    pub content: String,
    /// Opaque per-record payload from binary ingress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Vec<u8>>,
}

impl Comment {
    /// Wire mode to emit for `mode`: the received code when the mode is
    /// unchanged, otherwise the canonical code of the new mode.
    pub fn wire_mode_for(&self, mode: Mode) -> u8 {
        if mode == self.mode { self.wire_mode } else { mode.wire_code() }
    }
}

/// Where an ingress batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    XmlPool,
    BinarySegment,
}

/// Decoded ingress: comments in ingress order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngressBatch {
    /// Content id of the raw payload(s), xxh64 hex
    pub batch_id: String,
    pub source: SourceFormat,
    /// Segment index for a single binary segment; None for XML or
    /// concatenated streams
    pub segment_index: Option<u32>,
    /// `<chatid>` of the XML document, echoed back on XML egress
    pub chat_id: Option<String>,
    pub comments: Vec<Comment>,
    /// Records dropped during decoding
    pub malformed: usize,
}

/// Visual "×N" annotation attached to a merged comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mark {
    pub count: usize,
    pub placement: MarkPlacement,
    /// Render as a separate subscript field rather than inline text
    pub subscript: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkPlacement {
    Prefix,
    Suffix,
}

const SUBSCRIPT_DIGITS: [char; 10] = ['₀', '₁', '₂', '₃', '₄', '₅', '₆', '₇', '₈', '₉'];

impl Mark {
    /// Inline annotation text, e.g. "×12"
    pub fn label(&self) -> String {
        format!("×{}", self.count)
    }

    /// Subscript rendering, e.g. "₍×₁₂₎"
    pub fn subscript_label(&self) -> String {
        let digits: String = self
            .count
            .to_string()
            .chars()
            .filter_map(|c| c.to_digit(10))
            .map(|d| SUBSCRIPT_DIGITS[d as usize])
            .collect();
        format!("₍×{digits}₎")
    }

    /// Compose the displayed text for `content`
    pub fn apply(&self, content: &str) -> String {
        if self.subscript {
            let sub = self.subscript_label();
            return match self.placement {
                MarkPlacement::Prefix => format!("{sub}{content}"),
                MarkPlacement::Suffix => format!("{content}{sub}"),
            };
        }
        match self.placement {
            MarkPlacement::Prefix => format!("{} {content}", self.label()),
            MarkPlacement::Suffix => format!("{content} {}", self.label()),
        }
    }
}

/// One output line: a cluster collapsed into its representative
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedComment {
    /// Representative record (anchor styling)
    pub representative: Comment,
    /// Representative text before any annotation
    pub content: String,
    pub mode: Mode,
    pub font_size: u32,
    pub member_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<Mark>,
    pub shrunk: bool,
    pub enlarged: bool,
    pub elevated: bool,
    /// Member contents in arrival order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
}

impl MergedComment {
    /// Singleton wrapper around an untouched comment
    pub fn passthrough(comment: Comment) -> Self {
        Self {
            content: comment.content.clone(),
            mode: comment.mode,
            font_size: comment.font_size,
            member_count: 1,
            mark: None,
            shrunk: false,
            enlarged: false,
            elevated: false,
            peers: vec![comment.content.clone()],
            representative: comment,
        }
    }

    /// Text shown to the viewer, annotation included
    pub fn display_text(&self) -> String {
        match &self.mark {
            Some(mark) => mark.apply(&self.content),
            None => self.content.clone(),
        }
    }

    pub fn time_cs(&self) -> i64 {
        self.representative.time_cs
    }
}

#[cfg(test)]
pub(crate) fn sample(id: i64, time_cs: i64, content: &str) -> Comment {
    Comment {
        id,
        time_cs,
        mode: Mode::Scroll,
        wire_mode: 1,
        pool: Pool::Normal,
        font_size: 25,
        color: 0xffffff,
        ctime: 1_700_000_000,
        weight: 10,
        sender_hash: format!("{id:08x}"),
        content: content.to_string(),
        extra: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_mapping() {
        assert_eq!(Mode::from_wire(1, Pool::Normal), Some(Mode::Scroll));
        assert_eq!(Mode::from_wire(6, Pool::Normal), Some(Mode::Scroll));
        assert_eq!(Mode::from_wire(4, Pool::Normal), Some(Mode::Bottom));
        assert_eq!(Mode::from_wire(4, Pool::Subtitle), Some(Mode::Subtitle));
        assert_eq!(Mode::from_wire(0, Pool::Normal), None);
        assert_eq!(Mode::from_wire(10, Pool::Normal), None);
        assert_eq!(Pool::from_wire(3), None);
    }

    #[test]
    fn test_wire_mode_preserved_unless_changed() {
        let mut c = sample(1, 0, "x");
        c.wire_mode = 6;
        assert_eq!(c.wire_mode_for(Mode::Scroll), 6);
        assert_eq!(c.wire_mode_for(Mode::Top), 5);
    }

    #[test]
    fn test_mark_rendering() {
        let inline = Mark { count: 12, placement: MarkPlacement::Suffix, subscript: false };
        assert_eq!(inline.apply("草"), "草 ×12");

        let sub = Mark { count: 12, placement: MarkPlacement::Prefix, subscript: true };
        assert_eq!(sub.apply("草"), "₍×₁₂₎草");
    }
}
