//! XML comment lists: `<i>` root with one `<d p="...">` element per comment.

use std::fmt::Write as _;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::trace;

use super::{FormatError, batch_id};
use crate::core::comment::{Comment, IngressBatch, MergedComment, Mode, Pool, SourceFormat};

/// Element currently collecting text
enum Open {
    Comment { p: Option<String>, text: String, bad: bool },
    ChatId(String),
}

/// Read the `p` attribute; None when missing or undecodable
fn p_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == b"p")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Parse `time,mode,size,color,ctime,pool,hash,id[,weight]`
fn parse_comment(p: &str, content: String) -> Option<Comment> {
    let fields: Vec<&str> = p.split(',').collect();
    if fields.len() < 8 {
        return None;
    }

    let secs: f64 = fields[0].trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let mode_code: i64 = fields[1].trim().parse().ok()?;
    let font_size: u32 = fields[2].trim().parse().ok()?;
    let color: u32 = fields[3].trim().parse().ok()?;
    let ctime: i64 = fields[4].trim().parse().ok()?;
    let pool = Pool::from_wire(fields[5].trim().parse().ok()?)?;
    let mode = Mode::from_wire(mode_code, pool)?;
    let id: i64 = fields[7].trim().parse().ok()?;
    let weight: u8 = fields
        .get(8)
        .and_then(|w| w.trim().parse::<i64>().ok())
        .map(|w| w.clamp(0, u8::MAX as i64) as u8)
        .unwrap_or(0);

    Some(Comment {
        id,
        time_cs: (secs * 100.0).round().max(0.0) as i64,
        mode,
        wire_mode: mode_code as u8,
        pool,
        font_size,
        color: color & 0xff_ffff,
        ctime,
        weight,
        sender_hash: fields[6].trim().to_string(),
        content,
        extra: None,
    })
}

pub(super) fn decode(raw: &[u8]) -> Result<IngressBatch, FormatError> {
    let text = std::str::from_utf8(raw).map_err(|e| FormatError::Encoding(e.to_string()))?;
    let mut reader = Reader::from_str(text);

    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut open: Option<Open> = None;
    // Unknown elements nested inside the open element
    let mut inner: usize = 0;
    let mut chat_id: Option<String> = None;
    let mut comments: Vec<Comment> = Vec::new();
    let mut malformed = 0;

    loop {
        let event = reader.read_event().map_err(|e| FormatError::Xml {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                if open.is_some() {
                    // Inline markup: its text still belongs to the record
                    inner += 1;
                    continue;
                }
                open = match e.name().as_ref() {
                    b"d" => Some(Open::Comment { p: p_attr(&e), text: String::new(), bad: false }),
                    b"chatid" => Some(Open::ChatId(String::new())),
                    // Unknown elements are ignored
                    _ => None,
                };
            }
            Event::Empty(e) => {
                saw_root = true;
                if open.is_none() && e.name().as_ref() == b"d" {
                    match p_attr(&e).and_then(|p| parse_comment(&p, String::new())) {
                        Some(c) => comments.push(c),
                        None => malformed += 1,
                    }
                }
            }
            Event::Text(t) => match &mut open {
                Some(Open::Comment { text, bad, .. }) => match t.unescape() {
                    Ok(s) => text.push_str(&s),
                    Err(_) => *bad = true,
                },
                Some(Open::ChatId(buf)) => {
                    if let Ok(s) = t.unescape() {
                        buf.push_str(s.trim());
                    }
                }
                None => {}
            },
            Event::CData(c) => {
                if let Some(Open::Comment { text, .. }) = &mut open {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if inner > 0 {
                    inner -= 1;
                    continue;
                }
                match open.take() {
                    Some(Open::Comment { p, text, bad }) => {
                        let parsed = match (p, bad) {
                            (Some(p), false) => parse_comment(&p, text),
                            _ => None,
                        };
                        match parsed {
                            Some(c) => comments.push(c),
                            None => {
                                trace!("dropping malformed <d> record");
                                malformed += 1;
                            }
                        }
                    }
                    Some(Open::ChatId(id)) => chat_id = Some(id),
                    None => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(FormatError::MissingRoot);
    }
    if depth > 0 {
        return Err(FormatError::TruncatedXml(depth));
    }

    Ok(IngressBatch {
        batch_id: batch_id([raw]),
        source: SourceFormat::XmlPool,
        segment_index: None,
        chat_id,
        comments,
        malformed,
    })
}

/// Escape the five XML special characters
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters other than tab/newline are invalid in XML 1.0
            c if c.is_control() && c != '\t' && c != '\n' => {}
            c => out.push(c),
        }
    }
    out
}

pub(super) fn encode(merged: &[MergedComment], chat_id: Option<&str>) -> String {
    let mut out = String::with_capacity(128 + merged.len() * 96);

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n");
    out.push_str("<chatserver>chat.bilibili.com</chatserver>\n");
    if let Some(id) = chat_id {
        let _ = writeln!(out, "<chatid>{}</chatid>", escape_xml(id));
    }
    let _ = writeln!(out, "<maxlimit>{}</maxlimit>", merged.len());

    for m in merged {
        let c = &m.representative;
        let cs = c.time_cs.max(0);
        let _ = writeln!(
            out,
            "<d p=\"{}.{:02},{},{},{},{},{},{},{},{}\">{}</d>",
            cs / 100,
            cs % 100,
            c.wire_mode_for(m.mode),
            m.font_size,
            c.color,
            c.ctime,
            c.pool.wire_code(),
            escape_xml(&c.sender_hash),
            c.id,
            c.weight,
            escape_xml(&m.display_text()),
        );
    }

    out.push_str("</i>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comment::sample;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<i>
  <chatserver>chat.bilibili.com</chatserver>
  <chatid>12345</chatid>
  <source>k-v</source>
  <d p="1.50,1,25,16777215,1700000000,0,abcd1234,101,10">哈哈哈</d>
  <d p="2.00,4,25,255,1700000001,1,abcd1235,102">字幕 &amp; more</d>
  <d p="3.00,99,25,255,1700000002,0,abcd1236,103">bad mode</d>
  <d p="3.00,1,25">too short</d>
  <d p="4.25,7,25,0,1700000003,0,abcd1237,104"><![CDATA[[0,0,"1-1",4.5,"x"]]]></d>
</i>"#;

    #[test]
    fn test_decode_document() {
        let batch = decode(DOC.as_bytes()).unwrap();
        assert_eq!(batch.chat_id.as_deref(), Some("12345"));
        assert_eq!(batch.malformed, 2);
        assert_eq!(batch.comments.len(), 3);

        let first = &batch.comments[0];
        assert_eq!(first.time_cs, 150);
        assert_eq!(first.mode, Mode::Scroll);
        assert_eq!(first.weight, 10);

        let second = &batch.comments[1];
        assert_eq!(second.mode, Mode::Subtitle);
        assert_eq!(second.content, "字幕 & more");
        assert_eq!(second.weight, 0);

        assert_eq!(batch.comments[2].mode, Mode::Special);
        assert!(batch.comments[2].content.starts_with("[0,0,"));
    }

    #[test]
    fn test_truncated_document_fails() {
        let cut = &DOC[..DOC.find("<d p=\"2.00").unwrap()];
        assert_eq!(decode(cut.as_bytes()).unwrap_err(), FormatError::TruncatedXml(1));
    }

    #[test]
    fn test_text_without_elements_fails() {
        assert_eq!(decode(b"just text").unwrap_err(), FormatError::MissingRoot);
    }

    #[test]
    fn test_encode_roundtrip_preserves_records() {
        let batch = decode(DOC.as_bytes()).unwrap();
        let merged: Vec<MergedComment> =
            batch.comments.iter().cloned().map(MergedComment::passthrough).collect();
        let xml = encode(&merged, batch.chat_id.as_deref());

        let again = decode(xml.as_bytes()).unwrap();
        assert_eq!(again.comments, batch.comments);
        assert_eq!(again.chat_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_xml("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;&lt;/a&gt;");
        assert_eq!(escape_xml("a\u{1}b"), "ab");
    }

    #[test]
    fn test_inline_markup_keeps_record() {
        let doc = r#"<i>
  <d p="1.00,1,25,16777215,1700000000,0,aa01,1">hello <b>bold</b> world</d>
  <d p="2.00,1,25,16777215,1700000001,0,aa02,2">next</d>
</i>"#;
        let batch = decode(doc.as_bytes()).unwrap();
        assert_eq!(batch.malformed, 0);
        let texts: Vec<&str> = batch.comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["hello bold world", "next"]);
    }

    #[test]
    fn test_encode_marks_and_time_format() {
        let mut m = MergedComment::passthrough(sample(7, 1_205, "x"));
        m.mark = Some(crate::core::comment::Mark {
            count: 3,
            placement: crate::core::comment::MarkPlacement::Suffix,
            subscript: false,
        });
        let xml = encode(&[m], None);
        assert!(xml.contains("<d p=\"12.05,1,25,16777215,1700000000,0,00000007,7,10\">x ×3</d>"));
        assert!(!xml.contains("<chatid>"));
    }
}
