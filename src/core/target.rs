//! Robust parsing for "<path>[:<segment>[@<from>-<to>]]" with Windows support.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Single ingress file, optionally tagged as a binary segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTarget
{
    /// File path as provided
    pub file: PathBuf,
    /// Declared segment index
    pub segment: Option<u32>,
    /// Time slice in centiseconds, given on the command line in seconds
    pub time_range: Option<(i64, i64)>,
}

impl InputTarget
{
    /// Parse a target string like "dm.xml", "seg.bin:2",
    /// "seg.bin:2@360-720" or "C:\\dm\\seg.bin:1".
    ///
    /// A suffix that does not look like a segment spec is part of the path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or the time range is
    /// malformed.
    pub fn parse(input: &str) -> Result<Self>
    {
        let s = input.trim();

        // Split from the right once to avoid breaking "C:\..."
        let mut it = s.rsplitn(2, ':');
        let tail = it
            .next()
            .unwrap_or_default()
            .trim();
        let head = it.next();

        let (path_str, spec) = match head
        {
            Some(path) if looks_like_segment(tail) => (path.trim(), Some(tail)),
            _ => (s, None),
        };

        if path_str.is_empty()
        {
            bail!("missing file path in: {input}");
        }

        let file = PathBuf::from(path_str);

        let Some(spec) = spec
        else
        {
            return Ok(Self { file, segment: None, time_range: None });
        };

        let (index_str, range_str) = match spec.split_once('@')
        {
            Some((i, r)) => (i, Some(r)),
            None => (spec, None),
        };

        let segment: u32 = index_str
            .trim()
            .parse()
            .with_context(|| format!("invalid segment index: {spec}"))?;

        let time_range = match range_str
        {
            Some(r) =>
            {
                let (a, b) = r
                    .split_once('-')
                    .with_context(|| format!("time range must be FROM-TO: {r}"))?;
                let a: i64 = a
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid range start: {r}"))?;
                let b: i64 = b
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid range end: {r}"))?;

                if a > b
                {
                    bail!("start > end in time range: {r}");
                }
                Some((a * 100, b * 100))
            }
            None => None,
        };

        Ok(Self { file, segment: Some(segment), time_range })
    }
}

/// Digits, optionally followed by "@..."
fn looks_like_segment(tail: &str) -> bool
{
    let index = tail
        .split('@')
        .next()
        .unwrap_or_default();
    !index.is_empty()
        && index
            .bytes()
            .all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_plain_path()
    {
        let t = InputTarget::parse("comments/dm.xml").unwrap();
        assert_eq!(t.file, PathBuf::from("comments/dm.xml"));
        assert_eq!(t.segment, None);
    }

    #[test]
    fn test_segment_with_range()
    {
        let t = InputTarget::parse("seg.bin:2@360-720").unwrap();
        assert_eq!(t.file, PathBuf::from("seg.bin"));
        assert_eq!(t.segment, Some(2));
        assert_eq!(t.time_range, Some((36_000, 72_000)));
    }

    #[test]
    fn test_windows_paths()
    {
        let t = InputTarget::parse(r"C:\dm\seg.bin:1").unwrap();
        assert_eq!(t.file, PathBuf::from(r"C:\dm\seg.bin"));
        assert_eq!(t.segment, Some(1));

        let t = InputTarget::parse(r"C:\dm\dm.xml").unwrap();
        assert_eq!(t.file, PathBuf::from(r"C:\dm\dm.xml"));
        assert_eq!(t.segment, None);
    }

    #[test]
    fn test_bad_specs()
    {
        assert!(InputTarget::parse(":3").is_err());
        assert!(InputTarget::parse("seg.bin:1@720-360").is_err());
        assert!(InputTarget::parse("seg.bin:1@abc").is_err());
    }
}
