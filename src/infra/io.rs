use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// Raw payload bytes, mapped for large dumps
pub enum FileContent {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl AsRef<[u8]> for FileContent {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileContent::Mapped(mmap) => mmap,
            FileContent::Buffered(bytes) => bytes.as_slice(),
        }
    }
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: read-only mapping; the payload is copied out before the
        // file could be rewritten by this process
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileContent::Mapped(mmap))
    } else {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(FileContent::Buffered(bytes))
    }
}

/// Write egress to `path`, or stdout when `path` is None
pub fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(p) => {
            if let Some(parent) = p.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(p, bytes).with_context(|| format!("Failed to write {}", p.display()))
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes).context("Failed to write to stdout")?;
            out.flush().context("Failed to flush stdout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_is_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dm.xml");
        std::fs::write(&path, b"<i></i>").unwrap();

        let content = read_file_smart(&path).unwrap();
        assert!(matches!(content, FileContent::Buffered(_)));
        assert_eq!(content.as_ref(), b"<i></i>");
    }

    #[test]
    fn test_large_file_is_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.bin");
        let data = vec![7u8; (MMAP_THRESHOLD + 1) as usize];
        std::fs::write(&path, &data).unwrap();

        let content = read_file_smart(&path).unwrap();
        assert!(matches!(content, FileContent::Mapped(_)));
        assert_eq!(content.as_ref().len(), data.len());
    }

    #[test]
    fn test_write_output_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.xml");
        write_output(Some(&path), b"ok").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ok");
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_file_smart("/definitely/not/here.xml").err().unwrap();
        assert!(err.to_string().contains("Failed to read metadata"));
    }
}
