use anyhow::{Context, Result};
use positioned_io::ReadAt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Shared read-only handle; chunks are read by offset, so concurrent
/// uploads of one file need no seeking or locking.
#[derive(Clone)]
pub struct ChunkReader {
    file: Arc<File>,
    size: u64,
    chunk_size: u64,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk size must be greater than 0");
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        Ok(Self {
            file: Arc::new(file),
            size,
            chunk_size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// Bytes of chunk `index`; the last chunk may be shorter. Blocking.
    pub fn read_chunk(&self, index: u64) -> Result<Vec<u8>> {
        let start = index
            .checked_mul(self.chunk_size)
            .filter(|start| *start < self.size)
            .with_context(|| format!("chunk {} is past end of file", index))?;
        let len = (self.size - start).min(self.chunk_size) as usize;

        let mut buffer = vec![0u8; len];
        self.file
            .read_exact_at(start, &mut buffer)
            .with_context(|| format!("Failed to read chunk at offset {}", start))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn chunks_cover_file_with_short_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let reader = ChunkReader::open(&path, 4).unwrap();
        assert_eq!(reader.size(), 10);
        assert_eq!(reader.total_chunks(), 3);
        assert_eq!(reader.read_chunk(0).unwrap(), b"0123");
        assert_eq!(reader.read_chunk(2).unwrap(), b"89");
        assert!(reader.read_chunk(3).is_err());
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let reader = ChunkReader::open(&path, 4).unwrap();
        assert_eq!(reader.total_chunks(), 0);
        assert!(reader.read_chunk(0).is_err());
    }
}
