//! Per-transfer scratch directory holding chunk payloads keyed by index.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use uuid::Uuid;

use super::hasher::StreamingDigest;

// Copy buffer for reassembly; peak memory stays at this, not the file size
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of streaming every chunk into the destination file
#[derive(Debug, Clone)]
pub struct AssembledFile {
    pub bytes_written: u64,
    pub sha256: String,
}

/// `.<name>.<uuid>.part` beside `destination`
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
}

/// Name of an in-progress reassembly, hidden from listings.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".part")
}

#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Create `<root>/<transfer_id>`, failing if it already exists.
    pub async fn create(root: &Path, transfer_id: &str) -> io::Result<Self> {
        fs::create_dir_all(root).await?;
        let dir = root.join(transfer_id);
        fs::create_dir(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}.chunk", index))
    }

    /// Store the payload for `index`, replacing any earlier one.
    ///
    /// Bytes go to a uniquely named staging file first and are renamed into
    /// place, so two writers racing on one index never interleave.
    pub async fn write(&self, index: u64, data: &[u8]) -> io::Result<()> {
        let staging = self
            .dir
            .join(format!("{}.{}.part", index, Uuid::new_v4().simple()));

        let written = async {
            let mut file = File::create(&staging).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, self.chunk_path(index)).await
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        written
    }

    pub async fn read(&self, index: u64) -> io::Result<Vec<u8>> {
        fs::read(self.chunk_path(index)).await
    }

    /// Concatenate chunks `0..total_chunks` in index order into `destination`.
    ///
    /// The file is built under a unique staging name next to `destination`
    /// and renamed over it, so a concurrent completion of the same name or a
    /// failed reassembly never leaves a mixed or truncated file behind.
    pub async fn assemble_into(
        &self,
        total_chunks: u64,
        destination: &Path,
    ) -> io::Result<AssembledFile> {
        let staging = staging_path(destination);
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent).await?;
        }

        let assembled = async {
            let assembled = self.concatenate(total_chunks, &staging).await?;
            fs::rename(&staging, destination).await?;
            Ok::<_, io::Error>(assembled)
        }
        .await;

        if assembled.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        assembled
    }

    async fn concatenate(&self, total_chunks: u64, target: &Path) -> io::Result<AssembledFile> {
        let mut out = BufWriter::new(File::create(target).await?);
        let mut digest = StreamingDigest::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut bytes_written = 0u64;

        for index in 0..total_chunks {
            let mut chunk = File::open(self.chunk_path(index)).await?;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                bytes_written += n as u64;
            }
        }

        out.flush().await?;
        out.into_inner().sync_all().await?;

        Ok(AssembledFile {
            bytes_written,
            sha256: digest.finish(),
        })
    }

    /// Delete the scratch directory and everything in it.
    pub async fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::hasher::digest_hex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_rejects_existing_directory() {
        let root = TempDir::new().unwrap();
        ChunkStore::create(root.path(), "trans_1").await.unwrap();
        let err = ChunkStore::create(root.path(), "trans_1").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn rewrite_replaces_payload_and_leaves_no_staging_files() {
        let root = TempDir::new().unwrap();
        let store = ChunkStore::create(root.path(), "trans_1").await.unwrap();

        store.write(0, b"first").await.unwrap();
        store.write(0, b"second").await.unwrap();
        assert_eq!(store.read(0).await.unwrap(), b"second");

        let mut entries = std::fs::read_dir(store.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        entries.sort();
        assert_eq!(entries, vec!["0.chunk".to_string()]);
    }

    #[tokio::test]
    async fn assemble_follows_index_order_not_write_order() {
        let root = TempDir::new().unwrap();
        let store = ChunkStore::create(root.path(), "trans_1").await.unwrap();

        store.write(2, b"cc").await.unwrap();
        store.write(0, b"aaaa").await.unwrap();
        store.write(1, b"bbbb").await.unwrap();

        let dest = root.path().join("out").join("file.bin");
        let assembled = store.assemble_into(3, &dest).await.unwrap();

        let content = std::fs::read(&dest).unwrap();
        assert_eq!(content, b"aaaabbbbcc");
        assert_eq!(assembled.bytes_written, 10);
        assert_eq!(assembled.sha256, digest_hex(b"aaaabbbbcc"));
    }

    #[tokio::test]
    async fn failed_assembly_keeps_previous_file_and_no_staging() {
        let root = TempDir::new().unwrap();
        let shared = root.path().join("shared");
        std::fs::create_dir(&shared).unwrap();
        let dest = shared.join("out.bin");
        std::fs::write(&dest, b"earlier upload").unwrap();

        let store = ChunkStore::create(root.path(), "trans_1").await.unwrap();
        store.write(0, b"a").await.unwrap();

        let err = store.assemble_into(2, &dest).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        assert_eq!(std::fs::read(&dest).unwrap(), b"earlier upload");
        let names: Vec<String> = std::fs::read_dir(&shared)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["out.bin".to_string()]);
    }

    #[test]
    fn staging_names_are_hidden_and_unique() {
        let dest = Path::new("/srv/shared/a.bin");
        let first = staging_path(dest);
        let second = staging_path(dest);

        assert_ne!(first, second);
        assert_eq!(first.parent(), dest.parent());
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".a.bin."));
        assert!(is_staging_name(name));
        assert!(!is_staging_name("a.bin"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let root = TempDir::new().unwrap();
        let store = ChunkStore::create(root.path(), "trans_1").await.unwrap();
        store.write(0, b"a").await.unwrap();

        store.remove().await.unwrap();
        assert!(!store.path().exists());
        store.remove().await.unwrap();
    }
}
