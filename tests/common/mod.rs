#![allow(dead_code)]

use chunkdrop::common::{Config, TransferSettings};
use chunkdrop::transfer::TransferManager;
use tempfile::TempDir;

pub const CHUNK_SIZE: u64 = 1_000_000; // 1 MB

/// Manager over throwaway shared/scratch dirs; keep the guards alive.
pub struct TestManager {
    pub manager: TransferManager,
    pub storage: TempDir,
    pub scratch: TempDir,
}

pub fn setup_manager() -> TestManager {
    setup_manager_with(TransferSettings::default())
}

pub fn setup_manager_with(settings: TransferSettings) -> TestManager {
    let storage = TempDir::new().expect("Failed to create storage dir");
    let scratch = TempDir::new().expect("Failed to create scratch dir");
    let manager = TransferManager::new(storage.path(), scratch.path(), settings);
    TestManager {
        manager,
        storage,
        scratch,
    }
}

/// Config pointing at fresh temp dirs, bound to an ephemeral localhost port.
pub fn test_config(storage: &TempDir, scratch: &TempDir) -> Config {
    Config {
        host: "127.0.0.1".parse().expect("valid ip"),
        port: 0,
        storage_dir: storage.path().to_path_buf(),
        temp_dir: scratch.path().to_path_buf(),
        transfer: TransferSettings::default(),
    }
}

/// Deterministic non-repeating-ish payload so misplaced chunks show up.
pub fn patterned_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

pub fn chunk_of(data: &[u8], index: u64, chunk_size: u64) -> &[u8] {
    let start = (index * chunk_size) as usize;
    let end = (start + chunk_size as usize).min(data.len());
    &data[start..end]
}
