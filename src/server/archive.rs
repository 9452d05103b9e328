//! ZIP packaging for batch downloads.

use anyhow::{Context, Result};
use std::io::{self, Cursor};
use std::path::Path;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Build an in-memory archive of `names` under `root`.
///
/// Files removed since upload are skipped. Blocking; run it off the runtime.
pub fn zip_files(root: &Path, names: &[String]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    for name in names {
        let path = root.join(name);
        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(file = %name, "Batch member missing from shared directory");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };

        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("add {} to archive", name))?;
        io::copy(&mut file, &mut writer).with_context(|| format!("copy {}", name))?;
    }

    let cursor = writer.finish().context("finalize archive")?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn archives_present_files_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bravo").unwrap();

        let names = vec!["a.txt".to_string(), "gone.txt".to_string(), "b.txt".to_string()];
        let bytes = zip_files(dir.path(), &names).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut content = String::new();
        archive
            .by_name("b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "bravo");
        assert!(archive.by_name("gone.txt").is_err());
    }

    #[test]
    fn empty_selection_is_valid_archive() {
        let dir = TempDir::new().unwrap();
        let bytes = zip_files(dir.path(), &[]).unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
