use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::trace;

use crate::model::Fingerprint;

const READ_BUFFER_LENGTH: usize = 64 * 1024; // 64KB

/// Streaming BLAKE3 over the whole file. Two files share a fingerprint
/// exactly when their contents are byte-identical.
pub fn fingerprint(path: &Path) -> io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_LENGTH];
    let mut size = 0u64;

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    let hash = hasher.finalize().to_hex().to_string();
    trace!("Fingerprinted {} ({} bytes)", path.display(), size);
    Ok(Fingerprint { hash, size })
}

/// First `limit` bytes of a file as lossy UTF-8, for content scorers.
pub fn read_preview(path: &Path, limit: usize) -> io::Result<String> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(limit.min(READ_BUFFER_LENGTH));
    file.take(limit as u64).read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_identical_content_same_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("nested_b.txt");
        fs::write(&a, "shared content xyz").unwrap();
        fs::write(&b, "shared content xyz").unwrap();

        let fa = fingerprint(&a).unwrap();
        let fb = fingerprint(&b).unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.size, 18);
        assert_eq!(fa.hash.len(), 64);
    }

    #[test]
    fn test_content_spanning_buffers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let content = vec![0xAAu8; READ_BUFFER_LENGTH * 2 + 17];
        fs::write(&path, &content).unwrap();

        let fp = fingerprint(&path).unwrap();
        assert_eq!(fp.size, content.len() as u64);
        assert_eq!(fp.hash, blake3::hash(&content).to_hex().to_string());
    }

    #[test]
    fn test_different_content_differs() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "unique content a").unwrap();
        fs::write(&b, "unique content b").unwrap();
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = fingerprint(&dir.path().join("missing.pdf")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_preview_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoice.txt");
        fs::write(&path, "Rechnung Nr. 42 fuer Beratung").unwrap();
        assert_eq!(read_preview(&path, 8).unwrap(), "Rechnung");
    }
}
