//! Content digests for checksum verification.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of a file's contents as lowercase hex.
///
/// Streams the file in 64 KiB chunks so large files never need to fit in
/// memory. The digest is content-only; it is never stored in a manifest.
pub fn file_digest(path: &Path) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 65536];

  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }

  Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn digest_known_value() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("f.txt");
    std::fs::write(&path, b"hello").unwrap();

    // sha256("hello")
    assert_eq!(
      file_digest(&path).unwrap(),
      "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
  }

  #[test]
  fn digest_empty_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("empty");
    std::fs::write(&path, b"").unwrap();

    assert_eq!(
      file_digest(&path).unwrap(),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn digest_missing_file_errors() {
    assert!(file_digest(Path::new("/nonexistent/file")).is_err());
  }
}
