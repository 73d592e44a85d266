//! Manifest data model and its canonical serialised form.

use std::collections::BTreeMap;

use thiserror::Error;

/// What kind of filesystem object a manifest entry describes.
///
/// Directories are not first-class entries; their existence is implied by
/// the paths they contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  File,
  Symlink,
}

impl EntryKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntryKind::File => "f",
      EntryKind::Symlink => "l",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "f" => Some(EntryKind::File),
      "l" => Some(EntryKind::Symlink),
      _ => None,
    }
  }
}

/// One scanned filesystem object.
///
/// Equality is structural over (mtime, size, kind); the differ relies on
/// this to detect changes without reading file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry {
  /// Whole-second POSIX mtime.
  pub mtime: i64,

  /// Byte length; always 0 for symlinks.
  pub size: u64,

  pub kind: EntryKind,
}

impl ManifestEntry {
  /// Create an entry, normalising `size` to 0 for symlinks.
  pub fn new(mtime: i64, size: u64, kind: EntryKind) -> Self {
    let size = match kind {
      EntryKind::Symlink => 0,
      EntryKind::File => size,
    };
    Self { mtime, size, kind }
  }
}

/// Errors from parsing the serialised manifest form.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("line {line}: expected 4 tab-separated fields")]
  FieldCount { line: usize },

  #[error("line {line}: invalid {field}: {value:?}")]
  InvalidField {
    line: usize,
    field: &'static str,
    value: String,
  },

  #[error("line {line}: duplicate path {path:?}")]
  DuplicatePath { line: usize, path: String },

  #[error("line {line}: path is not relative to the sync root: {path:?}")]
  UnsafePath { line: usize, path: String },
}

/// A snapshot of one sync root: relative path to entry, keys unique.
///
/// Backed by a `BTreeMap` so iteration is always in lexicographic byte
/// order on path, which makes scans, diffs, and the serialised form
/// deterministic.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Manifest {
  entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, path: String, entry: ManifestEntry) {
    self.entries.insert(path, entry);
  }

  pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
    self.entries.remove(path)
  }

  pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
    self.entries.get(path)
  }

  pub fn contains(&self, path: &str) -> bool {
    self.entries.contains_key(path)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Paths in lexicographic order.
  pub fn paths(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  /// (path, entry) pairs in lexicographic order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
    self.entries.iter().map(|(p, e)| (p.as_str(), e))
  }

  /// Serialise to the canonical form: one tab-separated line per entry,
  /// sorted by path, newline-terminated. An empty manifest serialises to
  /// the empty string.
  pub fn serialize(&self) -> String {
    let mut out = String::new();
    for (path, entry) in &self.entries {
      out.push_str(path);
      out.push('\t');
      out.push_str(&entry.mtime.to_string());
      out.push('\t');
      out.push_str(&entry.size.to_string());
      out.push('\t');
      out.push_str(entry.kind.as_str());
      out.push('\n');
    }
    out
  }

  /// Parse the canonical serialised form.
  ///
  /// An empty string is a valid empty manifest. Rejects malformed rows,
  /// duplicate paths, and paths that could escape the sync root.
  pub fn parse(input: &str) -> Result<Self, ManifestError> {
    let mut manifest = Manifest::new();

    for (idx, raw) in input.lines().enumerate() {
      let line = idx + 1;
      if raw.is_empty() {
        continue;
      }

      let fields: Vec<&str> = raw.split('\t').collect();
      if fields.len() != 4 {
        return Err(ManifestError::FieldCount { line });
      }

      let path = fields[0];
      if !path_is_safe(path) {
        return Err(ManifestError::UnsafePath {
          line,
          path: path.to_string(),
        });
      }
      if manifest.contains(path) {
        return Err(ManifestError::DuplicatePath {
          line,
          path: path.to_string(),
        });
      }

      let mtime: i64 = fields[1].parse().map_err(|_| ManifestError::InvalidField {
        line,
        field: "mtime",
        value: fields[1].to_string(),
      })?;
      let size: u64 = fields[2].parse().map_err(|_| ManifestError::InvalidField {
        line,
        field: "size",
        value: fields[2].to_string(),
      })?;
      let kind = EntryKind::parse(fields[3]).ok_or_else(|| ManifestError::InvalidField {
        line,
        field: "kind",
        value: fields[3].to_string(),
      })?;

      manifest.insert(path.to_string(), ManifestEntry::new(mtime, size, kind));
    }

    Ok(manifest)
  }
}

/// A manifest path must stay inside the sync root: relative, forward
/// slashes, no `.`/`..` components, no leading `./`, no trailing slash.
fn path_is_safe(path: &str) -> bool {
  if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
    return false;
  }
  path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(mtime: i64, size: u64) -> ManifestEntry {
    ManifestEntry::new(mtime, size, EntryKind::File)
  }

  #[test]
  fn serialize_sorted_and_terminated() {
    let mut m = Manifest::new();
    m.insert("b.txt".to_string(), entry(200, 2));
    m.insert("a.txt".to_string(), entry(100, 1));
    m.insert("a/z".to_string(), ManifestEntry::new(5, 9, EntryKind::Symlink));

    assert_eq!(m.serialize(), "a.txt\t100\t1\tf\na/z\t5\t0\tl\nb.txt\t200\t2\tf\n");
  }

  #[test]
  fn parse_round_trip() {
    let mut m = Manifest::new();
    m.insert("docs/readme.md".to_string(), entry(1700000000, 4096));
    m.insert("link".to_string(), ManifestEntry::new(1700000001, 0, EntryKind::Symlink));

    let parsed = Manifest::parse(&m.serialize()).unwrap();
    assert_eq!(parsed, m);
  }

  #[test]
  fn parse_empty_is_empty_manifest() {
    let m = Manifest::parse("").unwrap();
    assert!(m.is_empty());
  }

  #[test]
  fn symlink_size_normalised_to_zero() {
    let e = ManifestEntry::new(1, 42, EntryKind::Symlink);
    assert_eq!(e.size, 0);

    let m = Manifest::parse("link\t1\t42\tl\n").unwrap();
    assert_eq!(m.get("link").unwrap().size, 0);
  }

  #[test]
  fn parse_rejects_field_count() {
    assert!(matches!(
      Manifest::parse("a.txt\t100\t1\n"),
      Err(ManifestError::FieldCount { line: 1 })
    ));
    assert!(matches!(
      Manifest::parse("a.txt\t100\t1\tf\textra\n"),
      Err(ManifestError::FieldCount { line: 1 })
    ));
  }

  #[test]
  fn parse_rejects_bad_fields() {
    assert!(matches!(
      Manifest::parse("a\tnope\t1\tf\n"),
      Err(ManifestError::InvalidField { field: "mtime", .. })
    ));
    assert!(matches!(
      Manifest::parse("a\t1\t-5\tf\n"),
      Err(ManifestError::InvalidField { field: "size", .. })
    ));
    assert!(matches!(
      Manifest::parse("a\t1\t1\td\n"),
      Err(ManifestError::InvalidField { field: "kind", .. })
    ));
  }

  #[test]
  fn parse_rejects_duplicates() {
    let input = "a\t1\t1\tf\na\t2\t2\tf\n";
    assert!(matches!(
      Manifest::parse(input),
      Err(ManifestError::DuplicatePath { line: 2, .. })
    ));
  }

  #[test]
  fn parse_rejects_unsafe_paths() {
    for bad in ["/abs\t1\t1\tf\n", "../up\t1\t1\tf\n", "a/../b\t1\t1\tf\n", "./x\t1\t1\tf\n", "d/\t1\t1\tf\n"] {
      assert!(matches!(Manifest::parse(bad), Err(ManifestError::UnsafePath { .. })), "{bad}");
    }
  }

  #[test]
  fn entry_equality_is_structural() {
    assert_eq!(entry(1, 2), entry(1, 2));
    assert_ne!(entry(1, 2), entry(1, 3));
    assert_ne!(entry(1, 2), entry(2, 2));
    assert_ne!(entry(1, 0), ManifestEntry::new(1, 0, EntryKind::Symlink));
  }
}
