//! Tabular fixture data shared read-only by every worker of a run.
//!
//! A fixture file is comma-delimited with a header row. Each data row becomes a
//! [`FixtureRow`] keyed by the header names. Sets are loaded once per path through
//! [`FixtureCache`] and handed out as `Arc<FixtureSet>`; nothing mutates them after load.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed fixture file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("fixture file {path}, line {line}: expected {expected} columns, found {found}")]
    ColumnMismatch {
        path: PathBuf,
        line: u64,
        expected: u64,
        found: u64,
    },
    #[error("fixture file {path} has no header row")]
    MissingHeader { path: PathBuf },
    #[error("fixture row {index} requested but only {len} rows are loaded")]
    OutOfRange { index: usize, len: usize },
}

/// One data row, ordered like the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureRow {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl FixtureRow {
    /// Value of `column`, if the header defines it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .map(|idx| self.values[idx].as_str())
    }

    /// Column/value pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    headers: Arc<[String]>,
    rows: Vec<FixtureRow>,
}

impl FixtureSet {
    /// Read and parse a fixture file. Any failure here aborts run setup.
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let file = std::fs::File::open(path).map_err(|source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(path, file)
    }

    /// Parse CSV content; `path` is only used to label errors.
    pub fn from_reader<R: Read>(path: &Path, reader: R) -> Result<Self, FixtureError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let malformed = |source: csv::Error| match source.kind() {
            csv::ErrorKind::UnequalLengths {
                pos,
                expected_len,
                len,
            } => FixtureError::ColumnMismatch {
                path: path.to_path_buf(),
                line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
                expected: *expected_len,
                found: *len,
            },
            _ => FixtureError::Malformed {
                path: path.to_path_buf(),
                source,
            },
        };

        let headers: Arc<[String]> = rdr
            .headers()
            .map_err(malformed)?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(FixtureError::MissingHeader {
                path: path.to_path_buf(),
            });
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(malformed)?;
            rows.push(FixtureRow {
                headers: headers.clone(),
                values: record.iter().map(str::to_string).collect(),
            });
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FixtureRow> {
        self.rows.get(index)
    }

    /// Like [`FixtureSet::get`], but an absent row is reported as a misconfiguration.
    pub fn row(&self, index: usize) -> Result<&FixtureRow, FixtureError> {
        self.rows.get(index).ok_or(FixtureError::OutOfRange {
            index,
            len: self.rows.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FixtureRow> {
        self.rows.iter()
    }
}

/// Process-wide fixture store: path -> loaded set.
#[derive(Clone, Default)]
pub struct FixtureCache {
    sets: Arc<RwLock<HashMap<PathBuf, Arc<FixtureSet>>>>,
}

impl FixtureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached set for `path`, parsing the file on first use only.
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<FixtureSet>, FixtureError> {
        if let Some(set) = self.sets.read().get(path) {
            return Ok(set.clone());
        }

        let mut sets = self.sets.write();
        if let Some(set) = sets.get(path) {
            return Ok(set.clone());
        }
        let set = Arc::new(FixtureSet::load(path)?);
        tracing::info!(path = %path.display(), rows = set.len(), "loaded fixture set");
        sets.insert(path.to_path_buf(), set.clone());
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const USERS: &str = "username,password\nalice,secret-a\nbob,secret-b\ncarol,secret-c\n";

    #[test]
    fn test_load_preserves_count_and_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("users.csv");
        fs::write(&path, USERS).unwrap();

        let set = FixtureSet::load(&path).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.headers(), &["username".to_string(), "password".to_string()]);
        let names: Vec<_> = set.iter().map(|r| r.get("username").unwrap()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(set.get(1).unwrap().get("password"), Some("secret-b"));
    }

    #[test]
    fn test_row_iter_follows_header_order() {
        let set = FixtureSet::from_reader(Path::new("inline"), USERS.as_bytes()).unwrap();
        let pairs: Vec<_> = set.get(0).unwrap().iter().collect();
        assert_eq!(pairs, vec![("username", "alice"), ("password", "secret-a")]);
        assert_eq!(set.get(0).unwrap().get("email"), None);
    }

    #[test]
    fn test_values_keep_surrounding_spaces() {
        let content = " username , password \nalice, pw with spaces \n";
        let set = FixtureSet::from_reader(Path::new("inline"), content.as_bytes()).unwrap();
        assert_eq!(set.headers(), &["username".to_string(), "password".to_string()]);
        assert_eq!(set.get(0).unwrap().get("username"), Some("alice"));
        assert_eq!(set.get(0).unwrap().get("password"), Some(" pw with spaces "));
    }

    #[test]
    fn test_header_only_file_is_empty_set() {
        let set =
            FixtureSet::from_reader(Path::new("inline"), "username,password\n".as_bytes()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = FixtureSet::load(Path::new("/nonexistent/users.csv")).unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }));
    }

    #[test]
    fn test_column_mismatch_is_fatal() {
        let content = "username,password\nalice,secret\nbob\n";
        let err = FixtureSet::from_reader(Path::new("users.csv"), content.as_bytes()).unwrap_err();
        match err {
            FixtureError::ColumnMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("Expected ColumnMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let err = FixtureSet::from_reader(Path::new("empty.csv"), "".as_bytes()).unwrap_err();
        assert!(matches!(err, FixtureError::MissingHeader { .. }));
    }

    #[test]
    fn test_row_out_of_range() {
        let set = FixtureSet::from_reader(Path::new("inline"), USERS.as_bytes()).unwrap();
        assert!(set.row(2).is_ok());
        match set.row(3) {
            Err(FixtureError::OutOfRange { index, len }) => {
                assert_eq!(index, 3);
                assert_eq!(len, 3);
            }
            other => panic!("Expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_loads_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("users.csv");
        fs::write(&path, USERS).unwrap();

        let cache = FixtureCache::new();
        let first = cache.get_or_load(&path).unwrap();

        // Changing the file after the first load must not affect the run.
        fs::write(&path, "username,password\nmallory,x\n").unwrap();
        let second = cache.get_or_load(&path).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 3);
    }
}
