//! Single-file gist records and the filename index built over them.
//!
//! The remote format allows several files per gist. gistsync only ever
//! writes one, and only the first file of a record is ever read back.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One file inside a gist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GistFile {
    pub filename: String,
    /// The list endpoint omits content, so it may be absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Remaining fields (raw_url, size, language, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GistFile {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: Some(content.into()),
            extra: Map::new(),
        }
    }
}

/// A gist as exchanged with the remote API.
///
/// `id` is `None` until the record has been created remotely. Fields the
/// remote returns but gistsync does not interpret are kept in `extra` and
/// written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GistRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `Some(None)` is an explicit `null` from the remote and is sent back
    /// as `null`; `None` leaves the field out so the client default applies.
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub public: Option<Option<bool>>,
    #[serde(default)]
    pub files: BTreeMap<String, GistFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The (filename, content) pair carried by a single-file gist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleFile {
    pub filename: String,
    pub content: String,
}

/// Returns a copy of `base` (or an empty record) holding exactly one file.
pub fn serialize_single_file(
    filename: &str,
    content: &str,
    base: Option<&GistRecord>,
) -> GistRecord {
    let mut record = base.cloned().unwrap_or_default();
    record.files = BTreeMap::from([(filename.to_string(), GistFile::new(filename, content))]);
    record
}

/// Reads the first file of a record, or an empty pair when there is none.
pub fn parse_single_file(record: Option<&GistRecord>) -> SingleFile {
    record
        .and_then(|r| r.files.iter().next())
        .map(|(filename, file)| SingleFile {
            filename: filename.clone(),
            content: file.content.clone().unwrap_or_default(),
        })
        .unwrap_or_default()
}

/// Lookup from filename to the most recently known record for it.
///
/// Always built from a whole collection; when two records share a filename
/// the later one in the collection wins.
#[derive(Debug, Clone, Default)]
pub struct FilenameIndex {
    by_filename: HashMap<String, GistRecord>,
}

impl FilenameIndex {
    pub fn build(records: &[GistRecord]) -> Self {
        let by_filename = records.iter().fold(HashMap::new(), |mut accum, record| {
            let SingleFile { filename, .. } = parse_single_file(Some(record));
            accum.insert(filename, record.clone());
            accum
        });
        Self { by_filename }
    }

    pub fn get(&self, filename: &str) -> Option<&GistRecord> {
        self.by_filename.get(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.by_filename.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.by_filename.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_filename.is_empty()
    }

    /// Filenames in the index, sorted.
    pub fn filenames(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_filename.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
