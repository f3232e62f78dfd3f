//! Typed queries over the run directories found under an output root.

use nf_types::NfResult;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::paths::{RunMetadata, COMPLETED_MARKER, METADATA_FILE};

/// What is known about one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitRecord {
    pub path: PathBuf,
    pub name: String,
    pub tag: Option<String>,
    pub search: String,
    pub completed: bool,
}

/// Fields a record can be projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitField {
    Path,
    Name,
    Tag,
    Search,
    Completed,
}

/// Filter over [`FitRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitPredicate {
    NameEquals(String),
    NameStartsWith(String),
    TagEquals(String),
    SearchEquals(String),
    Completed(bool),
    And(Box<FitPredicate>, Box<FitPredicate>),
    Or(Box<FitPredicate>, Box<FitPredicate>),
    Not(Box<FitPredicate>),
}

impl FitPredicate {
    pub fn and(self, other: FitPredicate) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FitPredicate) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, record: &FitRecord) -> bool {
        match self {
            Self::NameEquals(name) => record.name == *name,
            Self::NameStartsWith(prefix) => record.name.starts_with(prefix.as_str()),
            Self::TagEquals(tag) => record.tag.as_deref() == Some(tag.as_str()),
            Self::SearchEquals(search) => record.search == *search,
            Self::Completed(completed) => record.completed == *completed,
            Self::And(a, b) => a.matches(record) && b.matches(record),
            Self::Or(a, b) => a.matches(record) || b.matches(record),
            Self::Not(inner) => !inner.matches(record),
        }
    }
}

impl FitRecord {
    pub fn value(&self, field: FitField) -> String {
        match field {
            FitField::Path => self.path.display().to_string(),
            FitField::Name => self.name.clone(),
            FitField::Tag => self.tag.clone().unwrap_or_default(),
            FitField::Search => self.search.clone(),
            FitField::Completed => self.completed.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FitCatalog {
    records: Vec<FitRecord>,
}

impl FitCatalog {
    /// Every directory below `root` holding a run `metadata` file. Records
    /// are sorted by path.
    pub fn scan(root: impl AsRef<Path>) -> NfResult<Self> {
        let mut records = Vec::new();
        let root = root.as_ref();
        if root.is_dir() {
            collect(root, &mut records)?;
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root.display(), runs = records.len(), "catalog scanned");
        Ok(Self { records })
    }

    pub fn records(&self) -> &[FitRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn query(&self, predicate: &FitPredicate) -> Vec<&FitRecord> {
        self.records
            .iter()
            .filter(|record| predicate.matches(record))
            .collect()
    }

    pub fn values(&self, field: FitField) -> Vec<String> {
        self.records.iter().map(|record| record.value(field)).collect()
    }
}

fn collect(dir: &Path, records: &mut Vec<FitRecord>) -> NfResult<()> {
    let metadata_path = dir.join(METADATA_FILE);
    if metadata_path.is_file() {
        match fs::read_to_string(&metadata_path)
            .map_err(Into::into)
            .and_then(|text| RunMetadata::parse(&text))
        {
            Ok(metadata) => records.push(FitRecord {
                path: dir.to_path_buf(),
                name: metadata.name,
                tag: metadata.tag,
                search: metadata.search,
                completed: dir.join(COMPLETED_MARKER).is_file(),
            }),
            Err(e) => warn!(path = %metadata_path.display(), error = %e, "skipping unreadable run"),
        }
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(&path, records)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{CheckpointStore, RunIdentity};
    use tempfile::tempdir;

    fn write_run(root: &Path, identity: RunIdentity, search: &str, completed: bool) {
        let store = CheckpointStore::new(root, identity.clone()).unwrap();
        store.prepare().unwrap();
        store
            .write_metadata(&RunMetadata {
                name: identity.name,
                tag: identity.tag,
                search: search.to_string(),
            })
            .unwrap();
        if completed {
            store.mark_complete().unwrap();
        }
    }

    fn catalog() -> (tempfile::TempDir, FitCatalog) {
        let dir = tempdir().unwrap();
        write_run(dir.path(), RunIdentity::new("grid/a_0.00_0.50"), "random_search", true);
        write_run(dir.path(), RunIdentity::new("grid/a_0.50_1.00"), "random_search", false);
        write_run(
            dir.path(),
            RunIdentity::new("phase_1").with_tag("image_2"),
            "nested",
            true,
        );
        fs::create_dir_all(dir.path().join("unrelated")).unwrap();
        let catalog = FitCatalog::scan(dir.path()).unwrap();
        (dir, catalog)
    }

    #[test]
    fn scan_finds_runs_with_metadata() {
        let (_dir, catalog) = catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.values(FitField::Name),
            vec!["grid/a_0.00_0.50", "grid/a_0.50_1.00", "phase_1"]
        );
        assert_eq!(catalog.values(FitField::Tag)[2], "image_2");
    }

    #[test]
    fn predicates_compose() {
        let (_dir, catalog) = catalog();
        let grid_done = FitPredicate::NameStartsWith("grid/".into())
            .and(FitPredicate::Completed(true));
        let hits = catalog.query(&grid_done);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "grid/a_0.00_0.50");

        let not_random = FitPredicate::SearchEquals("random_search".into()).negate();
        assert_eq!(catalog.query(&not_random)[0].tag.as_deref(), Some("image_2"));

        let either = FitPredicate::TagEquals("image_2".into())
            .or(FitPredicate::NameEquals("grid/a_0.50_1.00".into()));
        assert_eq!(catalog.query(&either).len(), 2);
    }

    #[test]
    fn missing_root_gives_empty_catalog() {
        let dir = tempdir().unwrap();
        let catalog = FitCatalog::scan(dir.path().join("nope")).unwrap();
        assert!(catalog.is_empty());
    }
}
