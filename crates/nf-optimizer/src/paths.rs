//! On-disk identity of a run: where snapshots, metadata, the search's working
//! files and the completion marker live.

use chrono::{DateTime, Utc};
use nf_types::{ModelMapper, NfError, NfResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Version written into every snapshot envelope.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

const MODEL_INFO_FILE: &str = "model.info";
const PARAM_NAMES_FILE: &str = "param_names";
pub(crate) const METADATA_FILE: &str = "metadata";
const INFO_FILE: &str = "info.json";
const OPTIMIZER_FILE: &str = "optimizer.json";
const MODEL_FILE: &str = "model.json";
const RESULTS_FILE: &str = "model.results";
pub(crate) const COMPLETED_MARKER: &str = ".completed";
const SEARCH_DIR: &str = "search";
const BACKUP_DIR: &str = "backup";

/// Width of the name column in the parameter-names file.
const PARAM_NAME_WIDTH: usize = 70;

/// Name, optional tag and optional prefix locating a run under the output
/// root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub name: String,
    pub tag: Option<String>,
    pub path_prefix: Option<String>,
}

impl RunIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            path_prefix: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// `{name}/{suffix}`, optionally dropping the tag.
    pub fn extended(&self, suffix: &str, remove_tag: bool) -> Self {
        Self {
            name: format!("{}/{}", self.name, suffix),
            tag: if remove_tag { None } else { self.tag.clone() },
            path_prefix: self.path_prefix.clone(),
        }
    }
}

/// Key=value run description written to the `metadata` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub tag: Option<String>,
    pub search: String,
}

impl RunMetadata {
    pub fn to_text(&self) -> String {
        format!(
            "name={}\ntag={}\nsearch={}\n",
            self.name,
            self.tag.as_deref().unwrap_or(""),
            self.search
        )
    }

    pub fn parse(text: &str) -> NfResult<Self> {
        let mut name = None;
        let mut tag = None;
        let mut search = None;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "name" => name = Some(value),
                "tag" => tag = Some(value).filter(|v| !v.is_empty()),
                "search" => search = Some(value),
                _ => {}
            }
        }
        Ok(Self {
            name: name.ok_or_else(|| NfError::Snapshot("metadata is missing name".to_string()))?,
            tag,
            search: search
                .ok_or_else(|| NfError::Snapshot("metadata is missing search".to_string()))?,
        })
    }
}

/// Schema-versioned wrapper around every serialized snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope<T> {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> SnapshotEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// Manages the directory of one run.
///
/// Layout: `{output_root}/{path_prefix?}/{name}[/{tag}]` holding `model.info`,
/// `param_names`, `metadata`, `info.json`, `optimizer.json`, `model.json`,
/// `model.results`, `.completed`, the search's working files under `search/`
/// and their last backup under `backup/`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointStore {
    output_root: PathBuf,
    identity: RunIdentity,
}

impl CheckpointStore {
    /// Attach to a run, restoring working files from a backup when one exists.
    pub fn new(output_root: impl Into<PathBuf>, identity: RunIdentity) -> NfResult<Self> {
        let store = Self {
            output_root: output_root.into(),
            identity,
        };
        store.restore()?;
        Ok(store)
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn run_dir(&self) -> PathBuf {
        let mut path = self.output_root.clone();
        if let Some(prefix) = &self.identity.path_prefix {
            path.push(prefix);
        }
        path.push(&self.identity.name);
        if let Some(tag) = &self.identity.tag {
            path.push(tag);
        }
        path
    }

    pub fn search_dir(&self) -> PathBuf {
        self.run_dir().join(SEARCH_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.run_dir().join(BACKUP_DIR)
    }

    pub fn model_info_path(&self) -> PathBuf {
        self.run_dir().join(MODEL_INFO_FILE)
    }

    pub fn param_names_path(&self) -> PathBuf {
        self.run_dir().join(PARAM_NAMES_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.run_dir().join(METADATA_FILE)
    }

    pub fn info_path(&self) -> PathBuf {
        self.run_dir().join(INFO_FILE)
    }

    pub fn optimizer_path(&self) -> PathBuf {
        self.run_dir().join(OPTIMIZER_FILE)
    }

    pub fn model_path(&self) -> PathBuf {
        self.run_dir().join(MODEL_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.run_dir().join(RESULTS_FILE)
    }

    pub fn completed_marker_path(&self) -> PathBuf {
        self.run_dir().join(COMPLETED_MARKER)
    }

    /// Create the run directory structure. Safe on an existing directory.
    pub fn prepare(&self) -> NfResult<()> {
        fs::create_dir_all(self.search_dir())?;
        debug!(run_dir = %self.run_dir().display(), "run directory prepared");
        Ok(())
    }

    /// Repopulate the working files from the backup when the working copy is
    /// missing or empty. Returns true when files were restored.
    pub fn restore(&self) -> NfResult<bool> {
        let backup = self.backup_dir();
        if !backup.is_dir() || !dir_has_files(&backup)? {
            return Ok(false);
        }
        let search = self.search_dir();
        if search.is_dir() && dir_has_files(&search)? {
            return Ok(false);
        }
        fs::create_dir_all(&search)?;
        let copied = copy_files(&backup, &search)?;
        info!(
            run = %self.identity.name,
            files = copied,
            "restored search state from backup"
        );
        Ok(true)
    }

    /// Copy the working files into the backup directory. Each file is
    /// replaced atomically; concurrent backups leave the last writer's copy.
    pub fn backup(&self) -> NfResult<usize> {
        let search = self.search_dir();
        if !search.is_dir() {
            return Ok(0);
        }
        let backup = self.backup_dir();
        fs::create_dir_all(&backup)?;
        let copied = copy_files(&search, &backup)?;
        debug!(run = %self.identity.name, files = copied, "search state backed up");
        Ok(copied)
    }

    pub fn mark_complete(&self) -> NfResult<()> {
        fs::File::create(self.completed_marker_path())?;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.completed_marker_path().is_file()
    }

    pub fn write_model_info(&self, model: &ModelMapper) -> NfResult<()> {
        write_atomic(&self.model_info_path(), model.info().as_bytes())
    }

    /// Two columns: parameter name padded to a fixed width, then its label.
    pub fn write_param_names(&self, model: &ModelMapper) -> NfResult<()> {
        let mut text = String::new();
        for (name, label) in model.prior_names().into_iter().zip(model.prior_labels()) {
            text.push_str(&format!("{name:<PARAM_NAME_WIDTH$}{label}\n"));
        }
        write_atomic(&self.param_names_path(), text.as_bytes())
    }

    pub fn write_metadata(&self, metadata: &RunMetadata) -> NfResult<()> {
        write_atomic(&self.metadata_path(), metadata.to_text().as_bytes())
    }

    pub fn read_metadata(&self) -> NfResult<RunMetadata> {
        RunMetadata::parse(&fs::read_to_string(self.metadata_path())?)
    }

    pub fn write_info(&self, info: &serde_json::Value) -> NfResult<()> {
        write_snapshot(&self.info_path(), info)
    }

    pub fn read_info(&self) -> NfResult<serde_json::Value> {
        read_snapshot(&self.info_path())
    }

    pub fn write_model_snapshot(&self, model: &ModelMapper) -> NfResult<()> {
        write_snapshot(&self.model_path(), model)
    }

    pub fn load_model_snapshot(&self) -> NfResult<ModelMapper> {
        read_snapshot(&self.model_path())
    }

    pub fn write_optimizer_snapshot<T: Serialize>(&self, snapshot: &T) -> NfResult<()> {
        write_snapshot(&self.optimizer_path(), snapshot)
    }

    pub fn load_optimizer_snapshot<T: DeserializeOwned>(&self) -> NfResult<T> {
        read_snapshot(&self.optimizer_path())
    }

    pub fn write_results(&self, text: &str) -> NfResult<()> {
        write_atomic(&self.results_path(), text.as_bytes())
    }
}

fn write_snapshot<T: Serialize>(path: &Path, payload: &T) -> NfResult<()> {
    let json = serde_json::to_vec_pretty(&SnapshotEnvelope::new(payload))?;
    write_atomic(path, &json)
}

fn read_snapshot<T: DeserializeOwned>(path: &Path) -> NfResult<T> {
    let bytes = fs::read(path)?;
    let envelope: SnapshotEnvelope<serde_json::Value> = serde_json::from_slice(&bytes)?;
    if envelope.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(NfError::Snapshot(format!(
            "{} has schema version {}, expected {}",
            path.display(),
            envelope.schema_version,
            SNAPSHOT_SCHEMA_VERSION
        )));
    }
    Ok(serde_json::from_value(envelope.payload)?)
}

/// Write through a temporary sibling and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> NfResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| NfError::Internal(format!("invalid path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn dir_has_files(dir: &Path) -> std::io::Result<bool> {
    for entry in fs::read_dir(dir)? {
        if entry?.path().is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn copy_files(from: &Path, to: &Path) -> NfResult<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(from)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        if name.to_string_lossy().ends_with(".tmp") {
            continue;
        }
        write_atomic(&to.join(name), &fs::read(&path)?)?;
        copied += 1;
    }
    Ok(copied)
}
