//! Filesystem snapshot store.
//!
//! Every document is written to a hidden temporary file first and then
//! renamed into place, so readers never observe a partial artifact. Writes
//! and retention of the same tier are serialised by a per-tier mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};

use super::models::{ArtifactEntry, LogKind, PruneSummary};
use crate::domain::{BackupArtifact, BackupSummary, OperationId, SchemaVersion, SchemaVersionIndex, Tier};
use crate::error::GuardianError;

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";
const SUMMARY_SUFFIX: &str = ".summary.json";
const MAX_LABEL_LEN: usize = 64;

/// Durable JSON document store rooted at one directory.
///
/// ```text
/// <root>/<tier dir>/<tier>-<stamp>.json
/// <root>/<tier dir>/<tier>-<stamp>.summary.json
/// <root>/logs/<kind>/<kind>-<stamp>-<id>.json
/// <root>/schema/versions/<label>.json
/// <root>/schema/index.json
/// ```
#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    tier_locks: HashMap<Tier, Arc<Mutex<()>>>,
}

impl SnapshotStore {
    /// Opens a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let tier_locks = Tier::ALL
            .into_iter()
            .map(|tier| (tier, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            root: root.into(),
            tier_locks,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a tier's artifacts.
    #[must_use]
    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.directory())
    }

    /// Directory holding one kind of log.
    #[must_use]
    pub fn log_dir(&self, kind: LogKind) -> PathBuf {
        self.root.join("logs").join(kind.as_str())
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join("schema").join("versions")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("schema").join("index.json")
    }

    async fn tier_guard(&self, tier: Tier) -> Result<MutexGuard<'_, ()>, GuardianError> {
        let lock = self
            .tier_locks
            .get(&tier)
            .ok_or_else(|| GuardianError::Internal(format!("no lock for tier {tier}")))?;
        Ok(lock.lock().await)
    }

    // ----- artifacts -----

    /// Writes an artifact and its summary, returning the artifact path.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`].
    pub async fn write_backup(&self, artifact: &BackupArtifact) -> Result<PathBuf, GuardianError> {
        let tier = artifact.metadata.tier;
        let _guard = self.tier_guard(tier).await?;
        let dir = self.tier_dir(tier);
        ensure_dir(&dir).await?;

        let stamp = artifact.metadata.created_at.format(STAMP_FORMAT);
        let path = unique_artifact_path(&dir, &format!("{}-{stamp}", tier.as_str())).await?;
        write_json_atomic(&path, artifact).await?;
        write_json_atomic(&summary_path(&path), &artifact.summary()).await?;
        tracing::debug!(path = %path.display(), %tier, "artifact written");
        Ok(path)
    }

    /// Reads a document as untyped JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::ArtifactNotFound`] for a missing file and
    /// [`GuardianError::InvalidArtifact`] for unparsable JSON.
    pub async fn read_document(&self, path: &Path) -> Result<serde_json::Value, GuardianError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GuardianError::ArtifactNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(GuardianError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| GuardianError::InvalidArtifact(format!("{}: {e}", path.display())))
    }

    /// Reads and decodes a backup artifact.
    ///
    /// # Errors
    ///
    /// See [`SnapshotStore::read_document`]; a document that is valid JSON
    /// but not an artifact is also [`GuardianError::InvalidArtifact`].
    pub async fn read_artifact(&self, path: &Path) -> Result<BackupArtifact, GuardianError> {
        let value = self.read_document(path).await?;
        serde_json::from_value(value)
            .map_err(|e| GuardianError::InvalidArtifact(format!("{}: {e}", path.display())))
    }

    /// Reads the summary paired with an artifact.
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotStore::read_artifact`].
    pub async fn read_summary(&self, artifact_path: &Path) -> Result<BackupSummary, GuardianError> {
        let path = summary_path(artifact_path);
        let value = self.read_document(&path).await?;
        serde_json::from_value(value)
            .map_err(|e| GuardianError::InvalidArtifact(format!("{}: {e}", path.display())))
    }

    /// Lists the artifacts of a tier, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if the directory cannot be read.
    pub async fn list_artifacts(&self, tier: Tier) -> Result<Vec<ArtifactEntry>, GuardianError> {
        let dir = self.tier_dir(tier);
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(GuardianError::io(&dir, e)),
        };
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| GuardianError::io(&dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((created_at, sequence)) = parse_artifact_name(tier, name) else {
                continue;
            };
            let path = entry.path();
            let size_bytes = entry
                .metadata()
                .await
                .map_err(|e| GuardianError::io(&path, e))?
                .len();
            entries.push(ArtifactEntry {
                path,
                tier,
                created_at,
                sequence,
                size_bytes,
            });
        }
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    /// Lists artifacts across the given tiers, newest first.
    ///
    /// # Errors
    ///
    /// See [`SnapshotStore::list_artifacts`].
    pub async fn list_tiers(&self, tiers: &[Tier]) -> Result<Vec<ArtifactEntry>, GuardianError> {
        let mut all = Vec::new();
        for tier in tiers {
            all.extend(self.list_artifacts(*tier).await?);
        }
        sort_newest_first(&mut all);
        Ok(all)
    }

    /// Deletes every artifact of a tier beyond the newest `keep`, together
    /// with its summary. The newest artifact always survives, even with
    /// `keep == 0`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if listing or deleting fails.
    pub async fn prune_tier(&self, tier: Tier, keep: usize) -> Result<PruneSummary, GuardianError> {
        let keep = keep.max(1);
        let _guard = self.tier_guard(tier).await?;
        let entries = self.list_artifacts(tier).await?;
        let mut summary = PruneSummary {
            kept: entries.len().min(keep),
            deleted: Vec::new(),
        };
        for entry in entries.into_iter().skip(keep) {
            tokio::fs::remove_file(&entry.path)
                .await
                .map_err(|e| GuardianError::io(&entry.path, e))?;
            remove_if_exists(&summary_path(&entry.path)).await?;
            summary.deleted.push(entry.path);
        }
        Ok(summary)
    }

    // ----- logs -----

    /// Writes an operation log, returning its path.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`].
    pub async fn write_log<T: Serialize>(
        &self,
        kind: LogKind,
        id: &OperationId,
        document: &T,
    ) -> Result<PathBuf, GuardianError> {
        let dir = self.log_dir(kind);
        ensure_dir(&dir).await?;
        let stamp = Utc::now().format(STAMP_FORMAT);
        let path = dir.join(format!("{kind}-{stamp}-{}.json", id.short()));
        write_json_atomic(&path, document).await?;
        Ok(path)
    }

    /// Lists the logs of one kind, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if the directory cannot be read.
    pub async fn list_logs(&self, kind: LogKind) -> Result<Vec<PathBuf>, GuardianError> {
        let dir = self.log_dir(kind);
        let mut paths = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(GuardianError::io(&dir, e)),
        };
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| GuardianError::io(&dir, e))?
        {
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(kind.as_str()) && n.ends_with(".json"));
            if is_log {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(paths)
    }

    /// Reads and decodes any JSON document of the store.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`].
    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, GuardianError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GuardianError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ----- schema versions -----

    /// Persists a new schema version.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::InvalidArgument`] for an unusable label and
    /// [`GuardianError::SchemaVersionExists`] if the label is taken.
    pub async fn write_schema_version(
        &self,
        version: &SchemaVersion,
    ) -> Result<PathBuf, GuardianError> {
        let path = self.schema_version_path(&version.version)?;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| GuardianError::io(&path, e))?
        {
            return Err(GuardianError::SchemaVersionExists(version.version.clone()));
        }
        ensure_dir(&self.versions_dir()).await?;
        write_json_atomic(&path, version).await?;
        Ok(path)
    }

    /// Reads a saved schema version.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::SchemaVersionNotFound`] if it was never saved.
    pub async fn read_schema_version(&self, label: &str) -> Result<SchemaVersion, GuardianError> {
        let path = self.schema_version_path(label)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GuardianError::SchemaVersionNotFound(label.to_string()))
            }
            Err(e) => Err(GuardianError::io(&path, e)),
        }
    }

    /// Reads the version index; a missing index is empty.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`].
    pub async fn read_schema_index(&self) -> Result<SchemaVersionIndex, GuardianError> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SchemaVersionIndex::default()),
            Err(e) => Err(GuardianError::io(&path, e)),
        }
    }

    /// Replaces the version index.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`].
    pub async fn write_schema_index(&self, index: &SchemaVersionIndex) -> Result<(), GuardianError> {
        let path = self.index_path();
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }
        write_json_atomic(&path, index).await
    }

    fn schema_version_path(&self, label: &str) -> Result<PathBuf, GuardianError> {
        validate_label(label)?;
        Ok(self.versions_dir().join(format!("{label}.json")))
    }
}

/// Path of the summary paired with an artifact.
#[must_use]
pub fn summary_path(artifact_path: &Path) -> PathBuf {
    let stem = artifact_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    artifact_path.with_file_name(format!("{stem}{SUMMARY_SUFFIX}"))
}

/// Checks that a schema version label is usable as a file name.
///
/// # Errors
///
/// Returns [`GuardianError::InvalidArgument`] otherwise.
pub fn validate_label(label: &str) -> Result<(), GuardianError> {
    let valid = !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('.')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(GuardianError::InvalidArgument(format!(
            "invalid schema version label `{label}`"
        )))
    }
}

fn parse_artifact_name(tier: Tier, name: &str) -> Option<(DateTime<Utc>, u32)> {
    if name.ends_with(SUMMARY_SUFFIX) {
        return None;
    }
    let rest = name
        .strip_prefix(tier.as_str())?
        .strip_prefix('-')?
        .strip_suffix(".json")?;
    let (stamp, sequence) = match rest.split_once('-') {
        Some((stamp, seq)) => (stamp, seq.parse().ok()?),
        None => (rest, 0),
    };
    let created_at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()?
        .and_utc();
    Some((created_at, sequence))
}

fn sort_newest_first(entries: &mut [ArtifactEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
            .then_with(|| b.path.cmp(&a.path))
    });
}

async fn unique_artifact_path(dir: &Path, base: &str) -> Result<PathBuf, GuardianError> {
    let mut candidate = dir.join(format!("{base}.json"));
    let mut sequence = 0u32;
    while tokio::fs::try_exists(&candidate)
        .await
        .map_err(|e| GuardianError::io(&candidate, e))?
    {
        sequence += 1;
        candidate = dir.join(format!("{base}-{sequence}.json"));
    }
    Ok(candidate)
}

async fn ensure_dir(dir: &Path) -> Result<(), GuardianError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| GuardianError::io(dir, e))
}

async fn remove_if_exists(path: &Path) -> Result<(), GuardianError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GuardianError::io(path, e)),
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), GuardianError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| GuardianError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| GuardianError::io(path, e))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;

    use super::*;
    use crate::domain::schema::{ObjectCounts, SchemaSnapshot, VersionEntry};
    use crate::domain::{ArtifactMetadata, SchemaObjects, TableSnapshot};

    fn artifact(tier: Tier, created_at: DateTime<Utc>) -> BackupArtifact {
        let mut tables = BTreeMap::new();
        tables.insert("alanlar".to_string(), TableSnapshot::captured(Vec::new()));
        BackupArtifact {
            metadata: ArtifactMetadata {
                tier,
                created_at,
                host: "test".to_string(),
                tool_version: "0.0.0".to_string(),
                reason: None,
            },
            tables,
            schema_objects: SchemaObjects::default(),
        }
    }

    fn store() -> (tempfile::TempDir, SnapshotStore) {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let store = SnapshotStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn artifact_names_parse_with_and_without_sequence() {
        let Some((at, seq)) = parse_artifact_name(Tier::Daily, "daily-20260301T101500123456Z.json")
        else {
            panic!("should parse");
        };
        assert_eq!(seq, 0);
        assert_eq!(at.format(STAMP_FORMAT).to_string(), "20260301T101500123456Z");
        assert_eq!(
            parse_artifact_name(Tier::Daily, "daily-20260301T101500123456Z-2.json").map(|p| p.1),
            Some(2)
        );
        assert!(parse_artifact_name(Tier::Daily, "daily-20260301T101500123456Z.summary.json").is_none());
        assert!(parse_artifact_name(Tier::Weekly, "daily-20260301T101500123456Z.json").is_none());
        assert!(parse_artifact_name(Tier::PreRollback, "pre-rollback-20260301T101500123456Z.json").is_some());
    }

    #[test]
    fn labels_are_restricted_to_file_safe_characters() {
        assert!(validate_label("1.0.0").is_ok());
        assert!(validate_label("release_2026-03").is_ok());
        for bad in ["", "../etc", ".hidden", "a/b", "v 1"] {
            assert!(validate_label(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn write_backup_pairs_summary_and_resolves_collisions() {
        let (_dir, store) = store();
        let at = Utc::now();
        let Ok(first) = store.write_backup(&artifact(Tier::Daily, at)).await else {
            panic!("write failed");
        };
        let Ok(second) = store.write_backup(&artifact(Tier::Daily, at)).await else {
            panic!("write failed");
        };
        assert_ne!(first, second);
        assert!(summary_path(&first).exists());
        assert!(summary_path(&second).exists());

        let Ok(entries) = store.list_artifacts(Tier::Daily).await else {
            panic!("list failed");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.first().map(|e| &e.path), Some(&second));

        let Ok(summary) = store.read_summary(&first).await else {
            panic!("summary unreadable");
        };
        assert_eq!(summary.total_tables, 1);
    }

    #[tokio::test]
    async fn prune_keeps_exactly_the_newest() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mut written = Vec::new();
        for hours in 0..5 {
            let at = now - Duration::hours(hours);
            let Ok(path) = store.write_backup(&artifact(Tier::Weekly, at)).await else {
                panic!("write failed");
            };
            written.push(path);
        }
        let Ok(pruned) = store.prune_tier(Tier::Weekly, 2).await else {
            panic!("prune failed");
        };
        assert_eq!(pruned.kept, 2);
        assert_eq!(pruned.deleted.len(), 3);

        let Ok(left) = store.list_artifacts(Tier::Weekly).await else {
            panic!("list failed");
        };
        let left: Vec<_> = left.into_iter().map(|e| e.path).collect();
        assert_eq!(left, written.get(..2).map(<[PathBuf]>::to_vec).unwrap_or_default());
        for path in &pruned.deleted {
            assert!(!summary_path(path).exists());
        }
    }

    #[tokio::test]
    async fn prune_to_zero_still_keeps_the_newest() {
        let (_dir, store) = store();
        let now = Utc::now();
        let Ok(older) = store
            .write_backup(&artifact(Tier::PreRollback, now - Duration::hours(1)))
            .await
        else {
            panic!("write failed");
        };
        let Ok(newest) = store.write_backup(&artifact(Tier::PreRollback, now)).await else {
            panic!("write failed");
        };
        let Ok(pruned) = store.prune_tier(Tier::PreRollback, 0).await else {
            panic!("prune failed");
        };
        assert_eq!(pruned.kept, 1);
        assert_eq!(pruned.deleted, vec![older]);
        assert!(newest.exists());
    }

    #[tokio::test]
    async fn read_document_distinguishes_missing_and_malformed() {
        let (dir, store) = store();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            store.read_document(&missing).await,
            Err(GuardianError::ArtifactNotFound(_))
        ));
        let garbage = dir.path().join("garbage.json");
        let Ok(()) = tokio::fs::write(&garbage, b"{not json").await else {
            panic!("write failed");
        };
        assert!(matches!(
            store.read_document(&garbage).await,
            Err(GuardianError::InvalidArtifact(_))
        ));
    }

    #[tokio::test]
    async fn logs_list_newest_first() {
        let (_dir, store) = store();
        let Ok(first) = store
            .write_log(LogKind::Sync, &OperationId::new(), &serde_json::json!({"n": 1}))
            .await
        else {
            panic!("write failed");
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let Ok(second) = store
            .write_log(LogKind::Sync, &OperationId::new(), &serde_json::json!({"n": 2}))
            .await
        else {
            panic!("write failed");
        };
        let Ok(logs) = store.list_logs(LogKind::Sync).await else {
            panic!("list failed");
        };
        assert_eq!(logs, vec![second, first]);
        let Ok(empty) = store.list_logs(LogKind::Rollback).await else {
            panic!("list failed");
        };
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn schema_versions_are_write_once() {
        let (_dir, store) = store();
        let version = SchemaVersion {
            version: "1.0.0".to_string(),
            description: String::new(),
            captured_at: Utc::now(),
            hash: "abc".to_string(),
            schema: SchemaSnapshot::default(),
        };
        assert!(store.write_schema_version(&version).await.is_ok());
        assert!(matches!(
            store.write_schema_version(&version).await,
            Err(GuardianError::SchemaVersionExists(_))
        ));
        assert!(matches!(
            store.read_schema_version("2.0.0").await,
            Err(GuardianError::SchemaVersionNotFound(_))
        ));
        let Ok(read_back) = store.read_schema_version("1.0.0").await else {
            panic!("read failed");
        };
        assert_eq!(read_back, version);
    }

    #[tokio::test]
    async fn missing_index_reads_as_empty() {
        let (_dir, store) = store();
        let Ok(index) = store.read_schema_index().await else {
            panic!("read failed");
        };
        assert!(index.current_version.is_none());

        let mut index = index;
        index.current_version = Some("1.0.0".to_string());
        index.versions.insert(
            "1.0.0".to_string(),
            VersionEntry {
                hash: "abc".to_string(),
                timestamp: Utc::now(),
                description: String::new(),
                counts: ObjectCounts::default(),
            },
        );
        assert!(store.write_schema_index(&index).await.is_ok());
        let Ok(again) = store.read_schema_index().await else {
            panic!("read failed");
        };
        assert_eq!(again, index);
    }
}
