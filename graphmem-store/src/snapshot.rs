//! Snapshot persistence
//!
//! The snapshot is a JSON document holding a version tag and full listings of
//! nodes, edges, rule definitions and recent audit rows. Writes go to a
//! temporary file that is renamed over the real path, after rotating numbered
//! backups. Unreadable snapshots are renamed aside instead of failing startup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::audit::{AuditRow, AUDIT_LOG_CAPACITY};
use crate::compaction::{CompactionReport, Compactor};
use crate::config::StoreConfig;
use crate::edge::Edge;
use crate::error::{Result, StoreError};
use crate::node::Node;
use crate::rule::RuleDefinition;
use crate::store::GraphState;

/// Format version written to and required from every snapshot
pub const SNAPSHOT_VERSION: u64 = 1;

/// Durable serialized form of the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    /// Mutation sequence number the projection was taken at
    #[serde(default)]
    pub seq: u64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub rule_defs: Vec<RuleDefinition>,
    #[serde(default)]
    pub audit: Vec<AuditRow>,
}

impl Snapshot {
    /// Deep-copied projection of the live collections, in a stable order
    pub(crate) fn project(state: &GraphState, seq: u64) -> Self {
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| (&a.scope, &a.id).cmp(&(&b.scope, &b.id)));

        let mut edges: Vec<Edge> = state.edges.values().cloned().collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));

        let mut rule_defs: Vec<RuleDefinition> = state.rules.values().cloned().collect();
        rule_defs.sort_by(|a, b| (&a.scope, &a.node_id).cmp(&(&b.scope, &b.node_id)));

        Self {
            version: SNAPSHOT_VERSION,
            seq,
            nodes,
            edges,
            rule_defs,
            audit: state.audit.iter().cloned().collect(),
        }
    }

    pub(crate) fn into_state(self) -> GraphState {
        let mut state = GraphState::default();
        for node in self.nodes {
            state.nodes.insert(node.key(), node);
        }
        for edge in self.edges {
            state.edges.insert(edge.key(), edge);
        }
        for rule in self.rule_defs {
            state.rules.insert(rule.key(), rule);
        }
        let skip = self.audit.len().saturating_sub(AUDIT_LOG_CAPACITY);
        state.audit = self.audit.into_iter().skip(skip).collect();
        state
    }

    /// Serialized size in bytes
    pub fn encoded_len(&self) -> Result<u64> {
        Ok(serde_json::to_vec(self)?.len() as u64)
    }
}

/// Check the document shape before trusting it
fn validate_document(doc: &Value) -> std::result::Result<(), String> {
    let obj = doc
        .as_object()
        .ok_or_else(|| "snapshot is not a JSON object".to_string())?;
    match obj.get("version").and_then(Value::as_u64) {
        Some(SNAPSHOT_VERSION) => {}
        Some(other) => return Err(format!("unsupported snapshot version {other}")),
        None => return Err("missing version tag".to_string()),
    }
    for field in ["nodes", "edges", "rule_defs"] {
        if !obj.get(field).is_some_and(Value::is_array) {
            return Err(format!("missing or invalid '{field}' collection"));
        }
    }
    if obj.get("audit").is_some_and(|audit| !audit.is_array()) {
        return Err("invalid 'audit' collection".to_string());
    }
    Ok(())
}

fn parse_snapshot(raw: &[u8]) -> std::result::Result<Snapshot, String> {
    let doc: Value = serde_json::from_slice(raw).map_err(|e| format!("unparseable snapshot: {e}"))?;
    validate_document(&doc)?;
    serde_json::from_value(doc).map_err(|e| format!("invalid snapshot record: {e}"))
}

/// Result of loading the snapshot file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No snapshot path configured
    Disabled,
    /// No file on disk; the store starts empty
    Missing,
    Loaded {
        nodes: usize,
        edges: usize,
        rule_defs: usize,
    },
    /// The file was corrupt and moved aside; the store starts empty
    Quarantined { moved_to: Option<PathBuf> },
}

/// Persistence counters kept for the store's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotMetrics {
    pub persist_attempts: u64,
    pub persist_failures: u64,
    pub quarantined_loads: u64,
    pub last_error: Option<String>,
    pub last_bytes_before_compaction: u64,
    pub last_bytes_after_compaction: u64,
    pub last_over_limit_after_compaction: bool,
    pub last_compaction: CompactionReport,
    pub last_persisted_seq: u64,
    pub last_persisted_at: Option<DateTime<Utc>>,
    pub last_quarantine_path: Option<PathBuf>,
}

/// `<path>.<suffix>`
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub fn backup_path(path: &Path, index: usize) -> PathBuf {
    sibling_path(path, &index.to_string())
}

async fn exists(path: &Path) -> Result<bool> {
    Ok(tokio::fs::try_exists(path).await?)
}

/// Shift `.1..=.N-1` up by one, drop `.N`, copy the live file to `.1`
async fn rotate_backups(path: &Path, max_backups: usize) -> Result<()> {
    if max_backups == 0 || !exists(path).await? {
        return Ok(());
    }

    let oldest = backup_path(path, max_backups);
    if exists(&oldest).await? {
        tokio::fs::remove_file(&oldest).await?;
    }
    for index in (1..max_backups).rev() {
        let from = backup_path(path, index);
        if exists(&from).await? {
            tokio::fs::rename(&from, backup_path(path, index + 1)).await?;
        }
    }
    tokio::fs::copy(path, backup_path(path, 1)).await?;
    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = sibling_path(path, "tmp");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Writes and loads snapshots for one store
pub(crate) struct SnapshotPersistence {
    config: StoreConfig,
    metrics: Mutex<SnapshotMetrics>,
    /// Serialises persist calls so backup rotation never overlaps
    write_lock: tokio::sync::Mutex<()>,
}

impl SnapshotPersistence {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(SnapshotMetrics::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn metrics(&self) -> SnapshotMetrics {
        self.metrics.lock().clone()
    }

    /// Write the projection produced by `project`.
    ///
    /// The projection is taken while holding the write lock, so snapshots
    /// reach disk in mutation order and a later write never loses to an
    /// earlier one.
    pub async fn persist(&self, project: impl FnOnce() -> Snapshot) -> Result<()> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let snapshot = project();
        self.metrics.lock().persist_attempts += 1;

        match self.write_snapshot(path, snapshot).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut metrics = self.metrics.lock();
                metrics.persist_failures += 1;
                metrics.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn write_snapshot(&self, path: &Path, mut snapshot: Snapshot) -> Result<()> {
        let max_bytes = self.config.max_snapshot_bytes;
        let mut bytes = serde_json::to_vec(&snapshot)?;
        let bytes_before = bytes.len() as u64;

        let report = if bytes_before > max_bytes {
            let compactor = Compactor::new(&self.config.compaction, max_bytes)
                .max_rounds(self.config.max_compaction_rounds)
                .payload_trimming(self.config.compaction_enabled);
            let report = compactor.compact(&mut snapshot)?;
            bytes = serde_json::to_vec(&snapshot)?;
            report
        } else {
            CompactionReport::default()
        };

        let bytes_after = bytes.len() as u64;
        let over_limit = bytes_after > max_bytes;
        {
            let mut metrics = self.metrics.lock();
            metrics.last_bytes_before_compaction = bytes_before;
            metrics.last_bytes_after_compaction = bytes_after;
            metrics.last_over_limit_after_compaction = over_limit;
            metrics.last_compaction = report;
        }

        if over_limit {
            if self.config.strict_budget {
                log::warn!(
                    "Snapshot {} is {} bytes after compaction (limit {}); refusing to write",
                    path.display(),
                    bytes_after,
                    max_bytes
                );
                return Err(StoreError::SnapshotOverBudget {
                    bytes: bytes_after,
                    max_bytes,
                });
            }
            log::warn!(
                "Snapshot {} is {} bytes after compaction (limit {}); writing anyway",
                path.display(),
                bytes_after,
                max_bytes
            );
        }

        rotate_backups(path, self.config.max_backups).await?;
        write_atomic(path, &bytes).await?;

        let mut metrics = self.metrics.lock();
        metrics.last_persisted_seq = snapshot.seq;
        metrics.last_persisted_at = Some(Utc::now());
        log::debug!(
            "Snapshot written to {} ({} bytes, seq {})",
            path.display(),
            bytes_after,
            snapshot.seq
        );
        Ok(())
    }

    /// Read the snapshot file, quarantining it if it is corrupt
    pub async fn load(&self) -> Result<(LoadOutcome, Option<Snapshot>)> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok((LoadOutcome::Disabled, None));
        };

        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No snapshot at {}, starting empty", path.display());
                return Ok((LoadOutcome::Missing, None));
            }
            Err(err) => return Err(err.into()),
        };

        match parse_snapshot(&raw) {
            Ok(snapshot) => {
                let outcome = LoadOutcome::Loaded {
                    nodes: snapshot.nodes.len(),
                    edges: snapshot.edges.len(),
                    rule_defs: snapshot.rule_defs.len(),
                };
                log::info!("Loaded snapshot from {}: {:?}", path.display(), outcome);
                Ok((outcome, Some(snapshot)))
            }
            Err(reason) => {
                let moved_to = self.quarantine(path, &reason).await;
                Ok((LoadOutcome::Quarantined { moved_to }, None))
            }
        }
    }

    async fn quarantine(&self, path: &Path, reason: &str) -> Option<PathBuf> {
        let moved_to = match quarantine_target(path).await {
            Ok(target) => self.move_aside(path, target, reason).await,
            Err(err) => {
                log::error!(
                    "Corrupt snapshot {} ({}) could not be moved aside: {}",
                    path.display(),
                    reason,
                    err
                );
                None
            }
        };

        let mut metrics = self.metrics.lock();
        metrics.quarantined_loads += 1;
        metrics.last_error = Some(reason.to_string());
        metrics.last_quarantine_path = moved_to.clone();
        moved_to
    }

    async fn move_aside(&self, path: &Path, target: PathBuf, reason: &str) -> Option<PathBuf> {
        match tokio::fs::rename(path, &target).await {
            Ok(()) => {
                log::warn!(
                    "Quarantined corrupt snapshot {} -> {} ({})",
                    path.display(),
                    target.display(),
                    reason
                );
                Some(target)
            }
            Err(err) => {
                log::error!(
                    "Corrupt snapshot {} ({}) could not be moved aside: {}",
                    path.display(),
                    reason,
                    err
                );
                None
            }
        }
    }
}

/// Timestamped quarantine path that does not exist yet. A numeric suffix
/// separates quarantines landing in the same millisecond.
async fn quarantine_target(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let base = sibling_path(path, &format!("corrupt-{stamp}"));
    if !exists(&base).await? {
        return Ok(base);
    }
    let mut index = 1;
    loop {
        let candidate = sibling_path(&base, &index.to_string());
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
        index += 1;
    }
}
