//! Health reporting

use std::path::PathBuf;

use serde::Serialize;

use crate::snapshot::SnapshotMetrics;

/// Live collection sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub nodes: usize,
    pub edges: usize,
    pub rule_defs: usize,
    pub audit_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Point-in-time health of a store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    /// Human-readable causes when degraded
    pub reasons: Vec<String>,
    pub counts: StoreCounts,
    pub snapshot: SnapshotMetrics,
    /// Current mutation sequence number
    pub seq: u64,
    pub snapshot_path: Option<PathBuf>,
}

impl StoreHealth {
    pub fn new(
        counts: StoreCounts,
        snapshot: SnapshotMetrics,
        seq: u64,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let mut reasons = Vec::new();
        if snapshot_path.is_some() {
            if snapshot.persist_failures > 0 && snapshot.last_persisted_seq < seq {
                reasons.push(format!(
                    "last persist failed: {}",
                    snapshot.last_error.as_deref().unwrap_or("unknown error")
                ));
            }
            if snapshot.last_over_limit_after_compaction {
                reasons.push(format!(
                    "snapshot over budget after compaction ({} bytes)",
                    snapshot.last_bytes_after_compaction
                ));
            }
            if snapshot.quarantined_loads > 0 {
                reasons.push(format!(
                    "{} corrupt snapshot(s) quarantined",
                    snapshot.quarantined_loads
                ));
            }
        }

        let status = if reasons.is_empty() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            reasons,
            counts,
            snapshot,
            seq,
            snapshot_path,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    /// Mutations applied since the last successful persist
    pub fn unpersisted_mutations(&self) -> u64 {
        self.seq.saturating_sub(self.snapshot.last_persisted_seq)
    }

    /// JSON form for health-check endpoints
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status,
            "reasons": self.reasons,
            "nodes": self.counts.nodes,
            "edges": self.counts.edges,
            "ruleDefs": self.counts.rule_defs,
            "auditRows": self.counts.audit_rows,
            "seq": self.seq,
            "unpersistedMutations": self.unpersisted_mutations(),
            "snapshotPath": self.snapshot_path,
            "snapshot": self.snapshot,
        })
    }
}
