//! Snapshot compaction
//!
//! Shrinks an over-budget snapshot projection in escalating phases, stopping as
//! soon as the serialized size fits:
//!
//! 1. Audit trim: keep only the most recent audit rows.
//! 2. Payload trimming by tier (archive+cold, then warm, then hot): clear slots
//!    and references and shorten summaries of non-rule nodes.
//! 3. Edge pruning: drop the lowest-scoring fraction of edges per round.
//! 4. Node pruning: drop the lowest-scoring fraction of nodes per round,
//!    cascading to their edges and rule definitions.
//!
//! Phases 3 and 4 share a bounded round loop. Only the projection is touched,
//! never the live store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CompactionPolicy;
use crate::edge::EdgeKey;
use crate::error::Result;
use crate::node::{Node, NodeKey, Tier};
use crate::snapshot::Snapshot;

const MILLIS_PER_DAY: f64 = 86_400_000.0;
const ELLIPSIS: char = '…';

/// What one compaction run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Compaction was needed and ran
    pub applied: bool,
    /// Prune rounds executed
    pub rounds: usize,
    pub payload_nodes_trimmed: usize,
    pub dropped_audit_rows: usize,
    pub dropped_edges: usize,
    pub dropped_nodes: usize,
    pub dropped_rule_defs: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Tier groups for the payload trimming passes, coldest first
const PAYLOAD_PASSES: [&[Tier]; 3] = [&[Tier::Archive, Tier::Cold], &[Tier::Warm], &[Tier::Hot]];

/// Runs the compaction phases against a snapshot projection
pub struct Compactor<'a> {
    policy: &'a CompactionPolicy,
    target_bytes: u64,
    max_rounds: usize,
    payload_trimming: bool,
}

impl<'a> Compactor<'a> {
    pub fn new(policy: &'a CompactionPolicy, target_bytes: u64) -> Self {
        Self {
            policy,
            target_bytes,
            max_rounds: 8,
            payload_trimming: true,
        }
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// With trimming off only the audit log is shortened and dangling edges
    /// are swept; no other graph record is altered or dropped.
    pub fn payload_trimming(mut self, enabled: bool) -> Self {
        self.payload_trimming = enabled;
        self
    }

    fn fits(&self, snapshot: &Snapshot) -> Result<bool> {
        Ok(snapshot.encoded_len()? <= self.target_bytes)
    }

    pub fn compact(&self, snapshot: &mut Snapshot) -> Result<CompactionReport> {
        let bytes_before = snapshot.encoded_len()?;
        let mut report = CompactionReport {
            bytes_before,
            bytes_after: bytes_before,
            ..Default::default()
        };
        if bytes_before <= self.target_bytes {
            return Ok(CompactionReport::default());
        }
        report.applied = true;

        self.run_phases(snapshot, &mut report)?;

        report.bytes_after = snapshot.encoded_len()?;
        log::debug!(
            "Compaction {} -> {} bytes (target {}): {:?}",
            report.bytes_before,
            report.bytes_after,
            self.target_bytes,
            report
        );
        Ok(report)
    }

    fn run_phases(&self, snapshot: &mut Snapshot, report: &mut CompactionReport) -> Result<()> {
        // Edges whose endpoints are not in the snapshot never survive compaction
        report.dropped_edges += drop_dangling_edges(snapshot);

        // Phase 1: audit trim
        let excess = snapshot.audit.len().saturating_sub(self.policy.audit_keep_rows);
        if excess > 0 {
            snapshot.audit.drain(..excess);
            report.dropped_audit_rows = excess;
        }
        if self.fits(snapshot)? || !self.payload_trimming {
            return Ok(());
        }

        // Phase 2: payload trimming, coldest tiers first
        for tiers in PAYLOAD_PASSES {
            for node in snapshot
                .nodes
                .iter_mut()
                .filter(|n| !n.is_rule() && tiers.contains(&n.tier))
            {
                if trim_payload(node, self.policy.summary_max_chars) {
                    report.payload_nodes_trimmed += 1;
                }
            }
            if self.fits(snapshot)? {
                return Ok(());
            }
        }

        // Phases 3 and 4: prune rounds
        for _ in 0..self.max_rounds {
            report.rounds += 1;

            let edges_dropped = self.prune_edges(snapshot);
            report.dropped_edges += edges_dropped;
            if self.fits(snapshot)? {
                return Ok(());
            }

            let (nodes_dropped, cascade_edges, cascade_rules) = self.prune_nodes(snapshot);
            report.dropped_nodes += nodes_dropped;
            report.dropped_edges += cascade_edges;
            report.dropped_rule_defs += cascade_rules;
            if self.fits(snapshot)? {
                return Ok(());
            }

            if edges_dropped == 0 && nodes_dropped == 0 {
                log::debug!("Compaction round made no progress, stopping");
                break;
            }
        }
        Ok(())
    }

    /// Drop the lowest-scoring fraction of edges; returns how many were dropped
    fn prune_edges(&self, snapshot: &mut Snapshot) -> usize {
        let count = drop_count(snapshot.edges.len(), self.policy.edge_drop_ratio);
        if count == 0 {
            return 0;
        }

        let origin = earliest(snapshot.edges.iter().map(|e| e.created_at));
        let mut scored: Vec<(f64, EdgeKey)> = snapshot
            .edges
            .iter()
            .map(|e| {
                let score = f64::from(e.weight) + f64::from(e.confidence) + recency_days(e.created_at, origin);
                (score, e.key())
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let doomed: HashSet<EdgeKey> = scored
            .into_iter()
            .take(count)
            .map(|(_, key)| key)
            .collect();
        let before = snapshot.edges.len();
        snapshot.edges.retain(|e| !doomed.contains(&e.key()));
        before - snapshot.edges.len()
    }

    /// Score used to rank nodes for eviction; lower goes first
    pub fn node_score(&self, node: &Node, origin: DateTime<Utc>) -> f64 {
        let policy = self.policy;
        let rule_bonus = if node.is_rule() { policy.rule_bonus } else { 0.0 };
        policy.tier_multiplier * policy.tier_weights.weight(node.tier)
            + rule_bonus
            + f64::from(node.salience)
            + f64::from(node.importance)
            + f64::from(node.confidence)
            + recency_days(node.updated_at, origin)
    }

    /// Drop the lowest-scoring fraction of nodes and everything referencing
    /// them. Returns `(nodes, edges, rule_defs)` dropped.
    fn prune_nodes(&self, snapshot: &mut Snapshot) -> (usize, usize, usize) {
        let count = drop_count(snapshot.nodes.len(), self.policy.node_drop_ratio);
        if count == 0 {
            return (0, 0, 0);
        }

        let origin = earliest(snapshot.nodes.iter().map(|n| n.updated_at));
        let mut scored: Vec<(f64, &Node)> = snapshot
            .nodes
            .iter()
            .map(|n| (self.node_score(n, origin), n))
            .collect();
        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| (&a.1.scope, &a.1.id).cmp(&(&b.1.scope, &b.1.id)))
        });

        let doomed: HashSet<NodeKey> = scored
            .into_iter()
            .take(count)
            .map(|(_, n)| n.key())
            .collect();
        let is_doomed = |scope: &str, id: &str| doomed.contains(&NodeKey::new(scope, id));

        let nodes_before = snapshot.nodes.len();
        snapshot.nodes.retain(|n| !doomed.contains(&n.key()));

        let edges_before = snapshot.edges.len();
        snapshot
            .edges
            .retain(|e| !is_doomed(&e.scope, &e.src_id) && !is_doomed(&e.scope, &e.dst_id));

        let rules_before = snapshot.rule_defs.len();
        snapshot
            .rule_defs
            .retain(|r| !is_doomed(&r.scope, &r.node_id));

        (
            nodes_before - snapshot.nodes.len(),
            edges_before - snapshot.edges.len(),
            rules_before - snapshot.rule_defs.len(),
        )
    }
}

/// Clear slots and references and shorten the summary. Returns whether
/// anything changed.
fn trim_payload(node: &mut Node, summary_max_chars: usize) -> bool {
    let mut changed = false;
    if !node.slots.is_empty() {
        node.slots.clear();
        changed = true;
    }
    if !node.raw_refs.is_empty() || !node.evidence_refs.is_empty() {
        node.raw_refs.clear();
        node.evidence_refs.clear();
        changed = true;
    }
    if let Some(summary) = node.text_summary.as_mut() {
        if summary.chars().count() > summary_max_chars {
            *summary = truncate_with_ellipsis(summary, summary_max_chars);
            changed = true;
        }
    }
    changed
}

/// At most `max_chars` characters, the last being an ellipsis
fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}

fn drop_dangling_edges(snapshot: &mut Snapshot) -> usize {
    let present: HashSet<(&str, &str)> = snapshot
        .nodes
        .iter()
        .map(|n| (n.scope.as_str(), n.id.as_str()))
        .collect();
    let before = snapshot.edges.len();
    snapshot.edges.retain(|e| {
        present.contains(&(e.scope.as_str(), e.src_id.as_str()))
            && present.contains(&(e.scope.as_str(), e.dst_id.as_str()))
    });
    before - snapshot.edges.len()
}

/// `floor(len * ratio)`, at least one while anything remains
fn drop_count(len: usize, ratio: f64) -> usize {
    if len == 0 {
        return 0;
    }
    ((len as f64 * ratio).floor() as usize).clamp(1, len)
}

fn earliest(times: impl Iterator<Item = DateTime<Utc>>) -> DateTime<Utc> {
    times.min().unwrap_or_else(Utc::now)
}

/// Fractional days since `origin`. Scores only need a common origin because
/// they are compared, never interpreted absolutely.
fn recency_days(at: DateTime<Utc>, origin: DateTime<Utc>) -> f64 {
    (at - origin).num_milliseconds() as f64 / MILLIS_PER_DAY
}
