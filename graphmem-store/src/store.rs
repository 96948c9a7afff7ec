//! In-process graph store
//!
//! Owns the live node, edge and rule-definition collections plus the recall
//! audit log. Each write mutates the collections under one lock acquisition
//! with no suspension point inside it; snapshot persistence afterwards works
//! on a deep copy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use crate::audit::AuditRow;
use crate::config::StoreConfig;
use crate::edge::{Edge, EdgeKey};
use crate::error::{Result, StoreError};
use crate::health::{StoreCounts, StoreHealth};
use crate::node::{EmbeddingStatus, Node, NodeKey, NodeType};
use crate::rule::{RuleDefinition, RuleState};
use crate::snapshot::{LoadOutcome, Snapshot, SnapshotPersistence};
use crate::write::{CommitRef, PreparedBatch, WriteOutcome};

/// Live collections
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphState {
    pub nodes: HashMap<NodeKey, Node>,
    pub edges: HashMap<EdgeKey, Edge>,
    pub rules: HashMap<NodeKey, RuleDefinition>,
    pub audit: VecDeque<AuditRow>,
}

impl GraphState {
    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            rule_defs: self.rules.len(),
            audit_rows: self.audit.len(),
        }
    }
}

/// Embedded knowledge-graph store
pub struct GraphStore {
    config: StoreConfig,
    pub(crate) state: RwLock<GraphState>,
    seq: AtomicU64,
    persistence: SnapshotPersistence,
}

impl GraphStore {
    /// Create an empty store. Does not touch the snapshot file.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let persistence = SnapshotPersistence::new(config.clone());
        Ok(Self {
            config,
            state: RwLock::new(GraphState::default()),
            seq: AtomicU64::new(0),
            persistence,
        })
    }

    /// Create a store and rehydrate it from the configured snapshot
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        let outcome = store.load_snapshot().await?;
        log::info!("GraphStore opened ({:?})", outcome);
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current mutation sequence number
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Apply a prepared batch from the commit pipeline.
    ///
    /// Nodes are first-writer-wins by `(scope, id)`; edges are upserted by
    /// `(scope, type, src, dst)` keeping the maximum weight and confidence.
    /// With auto-persist on, the snapshot is written before this returns.
    pub async fn apply_write(&self, batch: PreparedBatch, commit: &CommitRef) -> Result<WriteOutcome> {
        let outcome = self.apply_mutations(batch, commit);
        log::debug!(
            "Applied commit {} ({}): {} nodes inserted, {} skipped, {} edges inserted, {} merged",
            commit.id,
            commit.hash,
            outcome.nodes_inserted,
            outcome.nodes_skipped,
            outcome.edges_inserted,
            outcome.edges_merged
        );
        self.after_mutation().await?;
        Ok(outcome)
    }

    fn apply_mutations(&self, batch: PreparedBatch, commit: &CommitRef) -> WriteOutcome {
        let now = Utc::now();
        let mut outcome = WriteOutcome::default();
        let mut state = self.state.write();

        for write in batch.nodes {
            let key = NodeKey::new(write.scope.clone(), write.id.clone());
            if state.nodes.contains_key(&key) {
                outcome.nodes_skipped += 1;
                continue;
            }

            let node = write.into_node(commit, now);
            if node.node_type == NodeType::Rule && !state.rules.contains_key(&key) {
                state
                    .rules
                    .insert(key.clone(), RuleDefinition::from_node(&node));
                outcome.rules_created += 1;
            }
            state.nodes.insert(key, node);
            outcome.nodes_inserted += 1;
        }

        for write in batch.edges {
            let edge = write.into_edge(commit, now);
            match state.edges.get_mut(&edge.key()) {
                Some(existing) => {
                    existing.merge(&edge);
                    outcome.edges_merged += 1;
                }
                None => {
                    state.edges.insert(edge.key(), edge);
                    outcome.edges_inserted += 1;
                }
            }
        }

        // Bumped under the write guard so a projection never pairs new state
        // with an old sequence number
        outcome.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        outcome
    }

    async fn after_mutation(&self) -> Result<()> {
        if self.config.auto_persist {
            self.persist().await?;
        }
        Ok(())
    }

    /// Explicit lookup by identity; reaches every tier and ignores visibility
    pub fn get_node(&self, scope: &str, id: &str) -> Option<Node> {
        self.state.read().nodes.get(&NodeKey::new(scope, id)).cloned()
    }

    pub fn get_edge(&self, scope: &str, edge_type: &str, src_id: &str, dst_id: &str) -> Option<Edge> {
        let key = EdgeKey {
            scope: scope.to_string(),
            edge_type: edge_type.to_string(),
            src_id: src_id.to_string(),
            dst_id: dst_id.to_string(),
        };
        self.state.read().edges.get(&key).cloned()
    }

    pub fn rule_definition(&self, scope: &str, node_id: &str) -> Option<RuleDefinition> {
        self.state.read().rules.get(&NodeKey::new(scope, node_id)).cloned()
    }

    /// Complete a pending or failed embedding.
    ///
    /// Returns `Ok(false)` without change when the node is already ready.
    pub async fn attach_embedding(
        &self,
        scope: &str,
        id: &str,
        vector: Vec<f32>,
        model: impl Into<String>,
    ) -> Result<bool> {
        {
            let mut state = self.state.write();
            let node = state
                .nodes
                .get_mut(&NodeKey::new(scope, id))
                .ok_or_else(|| StoreError::not_found(format!("node {scope}/{id}")))?;
            if node.embedding_status == EmbeddingStatus::Ready {
                return Ok(false);
            }
            node.embedding = Some(vector);
            node.embedding_model = Some(model.into());
            node.embedding_status = EmbeddingStatus::Ready;
            node.updated_at = Utc::now();
            self.seq.fetch_add(1, Ordering::SeqCst);
        }
        self.after_mutation().await?;
        Ok(true)
    }

    /// Advance a rule's lifecycle state
    pub async fn set_rule_state(&self, scope: &str, node_id: &str, rule_state: RuleState) -> Result<()> {
        self.update_rule(scope, node_id, |rule| rule.state = rule_state)?;
        self.after_mutation().await
    }

    /// Count one piece of positive or negative feedback against a rule
    pub async fn record_rule_feedback(&self, scope: &str, node_id: &str, positive: bool) -> Result<()> {
        self.update_rule(scope, node_id, |rule| {
            if positive {
                rule.positive_feedback += 1;
            } else {
                rule.negative_feedback += 1;
            }
        })?;
        self.after_mutation().await
    }

    fn update_rule(&self, scope: &str, node_id: &str, apply: impl FnOnce(&mut RuleDefinition)) -> Result<()> {
        {
            let mut state = self.state.write();
            let rule = state
                .rules
                .get_mut(&NodeKey::new(scope, node_id))
                .ok_or_else(|| StoreError::not_found(format!("rule {scope}/{node_id}")))?;
            apply(rule);
            rule.updated_at = Utc::now();
            self.seq.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Write the current state to the snapshot file (compacting if needed)
    pub async fn persist(&self) -> Result<()> {
        self.persistence
            .persist(|| Snapshot::project(&self.state.read(), self.seq()))
            .await
    }

    /// Replace the live collections with the snapshot on disk.
    ///
    /// A missing file yields an empty store; a corrupt file is quarantined and
    /// also yields an empty store.
    pub async fn load_snapshot(&self) -> Result<LoadOutcome> {
        let (outcome, snapshot) = self.persistence.load().await?;
        match outcome {
            LoadOutcome::Disabled => {}
            _ => {
                let loaded_seq = snapshot.as_ref().map(|s| s.seq).unwrap_or(0);
                let next = snapshot.map(Snapshot::into_state).unwrap_or_default();
                *self.state.write() = next;
                self.seq.fetch_max(loaded_seq, Ordering::SeqCst);
            }
        }
        Ok(outcome)
    }

    pub fn counts(&self) -> StoreCounts {
        self.state.read().counts()
    }

    /// Counts and persistence metrics for health reporting
    pub fn health(&self) -> StoreHealth {
        StoreHealth::new(
            self.counts(),
            self.persistence.metrics(),
            self.seq(),
            self.config.snapshot_path.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::{EdgeWrite, NodeWrite};
    use serde_json::json;
    use tempfile::TempDir;

    fn commit(n: u32) -> CommitRef {
        CommitRef::new(format!("c{n}"), format!("h{n}"))
    }

    fn memory_store() -> GraphStore {
        GraphStore::new(StoreConfig::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_node_write_is_idempotent() {
        let store = memory_store();
        let batch = PreparedBatch::new().node(
            NodeWrite::new("s", "n1", NodeType::Event)
                .title("first")
                .shared(),
        );

        let first = store.apply_write(batch.clone(), &commit(1)).await.unwrap();
        let before = store.get_node("s", "n1").unwrap();
        let second = store.apply_write(batch, &commit(2)).await.unwrap();
        let after = store.get_node("s", "n1").unwrap();

        assert_eq!(first.nodes_inserted, 1);
        assert_eq!(second.nodes_inserted, 0);
        assert_eq!(second.nodes_skipped, 1);
        assert_eq!(before, after);
        assert_eq!(after.commit_id, "c1");
        assert_eq!(store.counts().nodes, 1);
    }

    #[tokio::test]
    async fn test_same_id_in_different_scopes_are_distinct() {
        let store = memory_store();
        let batch = PreparedBatch::new()
            .node(NodeWrite::new("s1", "n1", NodeType::Entity))
            .node(NodeWrite::new("s2", "n1", NodeType::Entity));
        let outcome = store.apply_write(batch, &commit(1)).await.unwrap();
        assert_eq!(outcome.nodes_inserted, 2);
    }

    #[tokio::test]
    async fn test_edge_upsert_is_monotonic() {
        let store = memory_store();
        store
            .apply_write(
                PreparedBatch::new().edge(
                    EdgeWrite::new("s", "about", "a", "b")
                        .id("e-first")
                        .weight(0.7)
                        .confidence(0.2),
                ),
                &commit(1),
            )
            .await
            .unwrap();
        let created = store.get_edge("s", "about", "a", "b").unwrap().created_at;

        let outcome = store
            .apply_write(
                PreparedBatch::new().edge(
                    EdgeWrite::new("s", "about", "a", "b")
                        .id("e-second")
                        .weight(0.4)
                        .confidence(0.6),
                ),
                &commit(2),
            )
            .await
            .unwrap();

        let edge = store.get_edge("s", "about", "a", "b").unwrap();
        assert_eq!(outcome.edges_merged, 1);
        assert_eq!(edge.weight, 0.7);
        assert_eq!(edge.confidence, 0.6);
        assert_eq!(edge.created_at, created);
        assert_eq!(edge.id, "e-first");
        assert_eq!(store.counts().edges, 1);
    }

    #[tokio::test]
    async fn test_rule_node_synthesizes_draft_definition() {
        let store = memory_store();
        let rule = NodeWrite::new("s", "r1", NodeType::Rule)
            .slot("if", json!({"tool": "shell"}))
            .slot("then", json!({"require": "approval"}));
        let outcome = store
            .apply_write(PreparedBatch::new().node(rule.clone()), &commit(1))
            .await
            .unwrap();
        assert_eq!(outcome.rules_created, 1);

        let def = store.rule_definition("s", "r1").unwrap();
        assert_eq!(def.state, RuleState::Draft);
        assert_eq!(def.if_clause, json!({"tool": "shell"}));

        // Advance externally, then resubmit: the definition must not be reset
        store.set_rule_state("s", "r1", RuleState::Active).await.unwrap();
        let again = store
            .apply_write(PreparedBatch::new().node(rule), &commit(2))
            .await
            .unwrap();
        assert_eq!(again.rules_created, 0);
        assert_eq!(store.rule_definition("s", "r1").unwrap().state, RuleState::Active);
    }

    #[tokio::test]
    async fn test_rule_feedback_counters() {
        let store = memory_store();
        store
            .apply_write(
                PreparedBatch::new().node(NodeWrite::new("s", "r1", NodeType::Rule)),
                &commit(1),
            )
            .await
            .unwrap();
        store.record_rule_feedback("s", "r1", true).await.unwrap();
        store.record_rule_feedback("s", "r1", true).await.unwrap();
        store.record_rule_feedback("s", "r1", false).await.unwrap();

        let def = store.rule_definition("s", "r1").unwrap();
        assert_eq!(def.positive_feedback, 2);
        assert_eq!(def.negative_feedback, 1);

        let err = store.record_rule_feedback("s", "missing", true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_embedding_only_once() {
        let store = memory_store();
        store
            .apply_write(
                PreparedBatch::new().node(NodeWrite::new("s", "n1", NodeType::Concept).auto_embed()),
                &commit(1),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_node("s", "n1").unwrap().embedding_status,
            EmbeddingStatus::Pending
        );

        assert!(store.attach_embedding("s", "n1", vec![1.0, 0.0], "mini").await.unwrap());
        assert!(!store.attach_embedding("s", "n1", vec![0.0, 1.0], "other").await.unwrap());

        let node = store.get_node("s", "n1").unwrap();
        assert_eq!(node.embedding_status, EmbeddingStatus::Ready);
        assert_eq!(node.embedding, Some(vec![1.0, 0.0]));
        assert_eq!(node.embedding_model.as_deref(), Some("mini"));
    }

    #[tokio::test]
    async fn test_write_is_durable_when_auto_persist() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::in_memory().with_snapshot_path(dir.path().join("graph.json"));

        let store = GraphStore::new(config.clone()).unwrap();
        store
            .apply_write(
                PreparedBatch::new()
                    .node(NodeWrite::new("s", "n1", NodeType::Topic).shared())
                    .node(NodeWrite::new("s", "n2", NodeType::Entity).shared())
                    .edge(EdgeWrite::new("s", "about", "n1", "n2")),
                &commit(1),
            )
            .await
            .unwrap();

        let reopened = GraphStore::open(config).await.unwrap();
        assert_eq!(reopened.counts().nodes, 2);
        assert_eq!(reopened.counts().edges, 1);
        assert!(reopened.seq() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_writes_all_reach_disk() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::in_memory().with_snapshot_path(dir.path().join("graph.json"));
        let store = std::sync::Arc::new(GraphStore::new(config.clone()).unwrap());

        let tasks: Vec<_> = (0..32u32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let batch = PreparedBatch::new()
                        .node(NodeWrite::new("s", format!("n{i}"), NodeType::Event).shared());
                    store.apply_write(batch, &commit(i)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.seq(), 32);
        assert_eq!(store.health().snapshot.last_persisted_seq, 32);

        let reopened = GraphStore::open(config).await.unwrap();
        assert_eq!(reopened.counts().nodes, 32);
        assert_eq!(reopened.seq(), 32);
    }

    #[tokio::test]
    async fn test_sequence_increments_per_mutation() {
        let store = memory_store();
        let first = store
            .apply_write(PreparedBatch::new().node(NodeWrite::new("s", "a", NodeType::Event)), &commit(1))
            .await
            .unwrap();
        let second = store
            .apply_write(PreparedBatch::new(), &commit(2))
            .await
            .unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(store.seq(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StoreConfig::in_memory().with_max_snapshot_bytes(0);
        assert!(GraphStore::new(config).is_err());
    }
}
