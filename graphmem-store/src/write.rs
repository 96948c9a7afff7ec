//! Write path input types
//!
//! Batches arrive already validated and scope-assigned by the commit pipeline.
//! These types only carry them into the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::edge::Edge;
use crate::node::{clamp_unit, EmbeddingStatus, MemoryLane, Node, NodeType, Tier};

/// Default for salience, importance and confidence when not supplied
pub const DEFAULT_QUALITY: f32 = 0.5;
pub const DEFAULT_EDGE_WEIGHT: f32 = 0.5;
pub const DEFAULT_EDGE_CONFIDENCE: f32 = 0.5;

/// The commit that produced a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub id: String,
    pub hash: String,
}

impl CommitRef {
    pub fn new(id: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hash: hash.into(),
        }
    }
}

/// A node as submitted by the write pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeWrite {
    pub id: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub lane: MemoryLane,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text_summary: Option<String>,
    #[serde(default)]
    pub slots: Map<String, Value>,
    #[serde(default)]
    pub raw_refs: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Embedding will be produced asynchronously by the embedding worker
    #[serde(default)]
    pub auto_embed: bool,
    #[serde(default)]
    pub salience: Option<f32>,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl NodeWrite {
    pub fn new(scope: impl Into<String>, id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            scope: scope.into(),
            node_type,
            tier: None,
            lane: MemoryLane::default(),
            agent_id: None,
            team_id: None,
            title: None,
            text_summary: None,
            slots: Map::new(),
            raw_refs: Vec::new(),
            evidence_refs: Vec::new(),
            embedding: None,
            embedding_model: None,
            auto_embed: false,
            salience: None,
            importance: None,
            confidence: None,
        }
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn lane(mut self, lane: MemoryLane) -> Self {
        self.lane = lane;
        self
    }

    pub fn shared(self) -> Self {
        self.lane(MemoryLane::Shared)
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.text_summary = Some(summary.into());
        self
    }

    pub fn slot(mut self, key: impl Into<String>, value: Value) -> Self {
        self.slots.insert(key.into(), value);
        self
    }

    pub fn raw_ref(mut self, reference: impl Into<String>) -> Self {
        self.raw_refs.push(reference.into());
        self
    }

    pub fn evidence_ref(mut self, reference: impl Into<String>) -> Self {
        self.evidence_refs.push(reference.into());
        self
    }

    pub fn embedding(mut self, vector: Vec<f32>, model: impl Into<String>) -> Self {
        self.embedding = Some(vector);
        self.embedding_model = Some(model.into());
        self
    }

    pub fn auto_embed(mut self) -> Self {
        self.auto_embed = true;
        self
    }

    pub fn quality(mut self, salience: f32, importance: f32, confidence: f32) -> Self {
        self.salience = Some(salience);
        self.importance = Some(importance);
        self.confidence = Some(confidence);
        self
    }

    /// Embedding status implied by what the writer supplied
    pub fn embedding_status(&self) -> EmbeddingStatus {
        match (&self.embedding, self.auto_embed) {
            (Some(_), _) => EmbeddingStatus::Ready,
            (None, true) => EmbeddingStatus::Pending,
            (None, false) => EmbeddingStatus::Failed,
        }
    }

    /// Materialize the stored node
    pub(crate) fn into_node(self, commit: &CommitRef, now: DateTime<Utc>) -> Node {
        let embedding_status = self.embedding_status();
        Node {
            node_type: self.node_type,
            tier: self.tier.unwrap_or_default(),
            lane: self.lane,
            agent_id: self.agent_id,
            team_id: self.team_id,
            title: self.title,
            text_summary: self.text_summary,
            slots: self.slots,
            raw_refs: self.raw_refs,
            evidence_refs: self.evidence_refs,
            embedding: self.embedding,
            embedding_status,
            embedding_model: self.embedding_model,
            salience: clamp_unit(self.salience, DEFAULT_QUALITY),
            importance: clamp_unit(self.importance, DEFAULT_QUALITY),
            confidence: clamp_unit(self.confidence, DEFAULT_QUALITY),
            created_at: now,
            updated_at: now,
            commit_id: commit.id.clone(),
            id: self.id,
            scope: self.scope,
        }
    }
}

/// An edge as submitted by the write pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeWrite {
    /// Surface id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub scope: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub src_id: String,
    pub dst_id: String,
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub decay_rate: Option<f32>,
}

impl EdgeWrite {
    pub fn new(
        scope: impl Into<String>,
        edge_type: impl Into<String>,
        src_id: impl Into<String>,
        dst_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            scope: scope.into(),
            edge_type: edge_type.into(),
            src_id: src_id.into(),
            dst_id: dst_id.into(),
            weight: None,
            confidence: None,
            decay_rate: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn decay_rate(mut self, decay_rate: f32) -> Self {
        self.decay_rate = Some(decay_rate);
        self
    }

    pub(crate) fn into_edge(self, commit: &CommitRef, now: DateTime<Utc>) -> Edge {
        Edge {
            id: self
                .id
                .unwrap_or_else(|| format!("edge-{}", uuid::Uuid::new_v4())),
            scope: self.scope,
            edge_type: self.edge_type,
            src_id: self.src_id,
            dst_id: self.dst_id,
            weight: clamp_unit(self.weight, DEFAULT_EDGE_WEIGHT),
            confidence: clamp_unit(self.confidence, DEFAULT_EDGE_CONFIDENCE),
            decay_rate: self
                .decay_rate
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or(0.0),
            created_at: now,
            updated_at: now,
            commit_id: commit.id.clone(),
        }
    }
}

/// Nodes and edges of one commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedBatch {
    #[serde(default)]
    pub nodes: Vec<NodeWrite>,
    #[serde(default)]
    pub edges: Vec<EdgeWrite>,
}

impl PreparedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: NodeWrite) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: EdgeWrite) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// What a single `apply_write` changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub nodes_inserted: usize,
    /// Nodes whose `(scope, id)` already existed
    pub nodes_skipped: usize,
    pub edges_inserted: usize,
    pub edges_merged: usize,
    pub rules_created: usize,
    /// Mutation sequence number after this write
    pub seq: u64,
}
