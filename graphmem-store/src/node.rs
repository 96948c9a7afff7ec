//! Graph node types
//!
//! Core vertex types for the knowledge graph: typed nodes with a recency tier,
//! a visibility lane, optional embeddings and bounded quality signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Slot key carrying a topic's lifecycle state
pub const TOPIC_STATE_SLOT: &str = "topic_state";
/// Topic state assumed when the slot is absent
pub const DEFAULT_TOPIC_STATE: &str = "active";

/// Kind of graph vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Event,
    Topic,
    Concept,
    Entity,
    Rule,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Topic => "topic",
            Self::Concept => "concept",
            Self::Entity => "entity",
            Self::Rule => "rule",
        }
    }
}

/// Recency/importance class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Hot,
    Warm,
    Cold,
    Archive,
}

impl Tier {
    /// Only hot and warm nodes take part in similarity recall
    pub fn is_recall_eligible(&self) -> bool {
        matches!(self, Self::Hot | Self::Warm)
    }
}

/// Visibility class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLane {
    #[default]
    Private,
    Shared,
}

/// State of a node's embedding vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

/// Identity of a node: `(scope, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub scope: String,
    pub id: String,
}

impl NodeKey {
    pub fn new(scope: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            id: id.into(),
        }
    }
}

/// The agent/team identity a recall call is made on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl ConsumerIdentity {
    /// Anonymous consumer: sees shared nodes only
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Label used in audit rows
    pub fn label(&self) -> String {
        match (&self.agent_id, &self.team_id) {
            (Some(agent), Some(team)) => format!("agent:{agent}/team:{team}"),
            (Some(agent), None) => format!("agent:{agent}"),
            (None, Some(team)) => format!("team:{team}"),
            (None, None) => "anonymous".to_string(),
        }
    }
}

/// A typed graph vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub lane: MemoryLane,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_summary: Option<String>,
    /// Open attribute map
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub slots: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_status: EmbeddingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub salience: f32,
    pub importance: f32,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub commit_id: String,
}

impl Node {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.scope.clone(), self.id.clone())
    }

    pub fn is_rule(&self) -> bool {
        self.node_type == NodeType::Rule
    }

    /// Shared nodes are visible to everyone; private nodes only to their owner
    /// agent or owner team.
    pub fn is_visible_to(&self, consumer: &ConsumerIdentity) -> bool {
        match self.lane {
            MemoryLane::Shared => true,
            MemoryLane::Private => {
                let agent_match = matches!(
                    (&self.agent_id, &consumer.agent_id),
                    (Some(owner), Some(agent)) if owner == agent
                );
                let team_match = matches!(
                    (&self.team_id, &consumer.team_id),
                    (Some(owner), Some(team)) if owner == team
                );
                agent_match || team_match
            }
        }
    }

    /// Embedding usable for similarity search
    pub fn ready_embedding(&self) -> Option<&[f32]> {
        match (&self.embedding, self.embedding_status) {
            (Some(vector), EmbeddingStatus::Ready) => Some(vector.as_slice()),
            _ => None,
        }
    }

    /// Topic lifecycle state from slots, defaulting to active
    pub fn topic_state(&self) -> &str {
        self.slots
            .get(TOPIC_STATE_SLOT)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_TOPIC_STATE)
    }

    /// Member count of a topic: explicit `member_count` slot, else the length of
    /// a `members` array slot.
    pub fn member_count(&self) -> Option<u64> {
        if let Some(count) = self.slots.get("member_count").and_then(Value::as_u64) {
            return Some(count);
        }
        self.slots
            .get("members")
            .and_then(Value::as_array)
            .map(|members| members.len() as u64)
    }
}

/// Clamp a quality signal into `[0, 1]`; non-finite values fall back to the default
pub(crate) fn clamp_unit(value: Option<f32>, default: f32) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => default,
    }
}
