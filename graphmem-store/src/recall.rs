//! Recall reads: similarity candidates (stage 1) and graph expansion (stage 2)
//!
//! Every read here treats "nothing matched" as an empty result, never an error.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::edge::Edge;
use crate::node::{
    ConsumerIdentity, EmbeddingStatus, MemoryLane, Node, NodeKey, NodeType, Tier, DEFAULT_TOPIC_STATE,
};
use crate::rule::RuleDefinition;
use crate::store::{GraphState, GraphStore};

/// Cosine distance (`1 - cosine similarity`).
///
/// A zero-norm vector on either side, or mismatched dimensions, is maximally
/// dissimilar (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b)
    }
}

/// A stage-1 recall hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: Option<String>,
    pub text_summary: Option<String>,
    pub tier: Tier,
    pub salience: f32,
    pub confidence: f32,
    /// `1 - distance`
    pub similarity: f32,
}

/// Inputs to stage-1 candidate selection
#[derive(Debug, Clone)]
pub struct Stage1Request {
    pub query_embedding: Vec<f32>,
    pub scope: String,
    /// Nearest neighbours considered before the policy filter
    pub oversample: usize,
    pub limit: usize,
    pub consumer: ConsumerIdentity,
}

/// Expansion depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hops {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for Hops {
    type Error = crate::error::StoreError;

    fn try_from(hops: u8) -> crate::error::Result<Self> {
        match hops {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(crate::error::StoreError::config(format!(
                "hops must be 1 or 2, got {other}"
            ))),
        }
    }
}

/// Stage-2 edge expansion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionParams {
    pub hops: Hops,
    pub min_weight: f32,
    pub min_confidence: f32,
    /// Per-side edge budget for the first hop
    pub hop1_budget: usize,
    /// Per-side edge budget for the second hop
    pub hop2_budget: usize,
    pub total_budget: usize,
}

impl Default for ExpansionParams {
    fn default() -> Self {
        Self {
            hops: Hops::One,
            min_weight: 0.0,
            min_confidence: 0.0,
            hop1_budget: 16,
            hop2_budget: 8,
            total_budget: 32,
        }
    }
}

/// Inputs to stage-2 edge expansion
#[derive(Debug, Clone)]
pub struct Stage2EdgeRequest {
    pub seed_ids: Vec<String>,
    pub scope: String,
    pub params: ExpansionParams,
}

/// Inputs to stage-2 node projection
#[derive(Debug, Clone)]
pub struct Stage2NodeRequest {
    pub scope: String,
    pub ids: Vec<String>,
    pub consumer: ConsumerIdentity,
    pub include_slots: bool,
}

/// Full node projection returned by stage 2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub tier: Tier,
    pub lane: MemoryLane,
    pub agent_id: Option<String>,
    pub team_id: Option<String>,
    pub title: Option<String>,
    pub text_summary: Option<String>,
    /// Present only when slots were requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<Map<String, Value>>,
    pub raw_refs: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub embedding_status: EmbeddingStatus,
    pub embedding_model: Option<String>,
    pub salience: f32,
    pub importance: f32,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub commit_id: String,
    /// Topics only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_state: Option<String>,
    /// Topics only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
}

impl NodeRow {
    fn project(node: &Node, include_slots: bool) -> Self {
        let is_topic = node.node_type == NodeType::Topic;
        Self {
            id: node.id.clone(),
            scope: node.scope.clone(),
            node_type: node.node_type,
            tier: node.tier,
            lane: node.lane,
            agent_id: node.agent_id.clone(),
            team_id: node.team_id.clone(),
            title: node.title.clone(),
            text_summary: node.text_summary.clone(),
            slots: include_slots.then(|| node.slots.clone()),
            raw_refs: node.raw_refs.clone(),
            evidence_refs: node.evidence_refs.clone(),
            embedding_status: node.embedding_status,
            embedding_model: node.embedding_model.clone(),
            salience: node.salience,
            importance: node.importance,
            confidence: node.confidence,
            created_at: node.created_at,
            updated_at: node.updated_at,
            commit_id: node.commit_id.clone(),
            topic_state: is_topic.then(|| node.topic_state().to_string()),
            member_count: if is_topic { node.member_count() } else { None },
        }
    }
}

/// Policy filter applied after the geometric oversample
fn passes_policy(state: &GraphState, node: &Node) -> bool {
    match node.node_type {
        NodeType::Topic => node.topic_state() == DEFAULT_TOPIC_STATE,
        NodeType::Rule => state
            .rules
            .get(&node.key())
            .is_some_and(|rule| rule.state.is_recallable()),
        NodeType::Event | NodeType::Concept | NodeType::Entity => true,
    }
}

/// Weight desc, then confidence desc, then id asc
fn edge_rank(a: &Edge, b: &Edge) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.id.cmp(&b.id))
}

fn source_of(edge: &Edge) -> &str {
    &edge.src_id
}

fn target_of(edge: &Edge) -> &str {
    &edge.dst_id
}

/// Budgeted selection around `roots`: up to `budget` edges leaving the set and
/// up to `budget` edges entering it, merged without duplicates.
fn select_ranked<'a>(eligible: &[&'a Edge], roots: &HashSet<&str>, budget: usize) -> Vec<&'a Edge> {
    let side = |pick: fn(&Edge) -> &str| -> Vec<&'a Edge> {
        let mut edges: Vec<&'a Edge> = eligible
            .iter()
            .copied()
            .filter(|e| roots.contains(pick(e)))
            .collect();
        edges.sort_by(|a, b| edge_rank(a, b));
        edges.truncate(budget);
        edges
    };

    let mut seen = HashSet::new();
    let mut selected: Vec<&'a Edge> = side(source_of)
        .into_iter()
        .chain(side(target_of))
        .filter(|&e| seen.insert(e.id.as_str()))
        .collect();
    selected.sort_by(|a, b| edge_rank(a, b));
    selected
}

impl GraphStore {
    /// Stage 1: nearest recall-eligible nodes to `query`, narrowed by policy.
    ///
    /// Only hot/warm nodes in `scope` with a ready embedding that the consumer
    /// may see are ranked. The `oversample` nearest by cosine distance (id
    /// breaks ties) then pass the topic/rule policy filter, and up to `limit`
    /// survivors are returned.
    pub fn stage1_candidates(
        &self,
        query: &[f32],
        scope: &str,
        oversample: usize,
        limit: usize,
        consumer: &ConsumerIdentity,
    ) -> Vec<Candidate> {
        let state = self.state.read();

        let mut ranked: Vec<(f32, &Node)> = state
            .nodes
            .values()
            .filter(|n| n.scope == scope && n.tier.is_recall_eligible() && n.is_visible_to(consumer))
            .filter_map(|n| n.ready_embedding().map(|v| (cosine_distance(v, query), n)))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        ranked
            .into_iter()
            .take(oversample)
            .filter(|(_, node)| passes_policy(&state, node))
            .take(limit)
            .map(|(distance, node)| Candidate {
                id: node.id.clone(),
                node_type: node.node_type,
                title: node.title.clone(),
                text_summary: node.text_summary.clone(),
                tier: node.tier,
                salience: node.salience,
                confidence: node.confidence,
                similarity: 1.0 - distance,
            })
            .collect()
    }

    /// Stage 2: edges around the seeds, one or two hops out.
    ///
    /// With two hops the second selection is rooted at the seeds plus every
    /// endpoint of the first hop, and that selection is the result.
    pub fn stage2_edges(&self, seed_ids: &[String], scope: &str, params: &ExpansionParams) -> Vec<Edge> {
        let state = self.state.read();
        let eligible: Vec<&Edge> = state
            .edges
            .values()
            .filter(|e| {
                e.scope == scope && e.weight >= params.min_weight && e.confidence >= params.min_confidence
            })
            .collect();

        let seeds: HashSet<&str> = seed_ids.iter().map(String::as_str).collect();
        let mut selected = select_ranked(&eligible, &seeds, params.hop1_budget);

        if params.hops == Hops::Two {
            let mut roots = seeds;
            for edge in &selected {
                roots.insert(edge.src_id.as_str());
                roots.insert(edge.dst_id.as_str());
            }
            selected = select_ranked(&eligible, &roots, params.hop2_budget);
        }

        selected.truncate(params.total_budget);
        selected.into_iter().cloned().collect()
    }

    /// Stage 2: projections of the requested nodes the consumer may see.
    ///
    /// Ids outside `scope`, unknown, or invisible are dropped, so the result
    /// can be shorter than `ids`. Request order is kept.
    pub fn stage2_nodes(
        &self,
        scope: &str,
        ids: &[String],
        consumer: &ConsumerIdentity,
        include_slots: bool,
    ) -> Vec<NodeRow> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|&id| seen.insert(id.as_str()))
            .filter_map(|id| state.nodes.get(&NodeKey::new(scope, id.as_str())))
            .filter(|node| node.is_visible_to(consumer))
            .map(|node| NodeRow::project(node, include_slots))
            .collect()
    }

    /// Rule definitions for the given rule node ids in `scope`
    pub fn rule_defs(&self, scope: &str, ids: &[String]) -> Vec<RuleDefinition> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|&id| seen.insert(id.as_str()))
            .filter_map(|id| state.rules.get(&NodeKey::new(scope, id.as_str())))
            .cloned()
            .collect()
    }
}
