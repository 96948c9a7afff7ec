//! Graph edge types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upsert identity of an edge: `(scope, type, src, dst)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub scope: String,
    pub edge_type: String,
    pub src_id: String,
    pub dst_id: String,
}

/// A typed directed relation between two nodes of one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Surface identifier (first-seen id is kept across upserts)
    pub id: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub src_id: String,
    pub dst_id: String,
    pub weight: f32,
    pub confidence: f32,
    #[serde(default)]
    pub decay_rate: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub commit_id: String,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            scope: self.scope.clone(),
            edge_type: self.edge_type.clone(),
            src_id: self.src_id.clone(),
            dst_id: self.dst_id.clone(),
        }
    }

    /// Whether either endpoint is `node_id`
    pub fn touches(&self, node_id: &str) -> bool {
        self.src_id == node_id || self.dst_id == node_id
    }

    /// Merge a repeated upsert into this edge.
    ///
    /// Weight and confidence only ever grow; `created_at` and the surface id are
    /// never replaced.
    pub fn merge(&mut self, incoming: &Edge) {
        self.weight = self.weight.max(incoming.weight);
        self.confidence = self.confidence.max(incoming.confidence);
        self.decay_rate = incoming.decay_rate;
        self.updated_at = incoming.updated_at;
        self.commit_id = incoming.commit_id.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn edge(id: &str, weight: f32, confidence: f32, at: DateTime<Utc>) -> Edge {
        Edge {
            id: id.into(),
            scope: "s".into(),
            edge_type: "relates".into(),
            src_id: "a".into(),
            dst_id: "b".into(),
            weight,
            confidence,
            decay_rate: 0.0,
            created_at: at,
            updated_at: at,
            commit_id: "c".into(),
        }
    }

    #[test]
    fn test_merge_takes_maximum() {
        let t0 = Utc::now();
        let mut first = edge("e1", 0.8, 0.2, t0);
        let second = edge("e2", 0.3, 0.9, t0 + Duration::seconds(5));
        first.merge(&second);

        assert_eq!(first.weight, 0.8);
        assert_eq!(first.confidence, 0.9);
        assert_eq!(first.id, "e1");
        assert_eq!(first.created_at, t0);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[test]
    fn test_touches() {
        let e = edge("e1", 0.5, 0.5, Utc::now());
        assert!(e.touches("a"));
        assert!(e.touches("b"));
        assert!(!e.touches("c"));
    }
}
