//! Recall audit rows
//!
//! Append-only, capped record of recall invocations. Observability only: recall
//! logic never reads these back.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of most-recent rows the live log keeps
pub const AUDIT_LOG_CAPACITY: usize = 5000;

/// Which recall surface produced the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallEndpoint {
    Recall,
    RecallDebug,
    RuleLookup,
}

/// Input to `insert_recall_audit`
#[derive(Debug, Clone)]
pub struct RecallAuditRecord {
    pub scope: String,
    pub endpoint: RecallEndpoint,
    pub consumer: String,
    /// Raw query text; only its hash is stored
    pub query_text: String,
    pub seed_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
}

/// A stored audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    pub scope: String,
    pub endpoint: RecallEndpoint,
    pub consumer: String,
    pub query_hash: String,
    pub seed_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at: DateTime<Utc>,
}

impl AuditRow {
    pub fn from_record(record: RecallAuditRecord, at: DateTime<Utc>) -> Self {
        Self {
            query_hash: query_hash(&record.query_text),
            scope: record.scope,
            endpoint: record.endpoint,
            consumer: record.consumer,
            seed_count: record.seed_count,
            node_count: record.node_count,
            edge_count: record.edge_count,
            created_at: at,
        }
    }
}

/// Hex SHA-256 of the query text
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Push a row, evicting the oldest beyond `capacity`
pub(crate) fn push_capped(log: &mut VecDeque<AuditRow>, row: AuditRow, capacity: usize) {
    log.push_back(row);
    while log.len() > capacity {
        log.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str) -> RecallAuditRecord {
        RecallAuditRecord {
            scope: "s".into(),
            endpoint: RecallEndpoint::Recall,
            consumer: "agent:a1".into(),
            query_text: query.into(),
            seed_count: 3,
            node_count: 5,
            edge_count: 4,
        }
    }

    #[test]
    fn test_query_hash_is_stable_hex() {
        let h = query_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, query_hash("hello"));
        assert_ne!(h, query_hash("hello!"));
    }

    #[test]
    fn test_row_does_not_keep_query_text() {
        let row = AuditRow::from_record(record("secret question"), Utc::now());
        let json = serde_json::to_string(&row).unwrap();
        assert!(!json.contains("secret question"));
        assert_eq!(row.query_hash, query_hash("secret question"));
    }

    #[test]
    fn test_push_capped_keeps_most_recent() {
        let mut log = VecDeque::new();
        for i in 0..5 {
            push_capped(&mut log, AuditRow::from_record(record(&i.to_string()), Utc::now()), 3);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.front().unwrap().query_hash, query_hash("2"));
        assert_eq!(log.back().unwrap().query_hash, query_hash("4"));
    }
}
