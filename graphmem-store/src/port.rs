//! Recall access port
//!
//! The contract the recall pipeline consumes, independent of the backing
//! store. [`GraphStore`] is the embedded implementation; an external database
//! adapter implements the same trait. Callers bind a port through
//! [`BoundRecallPort::bind`], which checks the capability version once at
//! construction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::audit::{push_capped, AuditRow, RecallAuditRecord, AUDIT_LOG_CAPACITY};
use crate::config::RecallCapabilities;
use crate::edge::Edge;
use crate::error::{Result, StoreError};
use crate::node::{EmbeddingStatus, NodeKey};
use crate::recall::{Candidate, NodeRow, Stage1Request, Stage2EdgeRequest, Stage2NodeRequest};
use crate::rule::RuleDefinition;
use crate::store::GraphStore;

/// Capability contract version implemented by this crate
pub const RECALL_CAPABILITY_VERSION: u32 = 1;

/// Raw embedding returned to privileged debug callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEmbedding {
    pub id: String,
    pub model: Option<String>,
    pub status: EmbeddingStatus,
    pub embedding: Option<Vec<f32>>,
}

/// Storage operations the recall pipeline depends on
#[async_trait]
pub trait RecallAccessPort: Send + Sync {
    fn capability_version(&self) -> u32;

    fn capabilities(&self) -> RecallCapabilities;

    async fn stage1_candidates_ann(&self, request: &Stage1Request) -> Result<Vec<Candidate>>;

    async fn stage1_candidates_exact_fallback(&self, request: &Stage1Request) -> Result<Vec<Candidate>>;

    async fn stage2_edges(&self, request: &Stage2EdgeRequest) -> Result<Vec<Edge>>;

    async fn stage2_nodes(&self, request: &Stage2NodeRequest) -> Result<Vec<NodeRow>>;

    async fn rule_defs(&self, scope: &str, ids: &[String]) -> Result<Vec<RuleDefinition>>;

    /// Fails with `CapabilityUnsupported` unless `debug_embeddings` is enabled
    async fn debug_embeddings(&self, scope: &str, ids: &[String]) -> Result<Vec<DebugEmbedding>>;

    /// Fails with `CapabilityUnsupported` unless `audit_insert` is enabled
    async fn insert_recall_audit(&self, record: RecallAuditRecord) -> Result<()>;
}

impl GraphStore {
    fn search(&self, request: &Stage1Request) -> Vec<Candidate> {
        self.stage1_candidates(
            &request.query_embedding,
            &request.scope,
            request.oversample,
            request.limit,
            &request.consumer,
        )
    }
}

#[async_trait]
impl RecallAccessPort for GraphStore {
    fn capability_version(&self) -> u32 {
        RECALL_CAPABILITY_VERSION
    }

    fn capabilities(&self) -> RecallCapabilities {
        self.config().capabilities
    }

    async fn stage1_candidates_ann(&self, request: &Stage1Request) -> Result<Vec<Candidate>> {
        Ok(self.search(request))
    }

    // No separate index here, so the fallback is the same exact scan
    async fn stage1_candidates_exact_fallback(&self, request: &Stage1Request) -> Result<Vec<Candidate>> {
        Ok(self.search(request))
    }

    async fn stage2_edges(&self, request: &Stage2EdgeRequest) -> Result<Vec<Edge>> {
        Ok(GraphStore::stage2_edges(self, &request.seed_ids, &request.scope, &request.params))
    }

    async fn stage2_nodes(&self, request: &Stage2NodeRequest) -> Result<Vec<NodeRow>> {
        Ok(GraphStore::stage2_nodes(
            self,
            &request.scope,
            &request.ids,
            &request.consumer,
            request.include_slots,
        ))
    }

    async fn rule_defs(&self, scope: &str, ids: &[String]) -> Result<Vec<RuleDefinition>> {
        Ok(GraphStore::rule_defs(self, scope, ids))
    }

    async fn debug_embeddings(&self, scope: &str, ids: &[String]) -> Result<Vec<DebugEmbedding>> {
        if !self.config().capabilities.debug_embeddings {
            return Err(StoreError::capability("debug_embeddings"));
        }
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.nodes.get(&NodeKey::new(scope, id.as_str())))
            .map(|node| DebugEmbedding {
                id: node.id.clone(),
                model: node.embedding_model.clone(),
                status: node.embedding_status,
                embedding: node.embedding.clone(),
            })
            .collect())
    }

    async fn insert_recall_audit(&self, record: RecallAuditRecord) -> Result<()> {
        if !self.config().capabilities.audit_insert {
            return Err(StoreError::capability("insert_recall_audit"));
        }
        let row = AuditRow::from_record(record, Utc::now());
        push_capped(&mut self.state.write().audit, row, AUDIT_LOG_CAPACITY);
        Ok(())
    }
}

/// A port whose capability version has been checked
#[derive(Clone)]
pub struct BoundRecallPort {
    port: Arc<dyn RecallAccessPort>,
}

impl std::fmt::Debug for BoundRecallPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundRecallPort")
            .field("capability_version", &self.port.capability_version())
            .field("capabilities", &self.port.capabilities())
            .finish()
    }
}

impl BoundRecallPort {
    /// Bind `port`, requiring its capability version to equal `expected`
    pub fn bind(port: Arc<dyn RecallAccessPort>, expected: u32) -> Result<Self> {
        let actual = port.capability_version();
        if actual != expected {
            return Err(StoreError::CapabilityVersionMismatch { expected, actual });
        }
        Ok(Self { port })
    }

    pub fn port(&self) -> &dyn RecallAccessPort {
        self.port.as_ref()
    }

    pub fn capabilities(&self) -> RecallCapabilities {
        self.port.capabilities()
    }

    /// Log a recall invocation. Audit loss is tolerated: failures are logged
    /// and reported as `false`.
    pub async fn record_audit(&self, record: RecallAuditRecord) -> bool {
        match self.port.insert_recall_audit(record).await {
            Ok(()) => true,
            Err(err) if err.is_capability_unsupported() => {
                log::warn!("Recall audit skipped: {}", err);
                false
            }
            Err(err) => {
                log::warn!("Recall audit failed: {}", err);
                false
            }
        }
    }

    /// Raw embeddings for debugging. Any failure, including a disabled
    /// capability, rejects the request.
    pub async fn debug_embeddings(&self, scope: &str, ids: &[String]) -> Result<Vec<DebugEmbedding>> {
        self.port.debug_embeddings(scope, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecallEndpoint;
    use crate::config::StoreConfig;
    use crate::node::{ConsumerIdentity, NodeType};
    use crate::recall::ExpansionParams;
    use crate::write::{CommitRef, EdgeWrite, NodeWrite, PreparedBatch};

    /// Stand-in for an external database adapter on a newer contract
    struct ExternalPort;

    #[async_trait]
    impl RecallAccessPort for ExternalPort {
        fn capability_version(&self) -> u32 {
            2
        }

        fn capabilities(&self) -> RecallCapabilities {
            RecallCapabilities::default()
        }

        async fn stage1_candidates_ann(&self, _request: &Stage1Request) -> Result<Vec<Candidate>> {
            Ok(vec![])
        }

        async fn stage1_candidates_exact_fallback(&self, _request: &Stage1Request) -> Result<Vec<Candidate>> {
            Ok(vec![])
        }

        async fn stage2_edges(&self, _request: &Stage2EdgeRequest) -> Result<Vec<Edge>> {
            Ok(vec![])
        }

        async fn stage2_nodes(&self, _request: &Stage2NodeRequest) -> Result<Vec<NodeRow>> {
            Ok(vec![])
        }

        async fn rule_defs(&self, _scope: &str, _ids: &[String]) -> Result<Vec<RuleDefinition>> {
            Ok(vec![])
        }

        async fn debug_embeddings(&self, _scope: &str, _ids: &[String]) -> Result<Vec<DebugEmbedding>> {
            Err(StoreError::capability("debug_embeddings"))
        }

        async fn insert_recall_audit(&self, _record: RecallAuditRecord) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "connection reset").into())
        }
    }

    fn audit_record() -> RecallAuditRecord {
        RecallAuditRecord {
            scope: "s".into(),
            endpoint: RecallEndpoint::Recall,
            consumer: ConsumerIdentity::agent("a1").label(),
            query_text: "what broke the build".into(),
            seed_count: 2,
            node_count: 5,
            edge_count: 3,
        }
    }

    fn store_with(capabilities: RecallCapabilities) -> Arc<GraphStore> {
        let config = StoreConfig::in_memory().with_capabilities(capabilities);
        Arc::new(GraphStore::new(config).unwrap())
    }

    #[test]
    fn test_bind_checks_version_equality() {
        let store = store_with(RecallCapabilities::default());
        assert!(BoundRecallPort::bind(store.clone(), RECALL_CAPABILITY_VERSION).is_ok());

        let err = BoundRecallPort::bind(store, RECALL_CAPABILITY_VERSION + 1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapabilityVersionMismatch { expected: 2, actual: 1 }
        ));

        let err = BoundRecallPort::bind(Arc::new(ExternalPort), RECALL_CAPABILITY_VERSION).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapabilityVersionMismatch { expected: 1, actual: 2 }
        ));
    }

    #[test]
    fn test_audit_insert_appends_row() {
        let store = store_with(RecallCapabilities::default());
        let bound = BoundRecallPort::bind(store.clone(), RECALL_CAPABILITY_VERSION).unwrap();

        assert!(tokio_test::block_on(bound.record_audit(audit_record())));
        let counts = store.counts();
        assert_eq!(counts.audit_rows, 1);
        // Audit rows are not graph mutations
        assert_eq!(store.seq(), 0);

        let state = store.state.read();
        let row = state.audit.back().unwrap();
        assert_eq!(row.consumer, "agent:a1");
        assert_eq!(row.query_hash, crate::audit::query_hash("what broke the build"));
        assert_eq!(row.node_count, 5);
    }

    #[tokio::test]
    async fn test_audit_disabled_soft_degrades() {
        let store = store_with(RecallCapabilities {
            debug_embeddings: false,
            audit_insert: false,
        });

        let err = store.insert_recall_audit(audit_record()).await.unwrap_err();
        assert!(err.is_capability_unsupported());

        let bound = BoundRecallPort::bind(store.clone(), RECALL_CAPABILITY_VERSION).unwrap();
        assert!(!bound.record_audit(audit_record()).await);
        assert_eq!(store.counts().audit_rows, 0);
    }

    #[tokio::test]
    async fn test_audit_backend_failure_soft_degrades() {
        let port: Arc<dyn RecallAccessPort> = Arc::new(ExternalPort);
        let bound = BoundRecallPort::bind(port, 2).unwrap();
        assert!(!bound.record_audit(audit_record()).await);
    }

    #[tokio::test]
    async fn test_debug_embeddings_gated() {
        let store = store_with(RecallCapabilities::default());
        store
            .apply_write(
                PreparedBatch::new().node(
                    NodeWrite::new("s", "n1", NodeType::Event).embedding(vec![0.25, 0.5], "mini-lm"),
                ),
                &CommitRef::new("c1", "h1"),
            )
            .await
            .unwrap();

        let bound = BoundRecallPort::bind(store.clone(), RECALL_CAPABILITY_VERSION).unwrap();
        let err = bound
            .debug_embeddings("s", &["n1".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_capability_unsupported());
    }

    #[tokio::test]
    async fn test_debug_embeddings_enabled() {
        let store = store_with(RecallCapabilities {
            debug_embeddings: true,
            audit_insert: true,
        });
        store
            .apply_write(
                PreparedBatch::new()
                    .node(NodeWrite::new("s", "n1", NodeType::Event).embedding(vec![0.25, 0.5], "mini-lm"))
                    .node(NodeWrite::new("s", "n2", NodeType::Event).auto_embed()),
                &CommitRef::new("c1", "h1"),
            )
            .await
            .unwrap();

        let bound = BoundRecallPort::bind(store, RECALL_CAPABILITY_VERSION).unwrap();
        let ids = vec!["n1".to_string(), "n2".to_string(), "missing".to_string()];
        let rows = bound.debug_embeddings("s", &ids).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].embedding.as_deref(), Some(&[0.25, 0.5][..]));
        assert_eq!(rows[0].model.as_deref(), Some("mini-lm"));
        assert_eq!(rows[1].status, EmbeddingStatus::Pending);
        assert!(rows[1].embedding.is_none());
    }

    #[tokio::test]
    async fn test_pipeline_through_dyn_port() {
        let store = store_with(RecallCapabilities::default());
        store
            .apply_write(
                PreparedBatch::new()
                    .node(NodeWrite::new("s", "a", NodeType::Concept).shared().embedding(vec![1.0, 0.0], "m"))
                    .node(NodeWrite::new("s", "b", NodeType::Entity).shared())
                    .edge(EdgeWrite::new("s", "mentions", "a", "b").id("ab").weight(0.8)),
                &CommitRef::new("c1", "h1"),
            )
            .await
            .unwrap();

        let bound = BoundRecallPort::bind(store, RECALL_CAPABILITY_VERSION).unwrap();
        let port = bound.port();

        let request = Stage1Request {
            query_embedding: vec![1.0, 0.0],
            scope: "s".into(),
            oversample: 10,
            limit: 5,
            consumer: ConsumerIdentity::anonymous(),
        };
        let ann = port.stage1_candidates_ann(&request).await.unwrap();
        let exact = port.stage1_candidates_exact_fallback(&request).await.unwrap();
        assert_eq!(ann, exact);
        assert_eq!(ann.len(), 1);

        let edges = port
            .stage2_edges(&Stage2EdgeRequest {
                seed_ids: vec![ann[0].id.clone()],
                scope: "s".into(),
                params: ExpansionParams::default(),
            })
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);

        let nodes = port
            .stage2_nodes(&Stage2NodeRequest {
                scope: "s".into(),
                ids: vec![edges[0].src_id.clone(), edges[0].dst_id.clone()],
                consumer: ConsumerIdentity::anonymous(),
                include_slots: false,
            })
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);

        assert!(port.rule_defs("s", &["a".to_string()]).await.unwrap().is_empty());
    }
}
