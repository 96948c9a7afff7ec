//! GraphMem Store
//!
//! Embedded, multi-tenant knowledge-graph memory store with two-stage recall
//! and size-bounded snapshot persistence.
//!
//! ## Features
//!
//! - **Scoped graph** - Typed nodes, weighted edges and rule definitions partitioned by scope
//! - **Idempotent writes** - First-writer-wins nodes, monotonic edge upserts
//! - **Two-stage recall** - Cosine candidates with policy filtering, then budgeted graph expansion
//! - **Capability port** - Versioned access trait shared with external database backends
//! - **Snapshots** - Atomic JSON snapshots with backup rotation, quarantine and compaction
//!
//! ## Example
//!
//! ```ignore
//! use graphmem_store::{CommitRef, ConsumerIdentity, GraphStore, NodeType, NodeWrite, PreparedBatch, StoreConfig};
//!
//! let store = GraphStore::open(StoreConfig::in_memory().with_snapshot_path(&path)).await?;
//!
//! let batch = PreparedBatch::new().node(
//!     NodeWrite::new("acme/default", "evt-1", NodeType::Event)
//!         .shared()
//!         .title("Deploy rolled back")
//!         .embedding(vector, "mini-lm"),
//! );
//! store.apply_write(batch, &CommitRef::new("c-1", "9f2c")).await?;
//!
//! let hits = store.stage1_candidates(&query, "acme/default", 32, 8, &ConsumerIdentity::anonymous());
//! ```

pub mod audit;
pub mod compaction;
pub mod config;
pub mod edge;
pub mod error;
pub mod health;
pub mod node;
pub mod port;
pub mod recall;
pub mod rule;
pub mod snapshot;
pub mod store;
pub mod write;

// Re-exports for convenience
pub use audit::{AuditRow, RecallAuditRecord, RecallEndpoint, AUDIT_LOG_CAPACITY};
pub use compaction::{CompactionReport, Compactor};
pub use config::{CompactionPolicy, RecallCapabilities, StoreConfig, TierWeights};
pub use edge::{Edge, EdgeKey};
pub use error::{Result, StoreError};
pub use health::{HealthStatus, StoreCounts, StoreHealth};
pub use node::{ConsumerIdentity, EmbeddingStatus, MemoryLane, Node, NodeKey, NodeType, Tier};
pub use port::{BoundRecallPort, DebugEmbedding, RecallAccessPort, RECALL_CAPABILITY_VERSION};
pub use recall::{
    cosine_distance, Candidate, ExpansionParams, Hops, NodeRow, Stage1Request, Stage2EdgeRequest,
    Stage2NodeRequest,
};
pub use rule::{RuleDefinition, RuleScope, RuleState};
pub use snapshot::{LoadOutcome, Snapshot, SnapshotMetrics, SNAPSHOT_VERSION};
pub use store::GraphStore;
pub use write::{CommitRef, EdgeWrite, NodeWrite, PreparedBatch, WriteOutcome};
