//! Store configuration
//!
//! Everything is supplied at construction and never re-read. Configs can be
//! built in code with the `with_*` setters or parsed from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::node::Tier;

/// Optional recall operations a backend allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallCapabilities {
    /// Raw embedding vectors may be returned to privileged debug callers
    #[serde(default)]
    pub debug_embeddings: bool,
    /// Recall invocations may be durably logged
    #[serde(default = "default_true")]
    pub audit_insert: bool,
}

impl Default for RecallCapabilities {
    fn default() -> Self {
        Self {
            debug_embeddings: false,
            audit_insert: true,
        }
    }
}

/// Tunable constants of the compaction algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionPolicy {
    /// Audit rows kept by the first phase
    #[serde(default = "default_audit_keep_rows")]
    pub audit_keep_rows: usize,
    /// Summary length (in chars) after payload trimming
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// Fraction of remaining edges dropped per round
    #[serde(default = "default_edge_drop_ratio")]
    pub edge_drop_ratio: f64,
    /// Fraction of remaining nodes dropped per round
    #[serde(default = "default_node_drop_ratio")]
    pub node_drop_ratio: f64,
    #[serde(default)]
    pub tier_weights: TierWeights,
    #[serde(default = "default_tier_multiplier")]
    pub tier_multiplier: f64,
    /// Score bonus that keeps rule nodes alive longer
    #[serde(default = "default_rule_bonus")]
    pub rule_bonus: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            audit_keep_rows: default_audit_keep_rows(),
            summary_max_chars: default_summary_max_chars(),
            edge_drop_ratio: default_edge_drop_ratio(),
            node_drop_ratio: default_node_drop_ratio(),
            tier_weights: TierWeights::default(),
            tier_multiplier: default_tier_multiplier(),
            rule_bonus: default_rule_bonus(),
        }
    }
}

/// Per-tier weight used in node pruning scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    pub archive: f64,
    pub cold: f64,
    pub warm: f64,
    pub hot: f64,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            archive: 0.0,
            cold: 1.0,
            warm: 2.0,
            hot: 3.0,
        }
    }
}

impl TierWeights {
    pub fn weight(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Archive => self.archive,
            Tier::Cold => self.cold,
            Tier::Warm => self.warm,
            Tier::Hot => self.hot,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_audit_keep_rows() -> usize {
    200
}

fn default_summary_max_chars() -> usize {
    384
}

fn default_edge_drop_ratio() -> f64 {
    0.20
}

fn default_node_drop_ratio() -> f64 {
    0.10
}

fn default_tier_multiplier() -> f64 {
    10.0
}

fn default_rule_bonus() -> f64 {
    8.0
}

fn default_max_snapshot_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_max_backups() -> usize {
    3
}

fn default_max_compaction_rounds() -> usize {
    8
}

/// Embedded store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file; `None` keeps the store memory-only
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Persist synchronously at the end of every write
    #[serde(default = "default_true")]
    pub auto_persist: bool,
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: u64,
    /// Numbered backups kept next to the snapshot
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Fail persist instead of writing an oversized snapshot
    #[serde(default)]
    pub strict_budget: bool,
    #[serde(default = "default_true")]
    pub compaction_enabled: bool,
    #[serde(default = "default_max_compaction_rounds")]
    pub max_compaction_rounds: usize,
    #[serde(default)]
    pub capabilities: RecallCapabilities,
    #[serde(default)]
    pub compaction: CompactionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            auto_persist: true,
            max_snapshot_bytes: default_max_snapshot_bytes(),
            max_backups: default_max_backups(),
            strict_budget: false,
            compaction_enabled: true,
            max_compaction_rounds: default_max_compaction_rounds(),
            capabilities: RecallCapabilities::default(),
            compaction: CompactionPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Memory-only configuration
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration persisting to `path`
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_auto_persist(mut self, enabled: bool) -> Self {
        self.auto_persist = enabled;
        self
    }

    pub fn with_max_snapshot_bytes(mut self, bytes: u64) -> Self {
        self.max_snapshot_bytes = bytes;
        self
    }

    pub fn with_max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    pub fn with_strict_budget(mut self, strict: bool) -> Self {
        self.strict_budget = strict;
        self
    }

    pub fn with_compaction(mut self, enabled: bool) -> Self {
        self.compaction_enabled = enabled;
        self
    }

    pub fn with_capabilities(mut self, capabilities: RecallCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject settings the persistence path cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshot_bytes == 0 {
            return Err(StoreError::config("max_snapshot_bytes must be greater than zero"));
        }
        if self.max_compaction_rounds == 0 {
            return Err(StoreError::config("max_compaction_rounds must be at least 1"));
        }
        let policy = &self.compaction;
        for (name, ratio) in [
            ("edge_drop_ratio", policy.edge_drop_ratio),
            ("node_drop_ratio", policy.node_drop_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(StoreError::config(format!(
                    "compaction.{name} must be in (0, 1], got {ratio}"
                )));
            }
        }
        Ok(())
    }
}
