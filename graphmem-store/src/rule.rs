//! Rule definitions tied to rule-typed nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{Node, NodeKey};

/// Lifecycle state, advanced outside the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    #[default]
    Draft,
    Shadow,
    Active,
}

impl RuleState {
    /// Draft rules never surface in recall
    pub fn is_recallable(&self) -> bool {
        matches!(self, Self::Shadow | Self::Active)
    }
}

/// Who a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    #[default]
    Global,
    Agent,
    Team,
}

/// Policy definition synthesized from a rule node's slots at creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Id of the owning rule node
    pub node_id: String,
    pub scope: String,
    pub state: RuleState,
    pub rule_scope: RuleScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<String>,
    #[serde(default, rename = "if")]
    pub if_clause: Value,
    #[serde(default, rename = "then")]
    pub then_clause: Value,
    #[serde(default)]
    pub exceptions: Value,
    #[serde(default)]
    pub positive_feedback: u64,
    #[serde(default)]
    pub negative_feedback: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuleDefinition {
    /// Build a draft definition from a rule node.
    ///
    /// Targeting is taken from the node's `rule_scope`/`target_ids` slots when
    /// present, otherwise from its owner identifiers.
    pub fn from_node(node: &Node) -> Self {
        let slot = |name: &str| node.slots.get(name).cloned().unwrap_or(Value::Null);

        let declared_scope = node
            .slots
            .get("rule_scope")
            .and_then(|v| serde_json::from_value::<RuleScope>(v.clone()).ok());
        let rule_scope = declared_scope.unwrap_or(match (&node.agent_id, &node.team_id) {
            (Some(_), _) => RuleScope::Agent,
            (None, Some(_)) => RuleScope::Team,
            (None, None) => RuleScope::Global,
        });

        let declared_targets: Vec<String> = node
            .slots
            .get("target_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let target_ids = if !declared_targets.is_empty() {
            declared_targets
        } else {
            match rule_scope {
                RuleScope::Agent => node.agent_id.iter().cloned().collect(),
                RuleScope::Team => node.team_id.iter().cloned().collect(),
                RuleScope::Global => Vec::new(),
            }
        };

        Self {
            node_id: node.id.clone(),
            scope: node.scope.clone(),
            state: RuleState::Draft,
            rule_scope,
            target_ids,
            if_clause: slot("if"),
            then_clause: slot("then"),
            exceptions: slot("exceptions"),
            positive_feedback: 0,
            negative_feedback: 0,
            created_at: node.created_at,
            updated_at: node.created_at,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.scope.clone(), self.node_id.clone())
    }
}
