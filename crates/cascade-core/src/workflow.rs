//! Workflow definition: nodes, edges, and triggers
//!
//! A definition is immutable during a run. Edges are directed and may carry
//! a condition; traversal follows every satisfied edge. Cycles are illegal
//! and detected at execution time by the visit set.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::condition::evaluate;
use crate::error::ValidationError;

/// Canvas coordinates, opaque to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Node kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    #[default]
    Action,
}

/// A single action node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(rename = "type", default)]
    pub node_type: NodeType,

    /// Action registry key
    #[serde(default = "default_action")]
    pub action: String,

    #[serde(default)]
    pub params: Map<String, Value>,

    /// Extra attempts after the first failure
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub position: Position,
}

fn default_action() -> String {
    "notify".to_string()
}

/// Directed connector between two nodes, optionally gated by a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

/// External event hook. The engine itself is trigger-agnostic; callers
/// match triggers before starting an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Trigger {
    /// A trigger matches when its condition evaluates true against the
    /// payload. A trigger without a condition never matches (an empty
    /// condition object is falsy).
    pub fn matches(&self, payload: &Value) -> bool {
        self.condition
            .as_ref()
            .map(|cond| evaluate(cond, payload))
            .unwrap_or(false)
    }
}

/// A complete workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub triggers: Vec<Trigger>,

    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    /// Check structural integrity: node ids are non-empty and unique, and
    /// every edge endpoint names a node.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(ValidationError::EmptyNodeId);
            }
            if !seen.insert(node.id.as_str()) {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }
        for edge in &self.edges {
            if !seen.contains(edge.source.as_str()) {
                return Err(ValidationError::UnknownSource(edge.source.clone()));
            }
            if !seen.contains(edge.target.as_str()) {
                return Err(ValidationError::UnknownTarget(edge.target.clone()));
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Entry points for traversal: every `start` node, or the
    /// lexicographically first node when the definition has none.
    pub fn entry_nodes(&self) -> Vec<&Node> {
        let starts: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .collect();
        if !starts.is_empty() {
            return starts;
        }
        self.nodes
            .iter()
            .min_by(|a, b| a.id.cmp(&b.id))
            .into_iter()
            .collect()
    }

    /// Outgoing edges of a node, in definition order.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// First trigger whose condition matches the payload.
    pub fn matching_trigger(&self, payload: &Value) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.matches(payload))
    }
}

/// The support-ticket auto-responder: acknowledge, wait two hours, check
/// assignment, escalate if still unassigned. Exercises every built-in
/// action; used by the test suites.
pub fn sample_support_ticket() -> WorkflowDefinition {
    serde_json::from_value(json!({
        "triggers": [
            {
                "event": "ticket.created",
                "condition": {"op": "eq", "path": "ticket_assigned", "value": false}
            }
        ],
        "nodes": [
            {"id": "start", "type": "start", "action": "notify", "params": {}, "position": {"x": 100, "y": 100}},
            {"id": "ack_email", "type": "action", "action": "email", "params": {"to": "{{user_email}}", "template": "ack_ticket", "subject": "Ticket Received"}, "position": {"x": 350, "y": 100}},
            {"id": "wait", "type": "action", "action": "delay", "params": {"seconds": 7200}, "position": {"x": 650, "y": 100}},
            {"id": "check_assigned", "type": "action", "action": "check_ticket_assigned", "params": {}, "position": {"x": 650, "y": 300}},
            {"id": "escalate", "type": "action", "action": "email", "params": {"to": "support@company.com", "template": "escalate_ticket", "subject": "Ticket Escalation"}, "position": {"x": 300, "y": 350}}
        ],
        "edges": [
            {"source": "start", "target": "ack_email"},
            {"source": "ack_email", "target": "wait"},
            {"source": "wait", "target": "check_assigned"},
            {"source": "check_assigned", "target": "escalate", "condition": {"op": "eq", "path": "check_result", "value": false}}
        ]
    }))
    .expect("sample definition is valid")
}
