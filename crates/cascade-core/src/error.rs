//! Workflow definition validation errors

/// A structural problem with a workflow definition.
///
/// Validation runs before an execution starts; a definition that fails here
/// is rejected at the API boundary and never reaches the executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A node id appears more than once in the definition
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// A node id is the empty string
    #[error("node id must not be empty")]
    EmptyNodeId,

    /// An edge's source does not name a node in the definition
    #[error("edge references unknown source node: {0}")]
    UnknownSource(String),

    /// An edge's target does not name a node in the definition
    #[error("edge references unknown target node: {0}")]
    UnknownTarget(String),
}
