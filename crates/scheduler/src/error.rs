use graphsched_core::{GraphError, NodeId};

/// Internal-consistency failures of a scheduling run. None of these are
/// recoverable: the caller must abort instead of using a partial order.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Not all nodes were scheduled: {scheduled} of {total}")]
    NotAllScheduled { scheduled: usize, total: usize },

    #[error("Negative in-degree for node {0}")]
    NegativeInDegree(NodeId),

    #[error("Node {0} was never visited")]
    NotVisited(NodeId),

    #[error("Node {0} appears more than once in the schedule")]
    DuplicateNode(NodeId),

    #[error("Node {blocked} is scheduled before its blocker {blocking}")]
    OrderViolation { blocking: NodeId, blocked: NodeId },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
