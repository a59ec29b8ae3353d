use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TensorId};

/// Which ordering pass a control edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEdgeType {
    Schedule,
    Sync,
    Memory,
}

impl std::fmt::Display for ControlEdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlEdgeType::Schedule => write!(f, "Schedule"),
            ControlEdgeType::Sync => write!(f, "Sync"),
            ControlEdgeType::Memory => write!(f, "Memory"),
        }
    }
}

/// A tensor that is a view into another tensor's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorAlias {
    pub real: TensorId,
    /// Byte offset inside `real`.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tensor {
    pub id: TensorId,
    pub name: String,
    pub size_bytes: u64,
    pub producer: Option<NodeId>,
    pub consumers: Vec<NodeId>,
    /// Set for payload-free ordering tokens.
    pub control: Option<ControlEdgeType>,
    pub alias: Option<TensorAlias>,
}

impl Tensor {
    pub fn new(id: TensorId, name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id,
            name: name.into(),
            size_bytes,
            producer: None,
            consumers: Vec::new(),
            control: None,
            alias: None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.control.is_some()
    }
}
