//! Node scheduling: turns a dependency graph into one total, legal
//! execution order.
//!
//! Every strategy builds on [`free_nodes::FreeNodes`] and is reached
//! through [`schedule`], which also checks the result with
//! [`validate::validate_schedule`] before handing it out.

pub mod bfs;
pub mod deps;
pub mod dfs;
pub mod error;
pub mod flash_attention;
pub mod free_nodes;
pub mod gaudi;
pub mod max_path;
pub mod memory_oriented;
pub mod order;
mod reorder;
pub mod validate;

use graphsched_core::{GraphError, NodeList, ScheduleConfig, Strategy};
use graphsched_graph::{BundlePlane, EdgeFilter, Graph, GraphEditor};
use tracing::{info, warn};

pub use bfs::BfsScheduler;
pub use deps::DependencyTable;
pub use dfs::DfsScheduler;
pub use error::{Result, ScheduleError};
pub use free_nodes::{AuxiliaryBlocking, FreeNodes, NoBlocking, NodeOrder};
pub use gaudi::GaudiScheduler;
pub use max_path::{MaxPathOrder, MaxPathScheduler, PathMetrics};
pub use memory_oriented::MemoryOrientedScheduler;
pub use order::DefaultOrder;
pub use validate::validate_schedule;

/// A scheduling strategy.
pub trait NodeScheduler {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Produce a total order of every node in `graph`.
    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList>;
}

pub fn scheduler_for(strategy: Strategy, config: &ScheduleConfig) -> Box<dyn NodeScheduler> {
    let tie_break = DefaultOrder::from_config(config);
    match strategy {
        Strategy::Bfs => Box::new(BfsScheduler::new(tie_break, EdgeFilter::Both)),
        Strategy::Dfs => Box::new(DfsScheduler::new(tie_break, EdgeFilter::Both)),
        Strategy::MaxPath => Box::new(MaxPathScheduler::from_config(config)),
        Strategy::Gaudi => Box::new(GaudiScheduler::from_config(config)),
        Strategy::MemoryOriented => Box::new(MemoryOrientedScheduler::from_config(config)),
    }
}

/// Schedule every node of `graph` with `strategy`.
///
/// With flash-attention ordering enabled, the Gaudi strategy first adds
/// `Schedule` control edges between flash-attention chains; those edges
/// stay in the graph. When the bundle annotations do not form a valid
/// bundle plane, the chains are ordered against the graph alone.
pub fn schedule(graph: &mut Graph, strategy: Strategy, config: &ScheduleConfig) -> Result<NodeList> {
    if strategy == Strategy::Gaudi && config.enable_flash_attention_ordering {
        match BundlePlane::from_annotations(graph) {
            Ok(mut bundle_plane) => {
                {
                    let mut editor = GraphEditor::with_bundle_plane(graph, &mut bundle_plane);
                    flash_attention::order_flash_attention_chains(&mut editor)?;
                }
                bundle_plane.discard();
            }
            // a bundle that is not convex collapses into a cycle
            Err(GraphError::InvalidBundlePlane(reason)) => {
                warn!("No bundle plane for flash attention ordering ({}), using the graph", reason);
                let mut editor = GraphEditor::new(graph);
                flash_attention::order_flash_attention_chains(&mut editor)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let scheduler = scheduler_for(strategy, config);
    let order = scheduler.schedule_nodes(graph)?;
    validate_schedule(graph, &order)?;
    info!("Scheduled {} nodes with the {} scheduler", order.len(), scheduler.name());
    Ok(order)
}
