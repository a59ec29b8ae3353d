//! Bundle and engine aware production scheduler.
//!
//! One frontier per bundle plus a default frontier for unbundled nodes. A
//! bundle whose external blockers are all scheduled is drained to
//! exhaustion before anything else starts. Scalar-pipe bundles only run
//! when no unbundled work is free.

pub mod order;
pub mod post;
mod runner;
pub mod secondary;

pub use order::{GaudiKey, GaudiOrder, Rank};
pub use post::{optimize_memsets_location, reorder_nan_inf_probes};
pub use runner::GaudiScheduler;
pub use secondary::{OffsetRole, SecondaryDependencies};
