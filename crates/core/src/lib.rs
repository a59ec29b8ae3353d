pub mod config;
pub mod error;
pub mod ids;
pub mod node;
pub mod tensor;

pub use config::{Config, MaxPathWeight, ScheduleConfig, Strategy};
pub use error::*;
pub use ids::*;
pub use node::*;
pub use tensor::*;
