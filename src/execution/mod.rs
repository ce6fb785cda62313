pub mod engine;
pub mod optimizer;

pub use engine::{ExecutionEngine, OrderVenue, SimulatedOrderVenue};
pub use optimizer::OrderOptimizer;
