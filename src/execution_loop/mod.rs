pub mod planner;
pub mod refinement;

pub use planner::*;
pub use refinement::*;
