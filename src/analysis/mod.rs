//! Analysis modules.
//!
//! The stateless aggregator that every dashboard panel is built from, and
//! the drill-down navigator layered on top of it.

pub mod aggregator;
pub mod drilldown;

pub use aggregator::*;
pub use drilldown::{DrillDown, DrillError, DrillNode, DrillPath, DrillView};
