//! Knowledge-graph snapshots, structural metrics and the graph view.

mod metrics;
mod types;
mod view;

pub use metrics::*;
pub use types::*;
pub use view::*;
