//! Concrete adapters for the outbound ports this crate ships itself.

mod htl;
mod registry;
mod stats;

pub use htl::ProbabilisticHtlPolicy;
pub use registry::InFlightInserts;
pub use stats::NodeStatsRecorder;
