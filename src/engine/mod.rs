// Search aggregation and the delivery pipeline behind it.

pub mod antiblock;
pub mod cache;
pub mod inflight;
pub mod orchestrator;
pub mod search;
pub mod stats;
