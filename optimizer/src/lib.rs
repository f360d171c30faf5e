// streamfuse — stream fusion optimizer
//
// Library root. Models first (multiplicity, effect, stream, catalog, graph),
// then the analyses (safety, analyze, edges) and the optimizer passes.

pub mod analyze;
pub mod catalog;
pub mod config;
pub mod dot;
pub mod edges;
pub mod effect;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod multiplicity;
pub mod optimize;
pub mod report;
pub mod safety;
pub mod stream;
