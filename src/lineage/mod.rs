pub mod analyzer;
pub mod graph;
pub mod traversal;

pub use analyzer::LineageAnalyzer;
pub use graph::{EdgeKind, GraphStatistics, LineageGraph, NodeKey, NodeKind};
pub use traversal::{CyclePolicy, GraphTraversal};
