pub mod blast_radius;
pub mod builder;
pub mod graph;

pub use blast_radius::{
    BlastRadiusAnalyzer, BlastRadiusNode, BlastRadiusResult, CriticalPath, ImpactSummary,
    SeverityBuckets,
};
pub use builder::DependencyGraphBuilder;
pub use graph::{
    DependencyGraph, EdgeKind, GraphEdge, GraphExport, GraphNode, GraphStats, NodeId, NodeKind,
};
