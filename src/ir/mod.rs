// Method-level scheduling: the call graph orders IR passes bottom-up.

pub mod call_graph;

pub use call_graph::CallGraph;
