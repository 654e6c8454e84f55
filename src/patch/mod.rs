//! Patch data model: blocks, ports, edges.

pub mod block;
pub mod edge;
pub mod graph;

pub use block::{Block, InputPort, LensChain, OutputPort, ParamValue};
pub use edge::Edge;
pub use graph::{Patch, PatchInvariantError};
