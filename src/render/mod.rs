//! Primitives related to audio graph rendering

// private mods
pub(crate) mod graph;
pub(crate) use graph::RenderGraph;

// pub(crate) mods
mod thread;
pub(crate) use thread::*;

mod node_collection;
pub(crate) use node_collection::NodeCollection;

// public mods
mod processor;
pub use processor::*;

mod quantum;
pub use quantum::*;
