//! Connection topology of the audio graph and its bookkeeping
//!
//! The topology (which output feeds which input or param, output channel counts, dormant
//! subgraphs) lives in a [`GraphState`] behind the graph lock of the [`DeferredTaskHandler`].
//! Control thread calls mutate it under that lock, the render thread only picks up the changes
//! in its pre and post render phases, when it manages to take the lock without blocking.

mod deferred;
pub(crate) use deferred::DeferredTaskHandler;

mod handler;
pub use handler::{AudioHandler, NodeType};
pub(crate) use handler::AudioHandlerOptions;

mod state;
pub(crate) use state::*;
