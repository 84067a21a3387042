//! The AudioNode interface and concrete types
//!
//! Every node is a thin control-thread wrapper around a registration with its context. The
//! processing state lives in an [`AudioHandler`](crate::graph::AudioHandler) shared with the
//! graph, and in an [`AudioProcessor`](crate::render::AudioProcessor) owned by the render
//! thread.

// traits
mod audio_node;
pub use audio_node::*;
mod scheduled_source;
pub use scheduled_source::*;
pub(crate) use scheduled_source::Scheduler;

// nodes
mod analyser;
pub use analyser::*;
mod audio_buffer_source;
pub use audio_buffer_source::*;
mod constant_source;
pub use constant_source::*;
mod convolver;
pub use convolver::*;
mod delay;
pub use delay::*;
mod destination;
pub use destination::*;
pub(crate) use destination::DestinationRenderer;
mod dynamics_compressor;
pub use dynamics_compressor::*;
mod gain;
pub use gain::*;
mod stereo_panner;
pub use stereo_panner::*;
