//! The `BaseAudioContext` interface and the `OfflineAudioContext` type

use std::sync::Arc;

mod base;
pub use base::*;

mod concrete_base;
pub use concrete_base::*;

mod offline;
pub use offline::*;

use crate::graph::AudioHandler;

/// Destination node id is always at index 0
pub(crate) const DESTINATION_NODE_ID: AudioNodeId = AudioNodeId(0);

/// Unique identifier for audio nodes.
///
/// Used for internal bookkeeping. Ids are recycled once the render thread has released all state
/// of a disposed node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioNodeId(pub(crate) u64);

impl AudioNodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unique identifier for the audio params of a node, the position of the param in the node's
/// param list.
///
/// Store these in your `AudioProcessor` to get access to `AudioParam` values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AudioParamId(pub(crate) usize);

/// Describes the current state of the `BaseAudioContext`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AudioContextState {
    /// This context is currently suspended (context time is not proceeding)
    Suspended,
    /// Audio is being processed.
    Running,
    /// This context has been released, and can no longer be used to process audio.
    Closed,
}

impl From<u8> for AudioContextState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Suspended,
            1 => Self::Running,
            2 => Self::Closed,
            _ => unreachable!(),
        }
    }
}

/// Handle of the [`AudioNode`](crate::node::AudioNode) to its associated [`BaseAudioContext`]
/// and to the [`AudioHandler`] doing the processing bookkeeping.
///
/// The registration is the owner-facing half of a node: dropping it tells the context the node
/// is no longer referenced, after which the handler lives on only while the graph needs it.
///
/// The only way to construct this object is by calling [`ConcreteBaseAudioContext::register`]
pub struct AudioContextRegistration {
    /// the audio context in which nodes and connections live
    context: ConcreteBaseAudioContext,
    /// the shared processing handle of this node
    handler: Arc<AudioHandler>,
}

impl std::fmt::Debug for AudioContextRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContextRegistration")
            .field("id", &self.id())
            .field("node_type", &self.handler.node_type())
            .finish_non_exhaustive()
    }
}

impl AudioContextRegistration {
    /// get the audio node id of the registration
    #[must_use]
    pub fn id(&self) -> AudioNodeId {
        self.handler.id()
    }

    /// get the context of the registration
    #[must_use]
    pub fn context(&self) -> &ConcreteBaseAudioContext {
        &self.context
    }

    /// get the processing handler of the registration
    #[must_use]
    pub fn handler(&self) -> &AudioHandler {
        &self.handler
    }
}

impl Drop for AudioContextRegistration {
    fn drop(&mut self) {
        self.context.mark_node_dropped(self.id());
    }
}
