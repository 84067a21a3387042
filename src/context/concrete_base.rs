//! The `ConcreteBaseAudioContext` type

use crate::context::{
    AudioContextRegistration, AudioContextState, AudioNodeId, BaseAudioContext,
    DESTINATION_NODE_ID,
};
use crate::graph::{
    AudioHandler, AudioHandlerOptions, DeferredTaskHandler, GraphState, NodeType,
    PendingRenderNode,
};
use crate::node::{AudioDestinationNode, AudioNodeOptions, ChannelCountMode, ChannelInterpretation};
use crate::render::AudioProcessor;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// This struct assigns new [`AudioNodeId`]s for audio nodes
///
/// It reuses the ids of disposed nodes to prevent unbounded growth of the render graph node
/// list (which is stored in a Vec indexed by the AudioNodeId). An id only becomes available
/// once the render thread has released all state of its node.
struct AudioNodeIdProvider {
    /// incrementing id
    id_inc: AtomicU64,
    /// decommissioned AudioNodeIds, which can be reused
    free: Mutex<Vec<AudioNodeId>>,
}

impl AudioNodeIdProvider {
    fn new() -> Self {
        Self {
            id_inc: AtomicU64::new(0),
            free: Mutex::new(Vec::new()),
        }
    }

    fn get(&self) -> AudioNodeId {
        if let Some(available_id) = self.free.lock().unwrap().pop() {
            available_id
        } else {
            AudioNodeId(self.id_inc.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn recycle(&self, id: AudioNodeId) {
        self.free.lock().unwrap().push(id);
    }
}

/// The struct that corresponds to the Javascript `BaseAudioContext` object.
///
/// This object is returned from the `base()` method on
/// [`OfflineAudioContext`](crate::context::OfflineAudioContext), and the `context()` method on
/// `AudioNode`s.
///
/// The `ConcreteBaseAudioContext` allows for shallow cloning (using an `Arc` internally).
#[allow(clippy::module_name_repetitions)]
#[derive(Clone)]
pub struct ConcreteBaseAudioContext {
    inner: Arc<ConcreteBaseAudioContextInner>,
}

impl PartialEq for ConcreteBaseAudioContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ConcreteBaseAudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAudioContext")
            .field("state", &self.state())
            .field("sample_rate", &self.sample_rate())
            .field("current_time", &self.current_time())
            .field("max_channel_count", &self.max_channel_count())
            .field("connection_count", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a [`ConcreteBaseAudioContext`]
///
/// Held by audio handlers, which may outlive the context.
#[derive(Clone, Default)]
pub(crate) struct WeakAudioContext(Weak<ConcreteBaseAudioContextInner>);

impl WeakAudioContext {
    pub fn upgrade(&self) -> Option<ConcreteBaseAudioContext> {
        self.0
            .upgrade()
            .map(|inner| ConcreteBaseAudioContext { inner })
    }
}

/// Inner representation of the `ConcreteBaseAudioContext`
///
/// These fields are wrapped inside an `Arc` in the actual `ConcreteBaseAudioContext`.
struct ConcreteBaseAudioContextInner {
    /// sample rate in Hertz
    sample_rate: f32,
    /// number of channels rendered at the destination
    max_channel_count: usize,
    /// provider for new AudioNodeIds
    audio_node_id_provider: AudioNodeIdProvider,
    /// the graph lock and the work deferred by the render thread
    deferred: Arc<DeferredTaskHandler>,
    /// handler of the destination node, which lives as long as the context
    destination: Arc<AudioHandler>,
    /// number of frames played
    frames_played: Arc<AtomicU64>,
    /// Current state of the `ConcreteBaseAudioContext`
    state: AtomicU8,
    /// number of connections made over the lifetime of the context
    connection_count: AtomicU32,
}

impl Drop for ConcreteBaseAudioContextInner {
    fn drop(&mut self) {
        log::debug!("audio context dropped");
        self.deferred.context_will_be_destroyed();
    }
}

impl BaseAudioContext for ConcreteBaseAudioContext {
    fn base(&self) -> &ConcreteBaseAudioContext {
        self
    }
}

impl ConcreteBaseAudioContext {
    /// Creates a `BaseAudioContext` instance, and registers its destination node
    pub(super) fn new(
        sample_rate: f32,
        number_of_channels: usize,
        frames_played: Arc<AtomicU64>,
        destination_processor: impl FnOnce(usize) -> Box<dyn AudioProcessor>,
    ) -> Self {
        let deferred = DeferredTaskHandler::new();
        let audio_node_id_provider = AudioNodeIdProvider::new();

        let options = AudioHandlerOptions {
            node_type: NodeType::Destination,
            number_of_inputs: 1,
            output_channels: vec![],
            audio_node_options: AudioNodeOptions {
                channel_count: number_of_channels,
                channel_count_mode: ChannelCountMode::Explicit,
                channel_interpretation: ChannelInterpretation::Speakers,
            },
        };

        let inner = Arc::new_cyclic(|weak| {
            let id = audio_node_id_provider.get();
            debug_assert_eq!(id, DESTINATION_NODE_ID);

            let destination = Arc::new(AudioHandler::new(
                id,
                &options,
                WeakAudioContext(weak.clone()),
                sample_rate,
                &deferred,
            ));

            {
                let mut state = deferred.lock();
                state.add_node(Arc::clone(&destination), &options);
                state.stage_render_node(PendingRenderNode {
                    handler: Arc::clone(&destination),
                    processor: destination_processor(number_of_channels),
                });
            }

            ConcreteBaseAudioContextInner {
                sample_rate,
                max_channel_count: number_of_channels,
                audio_node_id_provider,
                deferred,
                destination,
                frames_played,
                state: AtomicU8::new(AudioContextState::Suspended as u8),
                connection_count: AtomicU32::new(0),
            }
        });

        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> WeakAudioContext {
        WeakAudioContext(Arc::downgrade(&self.inner))
    }

    pub(crate) fn deferred(&self) -> &Arc<DeferredTaskHandler> {
        &self.inner.deferred
    }

    pub(crate) fn frames_played(&self) -> &Arc<AtomicU64> {
        &self.inner.frames_played
    }

    /// Take the graph lock, from the control thread
    ///
    /// Before handing out the guard, work that the render thread could not finish is completed:
    /// deferred connection breaks are applied, a requested collection runs, and disposed nodes
    /// released by the render thread are dropped, freeing their ids.
    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphState> {
        let deferred = &self.inner.deferred;
        let mut state = deferred.lock();

        deferred.break_connections(&mut state);
        if state.collection_requested() {
            state.collect_garbage();
        }

        for orphan in deferred.take_deletable_orphans() {
            let id = orphan.handler.id();
            log::debug!("delete orphan node {:?}", id);
            drop(orphan);
            self.inner.audio_node_id_provider.recycle(id);
        }

        state
    }

    /// Construct a new pair of audio node and [`AudioProcessor`]
    ///
    /// The handler is added to the graph first, so the node constructor can register its
    /// params. The processor is staged and adopted by the render thread in its next deferred
    /// task pass.
    pub(crate) fn register<T, F>(&self, options: AudioHandlerOptions, f: F) -> T
    where
        F: FnOnce(AudioContextRegistration) -> (T, Box<dyn AudioProcessor>),
    {
        // taking the lock first releases the ids of deleted orphans
        let mut state = self.lock();

        // create a unique id for this node
        let id = self.inner.audio_node_id_provider.get();
        let handler = Arc::new(AudioHandler::new(
            id,
            &options,
            self.downgrade(),
            self.sample_rate(),
            &self.inner.deferred,
        ));

        state.add_node(Arc::clone(&handler), &options);
        drop(state);

        let registration = AudioContextRegistration {
            context: self.clone(),
            handler: Arc::clone(&handler),
        };

        // create the node and its renderer
        let (node, processor) = (f)(registration);

        self.lock()
            .stage_render_node(PendingRenderNode { handler, processor });

        node
    }

    pub(super) fn mark_node_dropped(&self, id: AudioNodeId) {
        // the destination lives as long as the context
        if id == DESTINATION_NODE_ID {
            return;
        }

        self.lock().mark_node_dropped(id);
    }

    /// A source node started playback: it stays alive and enabled until it finishes
    pub(crate) fn notify_source_node_started_processing(&self, id: AudioNodeId) {
        self.lock().notify_source_node_started_processing(id);
    }

    /// Release all playing sources, e.g. when the context closes
    pub(crate) fn release_active_source_nodes(&self) {
        let mut state = self.lock();
        state.release_active_source_nodes();
        state.collect_garbage();
    }

    /// Returns state of current context
    #[must_use]
    pub fn state(&self) -> AudioContextState {
        self.inner.state.load(Ordering::Acquire).into()
    }

    /// Updates state of current context
    pub(super) fn set_state(&self, state: AudioContextState) {
        let previous = self.state();
        if previous != state {
            log::debug!("context state {:?} -> {:?}", previous, state);
            self.inner.state.store(state as u8, Ordering::Release);
        }
    }

    /// The sample rate (in sample-frames per second) at which the context handles audio.
    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.inner.sample_rate
    }

    /// This is the time in seconds of the sample frame immediately following the last
    /// sample-frame in the block of audio most recently processed by the context's rendering
    /// graph.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn current_time(&self) -> f64 {
        self.current_sample_frame() as f64 / self.inner.sample_rate as f64
    }

    /// Number of sample frames rendered so far
    #[must_use]
    pub fn current_sample_frame(&self) -> u64 {
        self.inner.frames_played.load(Ordering::SeqCst)
    }

    /// Maximum available channels for the audio destination
    #[must_use]
    pub fn max_channel_count(&self) -> usize {
        self.inner.max_channel_count
    }

    /// Number of connections made in this context
    #[must_use]
    pub fn connection_count(&self) -> u32 {
        self.inner.connection_count.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_connection_count(&self) {
        self.inner.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the calling thread is the render thread of this context
    #[must_use]
    pub fn is_audio_thread(&self) -> bool {
        self.inner.deferred.is_audio_thread()
    }

    /// Returns an `AudioDestinationNode` representing the final destination of all audio in the
    /// context.
    #[must_use]
    pub fn destination(&self) -> AudioDestinationNode {
        let registration = AudioContextRegistration {
            context: self.clone(),
            handler: Arc::clone(&self.inner.destination),
        };
        AudioDestinationNode::from_registration(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OfflineAudioContext;
    use crate::node::{AudioNode, AudioScheduledSourceNode};

    #[test]
    fn test_id_provider_recycles() {
        let provider = AudioNodeIdProvider::new();
        assert_eq!(provider.get(), AudioNodeId(0));
        assert_eq!(provider.get(), AudioNodeId(1));

        provider.recycle(AudioNodeId(0));
        assert_eq!(provider.get(), AudioNodeId(0));
        assert_eq!(provider.get(), AudioNodeId(2));
    }

    #[test]
    fn test_weak_context() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        let weak = context.base().downgrade();
        assert!(weak.upgrade().unwrap() == *context.base());

        drop(context);
        assert!(weak.upgrade().is_none());
        assert!(WeakAudioContext::default().upgrade().is_none());
    }

    #[test]
    fn test_handlers_outlive_context() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        let gain = context.create_gain();
        let handler = gain.registration().handler();
        assert!(handler.context().is_some());

        drop(context);
        // the node keeps the context alive
        assert!(gain.registration().handler().context().is_some());
    }

    #[test]
    fn test_context_will_be_destroyed_clears_orphans() {
        let mut context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        let gain = context.create_gain();
        let orphan = Arc::clone(&gain.registration().handler);

        // adopted by the render thread, which is gone before it could release the node
        context.start_rendering_sync().unwrap();
        drop(gain);
        assert_eq!(context.base().lock().rendering_orphan_count(), 1);
        assert!(orphan.context().is_some());

        let live = context.create_gain();
        context.base().deferred().context_will_be_destroyed();
        assert!(orphan.context().is_none());
        assert!(live.registration().handler().context().is_none());
    }

    #[test]
    fn test_deferred_break_matches_direct_break() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();

        let deferred_gain = context.create_gain();
        let deferred_src = context.create_constant_source();
        deferred_src.connect(&deferred_gain).unwrap();
        deferred_src.start().unwrap();

        let direct_gain = context.create_gain();
        let direct_src = context.create_constant_source();
        direct_src.connect(&direct_gain).unwrap();
        direct_src.start().unwrap();

        let handler = Arc::clone(&deferred_src.registration().handler);
        assert_eq!(handler.connection_ref_count(), 1);

        // the render thread loses the race for the graph lock
        let deferred = Arc::clone(context.base().deferred());
        let guard = deferred.lock();
        let remote = Arc::clone(&handler);
        let remote_deferred = Arc::clone(&deferred);
        std::thread::spawn(move || {
            remote_deferred.set_audio_thread();
            remote.release_finished_source();
        })
        .join()
        .unwrap();

        assert_eq!(handler.connection_ref_count(), 1);
        drop(guard);

        // the next control thread lock flushes the queued break
        drop(context.base().lock());

        // a direct break from the control thread, for comparison
        Arc::clone(&direct_src.registration().handler).release_finished_source();

        assert_eq!(handler.connection_ref_count(), 0);
        assert_eq!(direct_src.registration().handler().connection_ref_count(), 0);
        assert!(deferred_src.registration().handler().is_disabled());
        assert!(direct_src.registration().handler().is_disabled());
        assert_eq!(
            deferred_gain.registration().handler().is_disabled(),
            direct_gain.registration().handler().is_disabled()
        );
        assert!(deferred_gain.registration().handler().is_disabled());
    }

    #[test]
    fn test_destination_is_not_dropped() {
        let context = OfflineAudioContext::new(2, 128, 44_100.).unwrap();
        let dest = context.destination();
        assert_eq!(dest.registration().id(), DESTINATION_NODE_ID);
        drop(dest);

        let dest = context.destination();
        assert_eq!(dest.channel_count(), 2);
        assert_eq!(dest.number_of_inputs(), 1);
        assert_eq!(dest.number_of_outputs(), 0);
    }

    #[test]
    fn test_connection_count() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        assert_eq!(context.base().connection_count(), 0);

        let gain = context.create_gain();
        gain.connect(&context.destination()).unwrap();
        gain.connect(&context.destination()).unwrap();
        assert_eq!(context.base().connection_count(), 2);
    }
}
