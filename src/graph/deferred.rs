use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::ThreadId;

use crossbeam_channel::{Receiver, Sender};

use super::{AudioHandler, DeletableOrphan, GraphState};

/// Owner of the graph lock, and of the work that could not be done on the render thread
/// because the lock was contended
///
/// The control thread always blocks on the lock. The render thread never does: it only tries
/// the lock, and queues the work (connection breaks of finished sources) when that fails. The
/// queued work is flushed by the next holder of the lock.
pub(crate) struct DeferredTaskHandler {
    state: Mutex<GraphState>,
    audio_thread: OnceLock<ThreadId>,
    deferred_break_sender: Sender<Arc<AudioHandler>>,
    deferred_break_receiver: Receiver<Arc<AudioHandler>>,
    deletable_orphans: Receiver<DeletableOrphan>,
}

impl std::fmt::Debug for DeferredTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTaskHandler")
            .field("audio_thread", &self.audio_thread.get())
            .finish_non_exhaustive()
    }
}

impl DeferredTaskHandler {
    pub fn new() -> Arc<Self> {
        let (deferred_break_sender, deferred_break_receiver) = crossbeam_channel::unbounded();
        let (orphan_sender, deletable_orphans) = crossbeam_channel::unbounded();

        Arc::new(Self {
            state: Mutex::new(GraphState::new(orphan_sender)),
            audio_thread: OnceLock::new(),
            deferred_break_sender,
            deferred_break_receiver,
            deletable_orphans,
        })
    }

    /// Mark the calling thread as the render thread
    pub fn set_audio_thread(&self) {
        let current = std::thread::current().id();
        if self.audio_thread.set(current).is_err() {
            log::warn!("render thread was already registered");
        }
    }

    pub fn is_audio_thread(&self) -> bool {
        self.audio_thread.get() == Some(&std::thread::current().id())
    }

    /// Take the graph lock, blocking, from the control thread
    pub fn lock(&self) -> MutexGuard<'_, GraphState> {
        debug_assert!(!self.is_audio_thread(), "render thread must not block");
        self.state.lock().unwrap()
    }

    /// Try to take the graph lock from the render thread, never blocks
    pub fn try_lock(&self) -> Option<MutexGuard<'_, GraphState>> {
        debug_assert!(self.is_audio_thread(), "only the render thread tries the lock");
        self.state.try_lock().ok()
    }

    /// Queue a connection break that the render thread could not apply
    pub fn add_deferred_break_connection(&self, handler: Arc<AudioHandler>) {
        log::debug!("defer break connection of node {:?}", handler.id());
        // both ends live as long as self
        let _ = self.deferred_break_sender.send(handler);
    }

    /// Apply all queued connection breaks, the graph lock is held by the caller
    ///
    /// The queued handlers belong to finished sources, so they also leave the active source set.
    pub fn break_connections(&self, state: &mut GraphState) {
        for handler in self.deferred_break_receiver.try_iter() {
            state.release_source_node(handler.id());
        }
    }

    /// Disposed nodes released by the render thread, ready to be dropped
    pub fn take_deletable_orphans(&self) -> Vec<DeletableOrphan> {
        self.deletable_orphans.try_iter().collect()
    }

    /// The context is being torn down: clear all back-references to it
    pub fn context_will_be_destroyed(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.context_will_be_destroyed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_thread_registration() {
        let deferred = DeferredTaskHandler::new();
        assert!(!deferred.is_audio_thread());

        let remote = Arc::clone(&deferred);
        std::thread::spawn(move || {
            remote.set_audio_thread();
            assert!(remote.is_audio_thread());
            assert!(remote.try_lock().is_some());
        })
        .join()
        .unwrap();

        assert!(!deferred.is_audio_thread());
        assert!(deferred.take_deletable_orphans().is_empty());
    }

    #[test]
    fn test_try_lock_contended() {
        let deferred = DeferredTaskHandler::new();
        let guard = deferred.lock();

        let remote = Arc::clone(&deferred);
        let acquired = std::thread::spawn(move || {
            remote.set_audio_thread();
            remote.try_lock().is_some()
        })
        .join()
        .unwrap();

        assert!(!acquired);
        drop(guard);
    }
}
