//! The render thread: pulls the graph one quantum at a time and ships the samples back

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::{AudioRenderQuantum, RenderGraph, RenderScope};
use crate::context::AudioNodeId;
use crate::graph::DeferredTaskHandler;
use crate::{AudioGraphError, RENDER_QUANTUM_SIZE};

/// Requests from the control thread to the render thread
#[derive(Debug)]
pub(crate) enum RenderRequest {
    /// render the given number of quanta and send back the samples
    Render { quanta: usize },
    /// drop the render graph and exit
    Terminate,
}

/// Rendered samples, one `Vec` per channel
pub(crate) type RenderedChannels = Vec<Vec<f32>>;

/// Operations running on the dedicated render thread
pub(crate) struct RenderThread {
    deferred: Arc<DeferredTaskHandler>,
    sample_rate: f32,
    /// number of channels of the rendered output
    number_of_channels: usize,
    frames_played: Arc<AtomicU64>,
    receiver: Receiver<RenderRequest>,
    sender: Sender<RenderedChannels>,
    /// sources that finished playing in the current quantum
    finished: Vec<AudioNodeId>,
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("sample_rate", &self.sample_rate)
            .field("frames_played", &self.frames_played.load(Ordering::Relaxed))
            .field("number_of_channels", &self.number_of_channels)
            .finish_non_exhaustive()
    }
}

/// Control thread side of a running [`RenderThread`]
pub(crate) struct RenderThreadHandle {
    requests: Sender<RenderRequest>,
    rendered: Receiver<RenderedChannels>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RenderThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThreadHandle")
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

impl RenderThread {
    /// Spawn the render thread
    ///
    /// The render graph holds `Rc` based buses, so it is created on the render thread itself and
    /// never leaves it.
    pub fn spawn(
        deferred: Arc<DeferredTaskHandler>,
        sample_rate: f32,
        number_of_channels: usize,
        frames_played: Arc<AtomicU64>,
    ) -> Result<RenderThreadHandle, AudioGraphError> {
        // unbounded is fine, at most one request is in flight
        let (requests, receiver) = crossbeam_channel::unbounded();
        let (sender, rendered) = crossbeam_channel::unbounded();

        let render_thread = Self {
            deferred,
            sample_rate,
            number_of_channels,
            frames_played,
            receiver,
            sender,
            finished: Vec::new(),
        };

        let thread = std::thread::Builder::new()
            .name("web-audio-graph render".into())
            .spawn(move || render_thread.run())
            .map_err(|e| {
                AudioGraphError::invalid_state(format!("unable to spawn render thread: {}", e))
            })?;

        Ok(RenderThreadHandle {
            requests,
            rendered,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        self.deferred.set_audio_thread();
        log::debug!("render thread started");

        let mut graph = RenderGraph::new(self.number_of_channels);

        while let Ok(request) = self.receiver.recv() {
            match request {
                RenderRequest::Render { quanta } => {
                    let capacity = quanta * RENDER_QUANTUM_SIZE;
                    let mut channels = vec![Vec::with_capacity(capacity); self.number_of_channels];

                    for _ in 0..quanta {
                        let rendered = self.render_quantum(&mut graph);
                        channels
                            .iter_mut()
                            .zip(rendered.channels())
                            .for_each(|(samples, channel)| samples.extend_from_slice(channel));
                    }

                    if self.sender.send(channels).is_err() {
                        log::warn!("control thread is gone, stop rendering");
                        break;
                    }
                }
                RenderRequest::Terminate => break,
            }
        }

        log::debug!("render thread stopped");
    }

    /// Render a single quantum, with the pre and post render tasks around it
    ///
    /// Neither task phase blocks: when the graph lock is contended the phase is skipped, the
    /// changes are picked up in the next quantum.
    fn render_quantum(&mut self, graph: &mut RenderGraph) -> AudioRenderQuantum {
        let current_frame = self.frames_played.load(Ordering::SeqCst);
        let scope = RenderScope::new(current_frame, self.sample_rate);

        self.pre_render(graph, &scope);

        let rendered = graph.render(&scope);
        self.finished.append(&mut scope.finished.borrow_mut());

        self.frames_played
            .fetch_add(RENDER_QUANTUM_SIZE as u64, Ordering::SeqCst);

        self.post_render(graph);

        rendered
    }

    fn pre_render(&mut self, graph: &mut RenderGraph, scope: &RenderScope) {
        match self.deferred.try_lock() {
            Some(mut state) => {
                state.handle_deferred_tasks(graph);
                state.handle_stoppable_source_nodes(graph, scope, &mut self.finished);
            }
            None => log::trace!("graph lock contended, skip pre render tasks"),
        }
    }

    fn post_render(&mut self, graph: &mut RenderGraph) {
        match self.deferred.try_lock() {
            Some(mut state) => {
                self.deferred.break_connections(&mut state);
                state.release_finished_source_nodes(&mut self.finished);
                state.handle_deferred_tasks(graph);
                state.request_to_delete_handlers_on_main_thread(graph);
            }
            None => {
                log::trace!("graph lock contended, defer post render tasks");
                for id in self.finished.drain(..) {
                    if let Some(handler) = graph.handler(id) {
                        handler.release_finished_source();
                    }
                }
            }
        }
    }
}

impl RenderThreadHandle {
    /// Render the given number of quanta, blocking until the samples are available
    ///
    /// # Errors
    ///
    /// `InvalidStateError` when the render thread is gone
    pub fn render(&self, quanta: usize) -> Result<RenderedChannels, AudioGraphError> {
        let gone = || AudioGraphError::invalid_state("the render thread has stopped");

        self.requests
            .send(RenderRequest::Render { quanta })
            .map_err(|_| gone())?;
        self.rendered.recv().map_err(|_| gone())
    }

    /// Stop the render thread and wait for it to exit
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.requests.send(RenderRequest::Terminate);
        if thread.join().is_err() {
            log::warn!("render thread panicked");
        }
    }
}

impl Drop for RenderThreadHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BaseAudioContext, OfflineAudioContext};

    #[test]
    fn test_render_empty_graph() {
        let context = OfflineAudioContext::new(2, 128, 44_100.).unwrap();
        let base = context.base();

        let handle = RenderThread::spawn(
            Arc::clone(base.deferred()),
            base.sample_rate(),
            2,
            Arc::clone(base.frames_played()),
        )
        .unwrap();

        let channels = handle.render(3).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].len(), 3 * RENDER_QUANTUM_SIZE);
        assert!(channels[1].iter().all(|&s| s == 0.));
        assert_eq!(base.current_sample_frame(), 3 * RENDER_QUANTUM_SIZE as u64);

        handle.terminate();
    }

    #[test]
    fn test_render_after_terminate_fails() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        let base = context.base();

        let mut handle = RenderThread::spawn(
            Arc::clone(base.deferred()),
            base.sample_rate(),
            1,
            Arc::clone(base.frames_played()),
        )
        .unwrap();
        handle.shutdown();

        assert!(handle.render(1).is_err());
    }
}
