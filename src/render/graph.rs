//! The render side of the audio graph and the pull-based render algorithm

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::context::{AudioNodeId, DESTINATION_NODE_ID};
use crate::graph::{AudioHandler, OutputRef, RenderingInput};
use crate::node::ChannelInterpretation;
use crate::param::AudioParamHandler;

use super::{Alloc, AudioParamValues, AudioProcessor, AudioRenderQuantum, NodeCollection, RenderScope};

/// Edges into a node input, as last synced from the graph state
struct RenderInput {
    /// enabled connections only, in deterministic order
    outputs: SmallVec<[OutputRef; 4]>,
    number_of_channels: usize,
}

/// An audio param of a node, with the outputs connected to its automation input
struct RenderParam {
    handler: Arc<AudioParamHandler>,
    outputs: SmallVec<[OutputRef; 4]>,
}

/// Renderer Node in the Audio Graph
pub(crate) struct RenderNode {
    handler: Arc<AudioHandler>,
    /// Renderer: converts inputs to outputs
    processor: Box<dyn AudioProcessor>,
    inputs: Vec<RenderInput>,
    /// Channel interpretation used when summing the inputs
    interpretation: ChannelInterpretation,
    /// Reusable summing buses
    input_buses: Vec<AudioRenderQuantum>,
    /// Declared channel count of each output
    output_channels: Vec<usize>,
    /// Reusable output buffers, read by downstream nodes
    output_buses: Vec<AudioRenderQuantum>,
    params: Vec<RenderParam>,
    param_values: Vec<AudioRenderQuantum>,
    /// Frame at which this node was last processed, so it renders once per quantum
    last_processing_frame: Option<u64>,
    /// End time of the last quantum with non-silent input
    last_non_silent_time: f64,
}

impl std::fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderNode")
            .field("id", &self.handler.id())
            .field("node_type", &self.handler.node_type())
            .field("output_channels", &self.output_channels)
            .field("last_processing_frame", &self.last_processing_frame)
            .finish_non_exhaustive()
    }
}

impl RenderNode {
    /// Nodes feeding the inputs and params of this node
    fn upstream_nodes(&self) -> SmallVec<[AudioNodeId; 8]> {
        let mut upstream: SmallVec<[AudioNodeId; 8]> = self
            .inputs
            .iter()
            .flat_map(|input| input.outputs.iter())
            .chain(self.params.iter().flat_map(|param| param.outputs.iter()))
            .map(|output| output.node)
            .collect();
        upstream.sort_unstable();
        upstream.dedup();
        upstream
    }

    fn inputs_are_silent(&self) -> bool {
        self.input_buses.iter().all(AudioRenderQuantum::is_silent)
    }

    /// Get the rendered signal of an output
    pub fn output(&self, index: usize) -> Option<&AudioRenderQuantum> {
        self.output_buses.get(index)
    }
}

/// The audio graph as seen by the render thread
///
/// Only lives on the render thread. Topology changes made on the control thread reach it
/// through [`GraphState::handle_deferred_tasks`](crate::graph::GraphState).
pub(crate) struct RenderGraph {
    /// Processing Nodes
    nodes: NodeCollection,
    /// Allocator for audio buffers
    alloc: Alloc,
    /// Inspector nodes without downstream consumers, pulled after the destination
    automatic_pull_nodes: Vec<AudioNodeId>,
    /// Number of channels at the destination
    number_of_channels: usize,
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("nodes", &self.nodes.len())
            .field("automatic_pull_nodes", &self.automatic_pull_nodes)
            .finish_non_exhaustive()
    }
}

impl RenderGraph {
    pub fn new(number_of_channels: usize) -> Self {
        Self {
            nodes: NodeCollection::with_capacity(64),
            alloc: Alloc::with_capacity(64),
            automatic_pull_nodes: Vec::new(),
            number_of_channels,
        }
    }

    pub fn add_node(
        &mut self,
        handler: Arc<AudioHandler>,
        processor: Box<dyn AudioProcessor>,
        number_of_inputs: usize,
        number_of_outputs: usize,
        params: Vec<Arc<AudioParamHandler>>,
    ) {
        let id = handler.id();

        // single channel of silence, resized when the layout is synced
        let inputs = (0..number_of_inputs)
            .map(|_| RenderInput {
                outputs: SmallVec::new(),
                number_of_channels: 1,
            })
            .collect();
        let input_buses = vec![self.alloc.silent_quantum(1); number_of_inputs];
        let output_buses = vec![self.alloc.silent_quantum(1); number_of_outputs];
        let param_values = vec![self.alloc.silent_quantum(1); params.len()];
        let params = params
            .into_iter()
            .map(|handler| RenderParam {
                handler,
                outputs: SmallVec::new(),
            })
            .collect();

        self.nodes.insert(
            id,
            RefCell::new(RenderNode {
                handler,
                processor,
                inputs,
                interpretation: ChannelInterpretation::Speakers,
                input_buses,
                output_channels: vec![1; number_of_outputs],
                output_buses,
                params,
                param_values,
                last_processing_frame: None,
                last_non_silent_time: -1.,
            }),
        );
    }

    /// Apply the topology and channel configuration of a node, as computed by the graph state
    pub fn update_layout(
        &mut self,
        id: AudioNodeId,
        inputs: Vec<RenderingInput>,
        output_channels: Vec<usize>,
        params: Vec<SmallVec<[OutputRef; 4]>>,
        interpretation: ChannelInterpretation,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let node = node.get_mut();

        node.inputs = inputs
            .into_iter()
            .map(|input| RenderInput {
                outputs: input.outputs,
                number_of_channels: input.number_of_channels,
            })
            .collect();
        node.output_channels = output_channels;
        node.params
            .iter_mut()
            .zip(params)
            .for_each(|(param, outputs)| param.outputs = outputs);
        node.interpretation = interpretation;
    }

    pub fn set_automatic_pull_nodes(&mut self, nodes: Vec<AudioNodeId>) {
        self.automatic_pull_nodes = nodes;
    }

    /// Release the render state of a disposed node, the processor is handed back so it can be
    /// dropped off the render thread
    pub fn remove_node(&mut self, id: AudioNodeId) -> Option<Box<dyn AudioProcessor>> {
        self.automatic_pull_nodes.retain(|&n| n != id);
        self.nodes
            .remove(id)
            .map(|node| node.into_inner().processor)
    }

    #[cfg(test)]
    pub fn contains(&self, id: AudioNodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn handle_stoppable_source(&mut self, id: AudioNodeId, scope: &RenderScope) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        scope.node_id.set(id);
        node.get_mut().processor.handle_stoppable_source(scope)
    }

    /// The shared handler of a render node
    pub fn handler(&self, id: AudioNodeId) -> Option<Arc<AudioHandler>> {
        self.nodes
            .get(id)
            .map(|node| Arc::clone(&node.borrow().handler))
    }

    /// Render a single audio quantum by pulling the destination, then the automatic pull nodes
    pub fn render(&mut self, scope: &RenderScope) -> AudioRenderQuantum {
        self.process_if_necessary(DESTINATION_NODE_ID, scope);

        for &id in &self.automatic_pull_nodes {
            self.process_if_necessary(id, scope);
        }

        match self.nodes.get(DESTINATION_NODE_ID) {
            Some(node) => {
                let mut output = node.borrow().input_buses[0].clone();
                output.mix(self.number_of_channels, ChannelInterpretation::Speakers);
                output
            }
            None => self.alloc.silent_quantum(self.number_of_channels),
        }
    }

    /// Process a node, after recursively processing everything upstream
    ///
    /// Every node is processed at most once per render quantum. A node that is reached again
    /// while it is being processed (a cycle) exposes the output of the previous quantum.
    fn process_if_necessary(&self, id: AudioNodeId, scope: &RenderScope) {
        let upstream = {
            let Some(node) = self.nodes.get(id) else {
                return;
            };
            let Ok(mut node) = node.try_borrow_mut() else {
                return;
            };
            if node.last_processing_frame == Some(scope.current_frame) {
                return;
            }
            node.last_processing_frame = Some(scope.current_frame);
            node.upstream_nodes()
        };

        for other in upstream {
            if other != id {
                self.process_if_necessary(other, scope);
            }
        }

        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let mut node = node.borrow_mut();

        self.pull_inputs(&mut node);
        self.compute_params(&mut node, scope);

        // silent outputs with the declared channel counts
        let RenderNode {
            output_buses,
            output_channels,
            ..
        } = &mut *node;
        output_buses
            .iter_mut()
            .zip(output_channels.iter())
            .for_each(|(bus, &channels)| {
                bus.make_silent();
                bus.set_number_of_channels(channels);
            });

        let inputs_silent = node.inputs_are_silent();
        if !inputs_silent {
            node.last_non_silent_time = scope.end_time();
        }

        if inputs_silent
            && node
                .processor
                .propagates_silence(node.last_non_silent_time, scope)
        {
            return;
        }

        scope.node_id.set(id);

        let RenderNode {
            processor,
            input_buses,
            output_buses,
            param_values,
            ..
        } = &mut *node;
        let params = AudioParamValues::from(&param_values[..]);

        // We are abusing AssertUnwindSafe here, we cannot guarantee it upholds. A panicking
        // processor is silenced for this quantum, rather than taking down the render thread.
        let catch_me = AssertUnwindSafe(|| processor.process(input_buses, output_buses, params, scope));
        if let Err(e) = panic::catch_unwind(catch_me) {
            let message = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            log::error!("processor of node {:?} panicked: {}", id, message);
            output_buses.iter_mut().for_each(AudioRenderQuantum::make_silent);
        }
    }

    /// Signal of an output of another node, or of the node itself (feedback loop)
    fn output_of(&self, node: &RenderNode, id: AudioNodeId, output: OutputRef) -> Option<AudioRenderQuantum> {
        if output.node == id {
            return node.output_buses.get(output.index).cloned();
        }
        // a node still being processed higher up the stack counts as silence
        let other = self.nodes.get(output.node)?.try_borrow().ok()?;
        other.output(output.index).cloned()
    }

    fn pull_inputs(&self, node: &mut RenderNode) {
        let id = node.handler.id();

        for index in 0..node.inputs.len() {
            let input = &node.inputs[index];
            let number_of_channels = input.number_of_channels;

            let bus = match input.outputs.as_slice() {
                // single connection, pass the signal through without copying
                [output] => {
                    let mut bus = self
                        .output_of(node, id, *output)
                        .unwrap_or_else(|| self.alloc.silent_quantum(number_of_channels));
                    bus.mix(number_of_channels, node.interpretation);
                    bus
                }
                outputs => {
                    let mut bus = self.alloc.silent_quantum(number_of_channels);
                    for output in outputs {
                        if let Some(signal) = self.output_of(node, id, *output) {
                            bus.add(&signal, node.interpretation);
                        }
                    }
                    bus
                }
            };

            node.input_buses[index] = bus;
        }
    }

    fn compute_params(&self, node: &mut RenderNode, scope: &RenderScope) {
        let id = node.handler.id();

        for index in 0..node.params.len() {
            let param = &node.params[index];

            let input = if param.outputs.is_empty() {
                None
            } else {
                // mono mix of all connections
                let mut bus = self.alloc.silent_quantum(1);
                for output in &param.outputs {
                    if let Some(signal) = self.output_of(node, id, *output) {
                        bus.add(&signal, ChannelInterpretation::Speakers);
                    }
                }
                Some(bus)
            };

            let handler = Arc::clone(&param.handler);
            let values = &mut node.param_values[index];
            values.make_silent();
            handler.compute(scope, input.as_ref(), values);
        }
    }
}
