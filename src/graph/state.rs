use std::sync::Arc;

use crossbeam_channel::Sender;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::context::{AudioNodeId, DESTINATION_NODE_ID};
use crate::node::{ChannelCountMode, ChannelInterpretation};
use crate::param::AudioParamHandler;
use crate::render::{AudioProcessor, RenderGraph, RenderScope};

use super::{AudioHandler, AudioHandlerOptions};

/// Output `index` of node `node`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OutputRef {
    pub node: AudioNodeId,
    pub index: usize,
}

/// Input `index` of node `node`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct InputRef {
    pub node: AudioNodeId,
    pub index: usize,
}

/// Param `index` of node `node`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ParamRef {
    pub node: AudioNodeId,
    pub index: usize,
}

impl OutputRef {
    pub fn new(node: AudioNodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl InputRef {
    pub fn new(node: AudioNodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl ParamRef {
    pub fn new(node: AudioNodeId, index: usize) -> Self {
        Self { node, index }
    }
}

/// A point where edges converge and are summed: a node input or an audio param
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum SummingJunction {
    Input(InputRef),
    Param(ParamRef),
}

impl SummingJunction {
    fn node(self) -> AudioNodeId {
        match self {
            Self::Input(input) => input.node,
            Self::Param(param) => param.node,
        }
    }
}

/// Connections into a node input
#[derive(Debug, Default)]
pub(crate) struct InputEntry {
    /// connected outputs that are pulled when rendering
    outputs: FxHashSet<OutputRef>,
    /// connected outputs of dormant nodes, not pulled
    disabled_outputs: FxHashSet<OutputRef>,
    /// channel count of the summing bus, as determined by the channel count mode
    computed_number_of_channels: usize,
}

/// Fan-out of a node output
#[derive(Debug)]
pub(crate) struct OutputEntry {
    inputs: FxHashSet<InputRef>,
    params: FxHashSet<ParamRef>,
    number_of_channels: usize,
    desired_number_of_channels: usize,
    is_enabled: bool,
}

/// Connections into an audio param
pub(crate) struct ParamEntry {
    handler: Arc<AudioParamHandler>,
    outputs: FxHashSet<OutputRef>,
}

/// Topology and channel configuration of a single node
pub(crate) struct NodeEntry {
    handler: Arc<AudioHandler>,
    inputs: Vec<InputEntry>,
    outputs: Vec<OutputEntry>,
    params: Vec<ParamEntry>,
    channel_count: usize,
    channel_count_mode: ChannelCountMode,
    new_channel_count_mode: ChannelCountMode,
    channel_interpretation: ChannelInterpretation,
    new_channel_interpretation: ChannelInterpretation,
    is_disabled: bool,
    /// the owning `AudioNode` is still referenced
    node_alive: bool,
}

/// Processor of a new node, waiting to be adopted by the render graph
pub(crate) struct PendingRenderNode {
    pub handler: Arc<AudioHandler>,
    pub processor: Box<dyn AudioProcessor>,
}

/// A disposed node that the render thread no longer touches, to be dropped on the control
/// thread. Dropping it frees the node id for reuse.
pub(crate) struct DeletableOrphan {
    pub handler: Arc<AudioHandler>,
    pub processor: Option<Box<dyn AudioProcessor>>,
}

/// Rendering layout of a node input, as handed to the render graph
pub(crate) struct RenderingInput {
    pub outputs: SmallVec<[OutputRef; 4]>,
    pub number_of_channels: usize,
}

fn sorted<T: Copy + Ord>(set: &FxHashSet<T>) -> SmallVec<[T; 4]> {
    let mut items: SmallVec<[T; 4]> = set.iter().copied().collect();
    items.sort_unstable();
    items
}

fn computed_number_of_channels(
    mode: ChannelCountMode,
    channel_count: usize,
    connected: impl Iterator<Item = usize>,
) -> usize {
    match mode {
        ChannelCountMode::Explicit => channel_count,
        ChannelCountMode::Max => connected.fold(1, usize::max),
        ChannelCountMode::ClampedMax => connected.fold(1, usize::max).min(channel_count),
    }
}

/// The audio graph topology, only accessible while holding the graph lock
///
/// Everything here is mutated by the control thread. The render thread reads it, and applies
/// the pending changes to its own render graph, in [`Self::handle_deferred_tasks`].
pub(crate) struct GraphState {
    nodes: FxHashMap<AudioNodeId, NodeEntry>,
    dirty_summing_junctions: FxHashSet<SummingJunction>,
    dirty_audio_node_outputs: FxHashSet<OutputRef>,
    changed_channel_count_mode: FxHashSet<AudioNodeId>,
    changed_channel_interpretation: FxHashSet<AudioNodeId>,
    automatic_pull_nodes: FxHashSet<AudioNodeId>,
    automatic_pull_nodes_need_updating: bool,
    /// disposed handlers the render thread may still be using this quantum
    rendering_orphan_handlers: Vec<Arc<AudioHandler>>,
    pending_render_nodes: Vec<PendingRenderNode>,
    /// nodes whose rendering layout changed since the last deferred task pass
    render_updates: FxHashSet<AudioNodeId>,
    active_source_nodes: FxHashSet<AudioNodeId>,
    collection_requested: bool,
    deletable_orphans: Sender<DeletableOrphan>,
}

impl GraphState {
    pub fn new(deletable_orphans: Sender<DeletableOrphan>) -> Self {
        Self {
            nodes: FxHashMap::default(),
            dirty_summing_junctions: FxHashSet::default(),
            dirty_audio_node_outputs: FxHashSet::default(),
            changed_channel_count_mode: FxHashSet::default(),
            changed_channel_interpretation: FxHashSet::default(),
            automatic_pull_nodes: FxHashSet::default(),
            automatic_pull_nodes_need_updating: false,
            rendering_orphan_handlers: Vec::new(),
            pending_render_nodes: Vec::new(),
            render_updates: FxHashSet::default(),
            active_source_nodes: FxHashSet::default(),
            collection_requested: false,
            deletable_orphans,
        }
    }

    // ---------------------------------------------------------------------------------------
    // registration

    /// Add a new node to the topology
    ///
    /// Nodes start out dormant, unless they keep their outputs enabled regardless of their
    /// connection count.
    pub fn add_node(&mut self, handler: Arc<AudioHandler>, options: &AudioHandlerOptions) {
        let id = handler.id();
        let node_options = &options.audio_node_options;
        let is_disabled = !handler.node_type().keeps_outputs_enabled();

        let inputs = (0..options.number_of_inputs)
            .map(|_| InputEntry {
                computed_number_of_channels: computed_number_of_channels(
                    node_options.channel_count_mode,
                    node_options.channel_count,
                    std::iter::empty(),
                ),
                ..InputEntry::default()
            })
            .collect();

        let outputs = options
            .output_channels
            .iter()
            .map(|&number_of_channels| OutputEntry {
                inputs: FxHashSet::default(),
                params: FxHashSet::default(),
                number_of_channels,
                desired_number_of_channels: number_of_channels,
                is_enabled: !is_disabled,
            })
            .collect();

        let entry = NodeEntry {
            handler,
            inputs,
            outputs,
            params: Vec::new(),
            channel_count: node_options.channel_count,
            channel_count_mode: node_options.channel_count_mode,
            new_channel_count_mode: node_options.channel_count_mode,
            channel_interpretation: node_options.channel_interpretation,
            new_channel_interpretation: node_options.channel_interpretation,
            is_disabled,
            node_alive: true,
        };

        log::debug!("register node {:?} {:?}", id, entry.handler.node_type());
        self.nodes.insert(id, entry);
    }

    /// Add an audio param to a registered node, returns the param index
    pub fn add_param(&mut self, node: AudioNodeId, handler: Arc<AudioParamHandler>) -> usize {
        let entry = self.node_mut(node);
        entry.params.push(ParamEntry {
            handler,
            outputs: FxHashSet::default(),
        });
        entry.params.len() - 1
    }

    /// Stage the processor of a registered node, adopted by the render thread in its next
    /// deferred task pass
    pub fn stage_render_node(&mut self, pending: PendingRenderNode) {
        self.pending_render_nodes.push(pending);
    }

    #[track_caller]
    fn node(&self, id: AudioNodeId) -> &NodeEntry {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("node {:?} is not registered", id))
    }

    #[track_caller]
    fn node_mut(&mut self, id: AudioNodeId) -> &mut NodeEntry {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("node {:?} is not registered", id))
    }

    fn handler(&self, id: AudioNodeId) -> Option<Arc<AudioHandler>> {
        self.nodes.get(&id).map(|entry| Arc::clone(&entry.handler))
    }

    fn input_mut(&mut self, input: InputRef) -> Option<&mut InputEntry> {
        self.nodes
            .get_mut(&input.node)
            .and_then(|entry| entry.inputs.get_mut(input.index))
    }

    fn output(&self, output: OutputRef) -> Option<&OutputEntry> {
        self.nodes
            .get(&output.node)
            .and_then(|entry| entry.outputs.get(output.index))
    }

    fn output_mut(&mut self, output: OutputRef) -> Option<&mut OutputEntry> {
        self.nodes
            .get_mut(&output.node)
            .and_then(|entry| entry.outputs.get_mut(output.index))
    }

    fn param_mut(&mut self, param: ParamRef) -> Option<&mut ParamEntry> {
        self.nodes
            .get_mut(&param.node)
            .and_then(|entry| entry.params.get_mut(param.index))
    }

    // ---------------------------------------------------------------------------------------
    // connections

    /// Connect an output to a node input
    ///
    /// The destination handler gains a connection reference. An edge from a dormant output is
    /// recorded as disabled and not pulled until the output is enabled.
    pub fn connect(&mut self, output: OutputRef, input: InputRef) {
        let Some(is_enabled) = self.output(output).map(|o| o.is_enabled) else {
            return;
        };
        let Some(input_entry) = self.input_mut(input) else {
            return;
        };
        if input_entry.outputs.contains(&output) || input_entry.disabled_outputs.contains(&output)
        {
            return;
        }

        if is_enabled {
            input_entry.outputs.insert(output);
        } else {
            input_entry.disabled_outputs.insert(output);
        }
        if let Some(output_entry) = self.output_mut(output) {
            output_entry.inputs.insert(input);
        }
        self.mark_summing_junction_dirty(SummingJunction::Input(input));

        if let Some(destination) = self.handler(input.node) {
            destination.make_connection(self);
        }

        self.update_pull_status(output.node);
        self.update_pull_status(input.node);
    }

    /// Remove the edge between an output and a node input, returns `false` when there is none
    pub fn disconnect(&mut self, output: OutputRef, input: InputRef) -> bool {
        let Some(input_entry) = self.input_mut(input) else {
            return false;
        };

        if input_entry.outputs.remove(&output) {
            self.mark_summing_junction_dirty(SummingJunction::Input(input));
        } else if !input_entry.disabled_outputs.remove(&output) {
            return false;
        }

        if let Some(output_entry) = self.output_mut(output) {
            output_entry.inputs.remove(&input);
        }

        if let Some(destination) = self.handler(input.node) {
            destination.break_connection_with_lock(self);
        }

        self.update_pull_status(output.node);
        self.update_pull_status(input.node);

        true
    }

    /// Connect an output to the automation input of an audio param
    ///
    /// Param connections carry no connection reference and are never disabled.
    pub fn connect_param(&mut self, output: OutputRef, param: ParamRef) {
        let Some(param_entry) = self.param_mut(param) else {
            return;
        };
        if !param_entry.outputs.insert(output) {
            return;
        }
        if let Some(output_entry) = self.output_mut(output) {
            output_entry.params.insert(param);
        }
        self.mark_summing_junction_dirty(SummingJunction::Param(param));
        self.update_pull_status(output.node);
    }

    /// Remove the edge between an output and an audio param, returns `false` when there is none
    pub fn disconnect_param(&mut self, output: OutputRef, param: ParamRef) -> bool {
        let Some(param_entry) = self.param_mut(param) else {
            return false;
        };
        if !param_entry.outputs.remove(&output) {
            return false;
        }
        if let Some(output_entry) = self.output_mut(output) {
            output_entry.params.remove(&param);
        }
        self.mark_summing_junction_dirty(SummingJunction::Param(param));
        self.update_pull_status(output.node);
        true
    }

    /// Remove all fan-out edges of an output, to inputs and params
    pub fn disconnect_all(&mut self, output: OutputRef) {
        let Some(output_entry) = self.output(output) else {
            return;
        };
        let inputs = sorted(&output_entry.inputs);
        let params = sorted(&output_entry.params);

        for input in inputs {
            self.disconnect(output, input);
        }
        for param in params {
            self.disconnect_param(output, param);
        }
    }

    /// The nodes fed by the given output
    pub fn connected_nodes(&self, output: OutputRef) -> SmallVec<[AudioNodeId; 4]> {
        let mut nodes: SmallVec<[AudioNodeId; 4]> = self
            .output(output)
            .map(|o| o.inputs.iter().map(|i| i.node).collect())
            .unwrap_or_default();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    // ---------------------------------------------------------------------------------------
    // enable and disable

    pub fn is_disabled(&self, id: AudioNodeId) -> Option<bool> {
        self.nodes.get(&id).map(|entry| entry.is_disabled)
    }

    /// Wake up a dormant node that gained an active connection
    pub fn enable_outputs_if_necessary(&mut self, id: AudioNodeId) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        if !entry.is_disabled || entry.handler.connection_ref_count() == 0 {
            return;
        }

        entry.is_disabled = false;
        for index in 0..entry.outputs.len() {
            self.enable_output(OutputRef::new(id, index));
        }
    }

    /// Put the outputs of a node in the dormant state when at most one active connection is
    /// left
    ///
    /// A count of one happens when the last input of a node is disabled upstream: the node is
    /// about to go quiet but still holds that connection.
    pub fn disable_outputs_if_necessary(&mut self, id: AudioNodeId) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        if entry.is_disabled
            || entry.handler.connection_ref_count() > 1
            || entry.handler.node_type().keeps_outputs_enabled()
        {
            return;
        }

        entry.is_disabled = true;
        for index in 0..entry.outputs.len() {
            self.disable_output(OutputRef::new(id, index));
        }
    }

    fn enable_output(&mut self, output: OutputRef) {
        let Some(output_entry) = self.output_mut(output) else {
            return;
        };
        if output_entry.is_enabled {
            return;
        }
        output_entry.is_enabled = true;

        for input in sorted(&output_entry.inputs) {
            let Some(input_entry) = self.input_mut(input) else {
                continue;
            };
            if input_entry.disabled_outputs.remove(&output) {
                input_entry.outputs.insert(output);
                self.mark_summing_junction_dirty(SummingJunction::Input(input));
                self.enable_outputs_if_necessary(input.node);
            }
        }
    }

    fn disable_output(&mut self, output: OutputRef) {
        let Some(output_entry) = self.output_mut(output) else {
            return;
        };
        if !output_entry.is_enabled {
            return;
        }
        output_entry.is_enabled = false;

        for input in sorted(&output_entry.inputs) {
            let Some(input_entry) = self.input_mut(input) else {
                continue;
            };
            if input_entry.outputs.remove(&output) {
                input_entry.disabled_outputs.insert(output);
                self.mark_summing_junction_dirty(SummingJunction::Input(input));
                self.disable_outputs_if_necessary(input.node);
            }
        }
    }

    // ---------------------------------------------------------------------------------------
    // channel configuration

    pub fn mark_summing_junction_dirty(&mut self, junction: SummingJunction) {
        self.dirty_summing_junctions.insert(junction);
    }

    pub fn mark_audio_node_output_dirty(&mut self, output: OutputRef) {
        self.dirty_audio_node_outputs.insert(output);
    }

    pub fn channel_count(&self, id: AudioNodeId) -> Option<usize> {
        self.nodes.get(&id).map(|entry| entry.channel_count)
    }

    pub fn set_channel_count(&mut self, id: AudioNodeId, channel_count: usize) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        if entry.channel_count == channel_count {
            return;
        }
        entry.channel_count = channel_count;
        if entry.channel_count_mode != ChannelCountMode::Max {
            self.update_channels_for_inputs(id);
        }
    }

    pub fn channel_count_mode(&self, id: AudioNodeId) -> Option<ChannelCountMode> {
        self.nodes.get(&id).map(|entry| entry.new_channel_count_mode)
    }

    pub fn set_channel_count_mode(&mut self, id: AudioNodeId, mode: ChannelCountMode) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        entry.new_channel_count_mode = mode;
        if mode != entry.channel_count_mode {
            self.changed_channel_count_mode.insert(id);
        }
    }

    pub fn channel_interpretation(&self, id: AudioNodeId) -> Option<ChannelInterpretation> {
        self.nodes.get(&id).map(|entry| entry.new_channel_interpretation)
    }

    pub fn set_channel_interpretation(
        &mut self,
        id: AudioNodeId,
        interpretation: ChannelInterpretation,
    ) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        entry.new_channel_interpretation = interpretation;
        if interpretation != entry.channel_interpretation {
            self.changed_channel_interpretation.insert(id);
        }
    }

    /// Request a new channel count for an output, applied by the next deferred task pass
    pub fn set_output_channel_count(&mut self, output: OutputRef, number_of_channels: usize) {
        let Some(output_entry) = self.output_mut(output) else {
            return;
        };
        output_entry.desired_number_of_channels = number_of_channels;
        self.mark_audio_node_output_dirty(output);
    }

    fn update_channels_for_inputs(&mut self, id: AudioNodeId) {
        let number_of_inputs = self.nodes.get(&id).map_or(0, |entry| entry.inputs.len());
        for index in 0..number_of_inputs {
            self.mark_summing_junction_dirty(SummingJunction::Input(InputRef::new(id, index)));
        }
    }

    fn compute_number_of_channels(&self, input: InputRef) -> Option<usize> {
        let entry = self.nodes.get(&input.node)?;
        let input_entry = entry.inputs.get(input.index)?;

        let connected = input_entry
            .outputs
            .iter()
            .filter_map(|o| self.output(*o))
            .map(|o| o.number_of_channels);

        Some(computed_number_of_channels(
            entry.channel_count_mode,
            entry.channel_count,
            connected,
        ))
    }

    /// Recompute the summing bus channel count of an input, and let nodes whose output follows
    /// their input adjust (and propagate) their output channel count
    fn check_number_of_channels_for_input(&mut self, input: InputRef) {
        let Some(number_of_channels) = self.compute_number_of_channels(input) else {
            return;
        };

        let entry = self.node_mut(input.node);
        entry.inputs[input.index].computed_number_of_channels = number_of_channels;
        let follows = entry.handler.node_type().output_follows_input()
            && entry.inputs.len() == 1
            && entry.outputs.len() == 1
            && entry.outputs[0].number_of_channels != number_of_channels;
        if follows {
            entry.outputs[0].desired_number_of_channels = number_of_channels;
        }

        self.render_updates.insert(input.node);

        if follows {
            self.update_number_of_channels(OutputRef::new(input.node, 0));
        }
    }

    fn update_number_of_channels(&mut self, output: OutputRef) {
        let Some(output_entry) = self.output_mut(output) else {
            return;
        };
        if output_entry.number_of_channels == output_entry.desired_number_of_channels {
            return;
        }
        output_entry.number_of_channels = output_entry.desired_number_of_channels;
        let inputs = sorted(&output_entry.inputs);

        self.render_updates.insert(output.node);
        for input in inputs {
            self.check_number_of_channels_for_input(input);
        }
    }

    // ---------------------------------------------------------------------------------------
    // automatic pull nodes

    /// Inspector nodes without downstream consumers are pulled by the render graph directly,
    /// as long as something is connected to their input
    fn update_pull_status(&mut self, id: AudioNodeId) {
        let Some(entry) = self.nodes.get(&id) else {
            return;
        };
        if !entry.handler.node_type().is_inspector() {
            return;
        }

        let output_connected = entry
            .outputs
            .iter()
            .any(|o| !o.inputs.is_empty() || !o.params.is_empty());
        let input_connected = entry
            .inputs
            .iter()
            .any(|i| !i.outputs.is_empty() || !i.disabled_outputs.is_empty());

        let changed = if output_connected || !input_connected {
            self.automatic_pull_nodes.remove(&id)
        } else {
            self.automatic_pull_nodes.insert(id)
        };
        if changed {
            self.automatic_pull_nodes_need_updating = true;
        }
    }

    pub fn is_automatic_pull_node(&self, id: AudioNodeId) -> bool {
        self.automatic_pull_nodes.contains(&id)
    }

    // ---------------------------------------------------------------------------------------
    // deferred tasks (render thread, pre and post render)

    /// Apply all pending topology and channel configuration changes to the render graph
    ///
    /// Channel count mode changes mark summing junctions dirty, and recomputing those can
    /// change output channel counts, so the order of the steps matters. New render nodes are
    /// adopted first so the steps below can update their layout.
    pub fn handle_deferred_tasks(&mut self, graph: &mut RenderGraph) {
        self.adopt_pending_render_nodes(graph);
        self.update_changed_channel_count_mode();
        self.update_changed_channel_interpretation();
        self.handle_dirty_audio_summing_junctions();
        self.handle_dirty_audio_node_outputs();
        self.update_automatic_pull_nodes(graph);
        self.update_render_nodes(graph);
    }

    fn adopt_pending_render_nodes(&mut self, graph: &mut RenderGraph) {
        for pending in std::mem::take(&mut self.pending_render_nodes) {
            let id = pending.handler.id();
            let Some(entry) = self.nodes.get(&id) else {
                continue;
            };
            let params = entry.params.iter().map(|p| Arc::clone(&p.handler)).collect();
            graph.add_node(
                pending.handler,
                pending.processor,
                entry.inputs.len(),
                entry.outputs.len(),
                params,
            );
            self.render_updates.insert(id);
        }
    }

    fn update_changed_channel_count_mode(&mut self) {
        let mut changed: Vec<_> = self.changed_channel_count_mode.drain().collect();
        changed.sort_unstable();

        for id in changed {
            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.channel_count_mode = entry.new_channel_count_mode;
                self.update_channels_for_inputs(id);
            }
        }
    }

    fn update_changed_channel_interpretation(&mut self) {
        let mut changed: Vec<_> = self.changed_channel_interpretation.drain().collect();
        changed.sort_unstable();

        for id in changed {
            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.channel_interpretation = entry.new_channel_interpretation;
                self.render_updates.insert(id);
            }
        }
    }

    fn handle_dirty_audio_summing_junctions(&mut self) {
        let mut junctions: Vec<_> = self.dirty_summing_junctions.drain().collect();
        junctions.sort_unstable();

        for junction in junctions {
            match junction {
                SummingJunction::Input(input) => self.check_number_of_channels_for_input(input),
                SummingJunction::Param(param) => {
                    self.render_updates.insert(param.node);
                }
            }
        }
    }

    fn handle_dirty_audio_node_outputs(&mut self) {
        let mut outputs: Vec<_> = self.dirty_audio_node_outputs.drain().collect();
        outputs.sort_unstable();

        for output in outputs {
            self.update_number_of_channels(output);
        }
    }

    fn update_automatic_pull_nodes(&mut self, graph: &mut RenderGraph) {
        if !self.automatic_pull_nodes_need_updating {
            return;
        }
        let mut nodes: Vec<_> = self.automatic_pull_nodes.iter().copied().collect();
        nodes.sort_unstable();
        graph.set_automatic_pull_nodes(nodes);
        self.automatic_pull_nodes_need_updating = false;
    }

    fn update_render_nodes(&mut self, graph: &mut RenderGraph) {
        for id in self.render_updates.drain() {
            let Some(entry) = self.nodes.get(&id) else {
                continue;
            };

            let inputs = entry
                .inputs
                .iter()
                .map(|input| RenderingInput {
                    outputs: sorted(&input.outputs),
                    number_of_channels: input.computed_number_of_channels,
                })
                .collect();
            let output_channels = entry.outputs.iter().map(|o| o.number_of_channels).collect();
            let params = entry.params.iter().map(|p| sorted(&p.outputs)).collect();

            graph.update_layout(
                id,
                inputs,
                output_channels,
                params,
                entry.channel_interpretation,
            );
        }
    }

    // ---------------------------------------------------------------------------------------
    // source nodes

    /// A source started playing: it holds a connection reference on itself until it finishes
    pub fn notify_source_node_started_processing(&mut self, id: AudioNodeId) {
        let Some(handler) = self.handler(id) else {
            return;
        };
        if self.active_source_nodes.insert(id) {
            handler.make_connection(self);
        }
    }

    /// Finish sources that are known to have played out, see
    /// [`AudioProcessor::handle_stoppable_source`]
    pub fn handle_stoppable_source_nodes(
        &mut self,
        graph: &mut RenderGraph,
        scope: &RenderScope,
        finished: &mut Vec<AudioNodeId>,
    ) {
        let mut active: Vec<_> = self.active_source_nodes.iter().copied().collect();
        active.sort_unstable();

        for id in active {
            if graph.handle_stoppable_source(id, scope) {
                finished.push(id);
            }
        }
    }

    /// Drop the connection reference of sources that finished playing
    pub fn release_finished_source_nodes(&mut self, finished: &mut Vec<AudioNodeId>) {
        for id in finished.drain(..) {
            self.release_source_node(id);
        }
    }

    /// Drop the connection reference of a source, if it is still active
    pub fn release_source_node(&mut self, id: AudioNodeId) {
        if !self.active_source_nodes.remove(&id) {
            return;
        }
        if let Some(handler) = self.handler(id) {
            handler.break_connection_with_lock(self);
        }
        self.collection_requested = true;
    }

    /// Drop the connection reference of all active sources, e.g. when the context is closed
    pub fn release_active_source_nodes(&mut self) {
        let mut active: Vec<_> = self.active_source_nodes.iter().copied().collect();
        active.sort_unstable();
        for id in active {
            self.release_source_node(id);
        }
    }

    pub fn is_active_source_node(&self, id: AudioNodeId) -> bool {
        self.active_source_nodes.contains(&id)
    }

    // ---------------------------------------------------------------------------------------
    // lifetime

    pub fn collection_requested(&self) -> bool {
        self.collection_requested
    }

    /// The owning `AudioNode` of a handler was dropped
    pub fn mark_node_dropped(&mut self, id: AudioNodeId) {
        if let Some(entry) = self.nodes.get_mut(&id) {
            entry.node_alive = false;
        }
        self.collect_garbage();
    }

    /// Dispose all nodes that are no longer reachable
    ///
    /// Roots are nodes with a live `AudioNode`, active sources and the destination. Everything
    /// downstream of a root (through node inputs or params) stays alive.
    pub fn collect_garbage(&mut self) {
        self.collection_requested = false;

        let mut stack: Vec<AudioNodeId> = self
            .nodes
            .iter()
            .filter(|(id, entry)| {
                entry.node_alive
                    || **id == DESTINATION_NODE_ID
                    || self.active_source_nodes.contains(id)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut reachable = FxHashSet::default();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(entry) = self.nodes.get(&id) {
                for output in &entry.outputs {
                    stack.extend(output.inputs.iter().map(|i| i.node));
                    stack.extend(output.params.iter().map(|p| p.node));
                }
            }
        }

        let mut garbage: Vec<_> = self
            .nodes
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        if garbage.is_empty() {
            return;
        }
        garbage.sort_unstable();

        // edges into garbage nodes only come from other garbage nodes, cut them all first
        for &id in &garbage {
            let number_of_outputs = self.node(id).outputs.len();
            for index in 0..number_of_outputs {
                self.disconnect_all(OutputRef::new(id, index));
            }
        }

        for id in garbage {
            self.dispose(id);
        }
    }

    /// Remove a node from the topology. Its handler becomes a rendering orphan until the render
    /// thread has released its render state.
    fn dispose(&mut self, id: AudioNodeId) {
        log::debug!("dispose node {:?}", id);

        self.changed_channel_count_mode.remove(&id);
        self.changed_channel_interpretation.remove(&id);
        if self.automatic_pull_nodes.remove(&id) {
            self.automatic_pull_nodes_need_updating = true;
        }
        self.dirty_summing_junctions.retain(|j| j.node() != id);
        self.dirty_audio_node_outputs.retain(|o| o.node != id);
        self.render_updates.remove(&id);

        let Some(entry) = self.nodes.remove(&id) else {
            return;
        };

        // never handed to the render thread, release right away
        let pending = self
            .pending_render_nodes
            .iter()
            .position(|p| p.handler.id() == id);
        if let Some(position) = pending {
            let pending = self.pending_render_nodes.swap_remove(position);
            let orphan = DeletableOrphan {
                handler: pending.handler,
                processor: Some(pending.processor),
            };
            // the receiver only goes away with the context
            let _ = self.deletable_orphans.send(orphan);
            return;
        }

        self.rendering_orphan_handlers.push(entry.handler);
    }

    #[cfg(test)]
    pub fn rendering_orphan_count(&self) -> usize {
        self.rendering_orphan_handlers.len()
    }

    /// Release the render state of all rendering orphans and hand them to the control thread
    ///
    /// Render thread only: after this call the render graph holds no trace of these nodes.
    pub fn request_to_delete_handlers_on_main_thread(&mut self, graph: &mut RenderGraph) {
        for handler in self.rendering_orphan_handlers.drain(..) {
            let processor = graph.remove_node(handler.id());
            let orphan = DeletableOrphan { handler, processor };
            let _ = self.deletable_orphans.send(orphan);
        }
    }

    /// Clear the context back-references of all orphans, the context is going away
    pub fn context_will_be_destroyed(&mut self) {
        self.rendering_orphan_handlers
            .iter()
            .for_each(|handler| handler.clear_context());
        self.pending_render_nodes
            .iter()
            .for_each(|pending| pending.handler.clear_context());
        self.nodes
            .values()
            .for_each(|entry| entry.handler.clear_context());
    }
}
