use crate::context::AudioNodeId;
use crate::render::graph::RenderNode;

use std::cell::RefCell;

/// Render nodes indexed by (recycled, hence densely packed) node id
pub(crate) struct NodeCollection {
    nodes: Vec<Option<RefCell<RenderNode>>>,
}

impl NodeCollection {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut instance = Self {
            nodes: Vec::with_capacity(capacity),
        };
        instance.ensure_capacity(capacity);
        instance
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    #[inline(always)]
    fn ensure_capacity(&mut self, new_len: usize) {
        self.nodes
            .resize_with(new_len.max(self.nodes.len()), || None);
    }

    #[inline(always)]
    pub fn insert(&mut self, index: AudioNodeId, value: RefCell<RenderNode>) {
        let index = index.index();
        self.ensure_capacity(index + 1);
        self.nodes[index] = Some(value);
    }

    #[inline(always)]
    pub fn remove(&mut self, index: AudioNodeId) -> Option<RefCell<RenderNode>> {
        self.nodes.get_mut(index.index()).and_then(Option::take)
    }

    #[cfg(test)]
    pub fn contains(&self, index: AudioNodeId) -> bool {
        self.get(index).is_some()
    }

    #[inline(always)]
    pub fn get(&self, index: AudioNodeId) -> Option<&RefCell<RenderNode>> {
        self.nodes.get(index.index()).and_then(Option::as_ref)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, index: AudioNodeId) -> Option<&mut RefCell<RenderNode>> {
        self.nodes.get_mut(index.index()).and_then(Option::as_mut)
    }
}
