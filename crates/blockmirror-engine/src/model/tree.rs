use std::collections::HashMap;

use log::warn;

use crate::error::ModelError;
use crate::model::block::{Block, BlockId};
use crate::model::editability::EditabilitySummary;
use crate::model::kind::{BlockKind, ListKind};
use crate::model::record::RecordNode;

/// Arena owning every block of a page.
///
/// Children are ordered id lists on their parent; the parent link is a plain
/// id, so there are no ownership cycles and renaming an id only touches the
/// two neighbouring levels.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    blocks: HashMap<BlockId, Block>,
    roots: Vec<BlockId>,
    next_temp: u64,
}

impl BlockTree {
    pub fn new() -> Self {
        Self {
            next_temp: 1,
            ..Self::default()
        }
    }

    /// Build a tree from fetched records, collecting the editability summary.
    pub fn from_records(nodes: &[RecordNode]) -> Result<(Self, EditabilitySummary), ModelError> {
        let mut tree = Self::new();
        let mut summary = EditabilitySummary::default();
        for node in nodes {
            tree.load_node(None, node, &mut summary)?;
        }
        tree.renumber();
        Ok((tree, summary))
    }

    fn load_node(
        &mut self,
        parent: Option<&BlockId>,
        node: &RecordNode,
        summary: &mut EditabilitySummary,
    ) -> Result<(), ModelError> {
        let block = Block::from_remote(node.record.clone())?;
        summary.record(&block);
        let id = block.id.clone();
        match parent {
            Some(parent) => self.add_child(parent, block)?,
            None => self.insert_root(block)?,
        }
        for child in &node.children {
            self.load_node(Some(&id), child, summary)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn roots(&self) -> &[BlockId] {
        &self.roots
    }

    /// Siblings of `id` in order, including `id` itself
    pub fn siblings(&self, id: &BlockId) -> &[BlockId] {
        match self.get(id).and_then(|b| b.parent.as_ref()) {
            Some(parent) => self
                .get(parent)
                .map(|p| p.children.as_slice())
                .unwrap_or_default(),
            None => &self.roots,
        }
    }

    /// Peek at the next placeholder id without reserving it
    pub fn next_temp_id(&self) -> u64 {
        self.next_temp.max(1)
    }

    /// Make sure future placeholders never collide with `id`
    pub fn reserve_temp(&mut self, id: &BlockId) {
        if let BlockId::Temp(n) = id {
            self.next_temp = self.next_temp.max(n + 1);
        }
    }

    pub fn alloc_temp(&mut self) -> BlockId {
        let id = BlockId::Temp(self.next_temp_id());
        self.reserve_temp(&id);
        id
    }

    pub fn insert_root(&mut self, block: Block) -> Result<(), ModelError> {
        let index = self.roots.len();
        self.insert_root_at(index, block)
    }

    pub fn insert_root_at(&mut self, index: usize, mut block: Block) -> Result<(), ModelError> {
        if self.contains(&block.id) {
            return Err(ModelError::DuplicateId(block.id));
        }
        block.parent = None;
        block.depth = 0;
        self.reserve_temp(&block.id);
        self.roots.insert(index.min(self.roots.len()), block.id.clone());
        self.blocks.insert(block.id.clone(), block);
        Ok(())
    }

    /// Insert a top-level block right after `after` (or first when `None`).
    pub fn insert_root_after(
        &mut self,
        after: Option<&BlockId>,
        block: Block,
    ) -> Result<(), ModelError> {
        let index = match after {
            Some(after) => {
                let pos = self
                    .roots
                    .iter()
                    .position(|r| r == after)
                    .ok_or_else(|| ModelError::NotTopLevel(after.clone()))?;
                pos + 1
            }
            None => 0,
        };
        self.insert_root_at(index, block)
    }

    pub fn add_child(&mut self, parent: &BlockId, block: Block) -> Result<(), ModelError> {
        let index = self.get(parent).map_or(0, |p| p.children.len());
        self.add_child_at(parent, index, block)
    }

    pub fn add_child_at(
        &mut self,
        parent: &BlockId,
        index: usize,
        mut block: Block,
    ) -> Result<(), ModelError> {
        if self.contains(&block.id) {
            return Err(ModelError::DuplicateId(block.id));
        }
        let parent_block = self
            .blocks
            .get_mut(parent)
            .ok_or_else(|| ModelError::UnknownBlock(parent.clone()))?;
        // Remote content may already nest under kinds we render read-only; only
        // local additions are held to the registry's child support.
        if block.id.is_temp() && !parent_block.supports_children() {
            return Err(ModelError::ChildrenNotSupported {
                parent: parent.clone(),
                type_name: parent_block.kind.tag().to_string(),
            });
        }
        let index = index.min(parent_block.children.len());
        parent_block.children.insert(index, block.id.clone());
        block.depth = parent_block.depth + 1;
        block.parent = Some(parent.clone());
        self.reserve_temp(&block.id);
        self.blocks.insert(block.id.clone(), block);
        Ok(())
    }

    /// Detach `id` and everything below it, returning the removed blocks.
    pub fn remove_subtree(&mut self, id: &BlockId) -> Vec<Block> {
        let Some(block) = self.blocks.get(id) else {
            return Vec::new();
        };
        match block.parent.clone() {
            Some(parent) => {
                if let Some(parent) = self.blocks.get_mut(&parent) {
                    parent.children.retain(|c| c != id);
                }
            }
            None => self.roots.retain(|r| r != id),
        }
        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(block) = self.blocks.remove(&next) {
                stack.extend(block.children.iter().cloned());
                removed.push(block);
            }
        }
        removed
    }

    /// Replace `old` with `new` everywhere it is referenced.
    pub fn rename(&mut self, old: &BlockId, new: BlockId) -> Result<(), ModelError> {
        if old == &new {
            return Ok(());
        }
        if self.contains(&new) {
            return Err(ModelError::DuplicateId(new));
        }
        let mut block = self
            .blocks
            .remove(old)
            .ok_or_else(|| ModelError::UnknownBlock(old.clone()))?;
        block.id = new.clone();
        let slots = match &block.parent {
            Some(parent) => self.blocks.get_mut(parent).map(|p| &mut p.children),
            None => Some(&mut self.roots),
        };
        if let Some(slot) = slots.and_then(|s| s.iter_mut().find(|c| **c == *old)) {
            *slot = new.clone();
        }
        for child in &block.children {
            if let Some(child) = self.blocks.get_mut(child) {
                child.parent = Some(new.clone());
            }
        }
        self.reserve_temp(&new);
        self.blocks.insert(new, block);
        Ok(())
    }

    /// Pre-order traversal, i.e. document order
    pub fn walk(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<&BlockId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id.clone());
            if let Some(block) = self.blocks.get(id) {
                stack.extend(block.children.iter().rev());
            }
        }
        out
    }

    /// Every block strictly below `id`, in document order
    pub fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack: Vec<&BlockId> = self
            .get(id)
            .map(|b| b.children.iter().rev().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            out.push(next.clone());
            if let Some(block) = self.blocks.get(next) {
                stack.extend(block.children.iter().rev());
            }
        }
        out
    }

    pub fn ancestors(&self, id: &BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|b| b.parent.clone());
        while let Some(parent) = current {
            current = self.get(&parent).and_then(|b| b.parent.clone());
            out.push(parent);
        }
        out
    }

    /// Recompute display ordinals of consecutive numbered list items.
    pub fn renumber(&mut self) {
        let mut lists: Vec<Vec<BlockId>> = vec![self.roots.clone()];
        lists.extend(self.blocks.values().map(|b| b.children.clone()));
        for siblings in lists {
            let mut counter = 0;
            for id in siblings {
                let Some(block) = self.blocks.get_mut(&id) else {
                    continue;
                };
                match &mut block.kind {
                    BlockKind::ListItem {
                        kind: ListKind::Numbered,
                        number,
                    } => {
                        counter += 1;
                        *number = Some(counter);
                        if let BlockKind::ListItem { number: synced, .. } = &mut block.synced_kind {
                            *synced = Some(counter);
                        }
                    }
                    _ => counter = 0,
                }
            }
        }
    }

    /// Check parent/child/depth consistency, returning every violation found.
    pub fn validate(&self) -> Vec<ModelError> {
        let mut problems = Vec::new();
        for root in &self.roots {
            match self.get(root) {
                Some(block) if block.parent.is_some() || block.depth != 0 => {
                    problems.push(ModelError::Inconsistent(root.clone()));
                }
                None => problems.push(ModelError::UnknownBlock(root.clone())),
                _ => {}
            }
        }
        for block in self.blocks.values() {
            for child in &block.children {
                match self.get(child) {
                    Some(c) if c.parent.as_ref() != Some(&block.id) || c.depth != block.depth + 1 => {
                        problems.push(ModelError::Inconsistent(child.clone()));
                    }
                    None => problems.push(ModelError::UnknownBlock(child.clone())),
                    _ => {}
                }
            }
        }
        for problem in &problems {
            warn!("block tree invariant violated: {problem}");
        }
        problems
    }
}
