use std::collections::HashSet;
use std::ops::Range;
use std::time::Instant;

use log::{debug, info, warn};

use crate::editing::mapping::owned_line_count;
use crate::editing::{Cmd, Debouncer, Document, Patch, RangeMapping, RefreshReport, TextHost};
use crate::error::{MappingError, Result};
use crate::model::{Block, BlockId, BlockKind, BlockTree, EditabilitySummary, RecordNode, RemoteRecord};
use crate::options::SyncOptions;
use crate::sync::orphans::{Detection, detect_orphans};
use crate::sync::plan::{CreateOp, Plan};
use crate::sync::planner::{build_plan, pending_create};

/// Everything the engine knows about one open page.
///
/// Created when a page is opened and dropped when it closes; nothing about a
/// page lives anywhere else.
#[derive(Debug)]
pub struct SyncSession<H: TextHost = Document> {
    page_id: String,
    title: String,
    host: H,
    tree: BlockTree,
    mapping: RangeMapping,
    options: SyncOptions,
    editability: EditabilitySummary,
    /// Bumped on every edit; a run compares it to notice edits made meanwhile
    generation: u64,
    debouncer: Debouncer,
}

impl<H: TextHost> SyncSession<H> {
    /// Build the tree from pulled records and render it into `host`.
    pub fn open(
        page_id: impl Into<String>,
        title: impl Into<String>,
        records: &[RecordNode],
        host: H,
        options: SyncOptions,
    ) -> Result<Self> {
        let (tree, editability) = BlockTree::from_records(records)?;
        if !editability.is_fully_editable() {
            info!("{}", editability.describe());
        }
        tree.validate();
        let mut session = Self {
            page_id: page_id.into(),
            title: title.into(),
            host,
            tree,
            mapping: RangeMapping::new(),
            debouncer: Debouncer::new(options.debounce),
            options,
            editability,
            generation: 0,
        };
        session.render()?;
        Ok(session)
    }

    /// Replace the host text with the rendered tree and re-anchor every block.
    pub fn render(&mut self) -> std::result::Result<(), MappingError> {
        let indent = self.options.indent_width;
        let header = self.options.header_lines;
        let mut text = String::new();
        if header > 0 {
            text.push_str(&self.title.replace('\n', " "));
            text.push('\n');
            text.push_str(&"\n".repeat(header - 1));
        }

        let mut spans = Vec::with_capacity(self.tree.len());
        let mut line = header;
        for id in self.tree.walk() {
            let Some(block) = self.tree.get(&id) else {
                continue;
            };
            let lines = block.render(block.depth(), indent);
            spans.push((id, line..line + lines.len()));
            line += lines.len();
            for l in lines {
                text.push_str(&l);
                text.push('\n');
            }
        }

        self.host.reset(&text);
        self.mapping.clear();
        for (id, lines) in spans {
            self.mapping.bind(&mut self.host, id, lines)?;
        }
        self.mapping.refresh(&self.tree, &self.host);
        self.generation += 1;
        debug!("rendered {} blocks into {line} lines", self.tree.len());
        Ok(())
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn mapping(&self) -> &RangeMapping {
        &self.mapping
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn editability(&self) -> &EditabilitySummary {
        &self.editability
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lines(&self) -> Vec<String> {
        self.host.lines(0..self.host.line_count())
    }

    /// Record an edit the host made to its text.
    pub fn notify_edit(&mut self, changed_lines: &[Range<usize>]) {
        self.generation += 1;
        self.mapping.note_edit(&self.host, changed_lines);
        self.debouncer.touch(Instant::now());
    }

    /// Idle hook: once edits have settled, re-parse the blocks they touched.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.debouncer.take_due(now) {
            return false;
        }
        self.refresh();
        let touched = self.mapping.take_touched();
        self.reparse(Some(&touched));
        true
    }

    /// The user left edit mode: bring every block up to date now.
    pub fn leave_edit_mode(&mut self) {
        self.debouncer.cancel();
        self.refresh();
        self.mapping.take_touched();
        self.reparse(None);
    }

    pub fn refresh(&mut self) -> RefreshReport {
        self.mapping.refresh(&self.tree, &self.host)
    }

    /// Re-read blocks from their current lines; all of them when `only` is `None`.
    ///
    /// Lines a block's anchor picked up that do not belong to it are handed
    /// back (the anchor shrinks) so orphan detection sees them. Returns how
    /// many blocks changed.
    pub fn reparse(&mut self, only: Option<&HashSet<BlockId>>) -> usize {
        let indent = self.options.indent_width;
        let mut changed = 0;
        for id in self.tree.walk() {
            if only.is_some_and(|set| !set.contains(&id)) {
                continue;
            }
            let (Some(range), Some(block)) = (self.mapping.range(&id), self.tree.get(&id)) else {
                continue;
            };
            if !block.is_editable() {
                continue;
            }
            let depth = block.depth();
            let lines = self.host.lines(range.clone());
            let keep = owned_line_count(&lines, depth, indent, self.mapping.expected_lines(&id));
            if keep < lines.len() {
                let kept = range.start..range.start + keep;
                if let Err(err) = self.mapping.bind(&mut self.host, id.clone(), kept) {
                    warn!("could not shrink anchor of {id}: {err}");
                    continue;
                }
            } else {
                self.mapping.set_expected(&id, keep);
            }
            if let Some(block) = self.tree.get_mut(&id)
                && block.parse(&lines[..keep], depth, indent)
            {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!("re-parsed {changed} changed blocks");
        }
        changed
    }

    pub fn detect(&self) -> Detection {
        detect_orphans(&self.host, &self.tree, &self.mapping, &self.options)
    }

    /// The plan a sync would execute right now. Refreshes and re-parses, but
    /// sends nothing and leaves the tree shape alone.
    pub fn preview(&mut self) -> Plan {
        self.refresh();
        self.mapping.take_touched();
        self.reparse(None);
        let detection = self.detect();
        build_plan(&self.tree, &self.mapping, &detection)
    }

    /// Insert a detected region into the tree as a temporary block.
    pub(crate) fn materialize(&mut self, op: &CreateOp) -> std::result::Result<(), MappingError> {
        let Some(lines) = op.lines.clone() else {
            return Ok(());
        };
        let block = Block::new_local(op.temp_id.clone(), op.kind.clone(), op.content.clone());
        self.mapping.add_block(
            &mut self.tree,
            &mut self.host,
            block,
            op.parent_block_id.as_ref(),
            lines,
        )?;
        Ok(())
    }

    /// The remote service now holds `kind`/`text` for `id`; false when the block is gone.
    pub(crate) fn acknowledge(
        &mut self,
        id: &BlockId,
        kind: &BlockKind,
        text: &str,
        record: RemoteRecord,
    ) -> bool {
        match self.tree.get_mut(id) {
            Some(block) => {
                block.acknowledge(kind.clone(), text.to_string(), record);
                true
            }
            None => {
                debug!("ignoring result for {id}: block no longer exists");
                false
            }
        }
    }

    /// Drop a deleted block and its descendants from tree and mapping.
    pub(crate) fn forget_subtree(&mut self, id: &BlockId) -> usize {
        let removed = self.tree.remove_subtree(id);
        for block in &removed {
            self.mapping.unbind(&mut self.host, block.id());
        }
        removed.len()
    }

    /// Drop local-only blocks whose lines were deleted, with their subtrees.
    ///
    /// Surviving lines of removed children become orphans again. Returns how
    /// many blocks were removed.
    pub fn prune_missing_local(&mut self) -> usize {
        let dead: Vec<BlockId> = self
            .tree
            .walk()
            .into_iter()
            .filter(|id| id.is_temp() && self.mapping.is_missing(id))
            .collect();
        let mut removed = 0;
        for id in dead {
            if self.tree.contains(&id) {
                removed += self.forget_subtree(&id);
            }
        }
        if removed > 0 {
            debug!("pruned {removed} local blocks whose lines are gone");
        }
        removed
    }

    /// Give a created block its real id and mark it synced.
    pub(crate) fn finish_create(
        &mut self,
        temp: &BlockId,
        real: &str,
        kind: &BlockKind,
        text: &str,
        record: RemoteRecord,
    ) -> bool {
        if !self.tree.contains(temp) {
            debug!("ignoring create result for {temp}: block no longer exists");
            return false;
        }
        let real = BlockId::Remote(real.to_string());
        if let Err(err) = self.tree.rename(temp, real.clone()) {
            warn!("could not record real id for {temp}: {err}");
            return false;
        }
        self.mapping.rename(temp, &real);
        self.acknowledge(&real, kind, text, record)
    }

    /// Remote parent and insertion point that put a re-created `id` where it is now.
    ///
    /// `None` when the block is gone or its parent has no remote id.
    pub(crate) fn position_of(&self, id: &BlockId) -> Option<(String, Option<String>)> {
        let block = self.tree.get(id)?;
        let parent = match block.parent() {
            Some(parent) => parent.remote()?.to_string(),
            None => self.page_id.clone(),
        };
        let after = self
            .tree
            .siblings(id)
            .iter()
            .take_while(|s| *s != id)
            .filter_map(BlockId::remote)
            .last()
            .map(str::to_string);
        Some((parent, after))
    }

    /// The old block was deleted remotely: it and its (cascade-deleted)
    /// descendants become temporary until re-created.
    ///
    /// Returns the block's temporary id and the creates that restore its
    /// descendants, parents first.
    pub(crate) fn detach_for_type_change(&mut self, id: &BlockId) -> Option<(BlockId, Vec<BlockId>)> {
        if !self.tree.contains(id) {
            return None;
        }
        let mut requeued = Vec::new();
        for descendant in self.tree.descendants(id) {
            if descendant.is_temp() {
                continue;
            }
            let temp = self.retire_id(&descendant)?;
            requeued.push(temp);
        }
        let temp = self.retire_id(id)?;
        Some((temp, requeued))
    }

    fn retire_id(&mut self, id: &BlockId) -> Option<BlockId> {
        let temp = self.tree.alloc_temp();
        if let Err(err) = self.tree.rename(id, temp.clone()) {
            warn!("could not retire id {id}: {err}");
            return None;
        }
        self.mapping.rename(id, &temp);
        if let Some(block) = self.tree.get_mut(&temp) {
            block.recompute_dirty();
        }
        Some(temp)
    }

    /// Creates restoring blocks that exist only locally
    pub(crate) fn pending_creates(&self, ids: &[BlockId]) -> Vec<CreateOp> {
        ids.iter()
            .filter_map(|id| self.tree.get(id))
            .filter(|block| block.kind().is_creatable())
            .map(|block| pending_create(&self.tree, &self.mapping, block))
            .collect()
    }

    pub(crate) fn cancel_debounce(&mut self) {
        self.debouncer.cancel();
    }

    pub(crate) fn renumber(&mut self) {
        self.tree.renumber();
    }
}

impl SyncSession<Document> {
    /// Apply an edit to the built-in document and record it.
    pub fn apply(&mut self, cmd: Cmd) -> Patch {
        let patch = self.host.apply(cmd);
        self.notify_edit(&patch.changed_lines);
        patch
    }

    pub fn text(&self) -> String {
        self.host.text()
    }
}
