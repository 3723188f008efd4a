use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::block::Block;
use crate::model::kind::BlockKind;

/// What part of a loaded page can be edited locally.
///
/// Unsupported remote types are counted here instead of failing the load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EditabilitySummary {
    pub total: usize,
    pub read_only: usize,
    /// Unsupported type name -> number of blocks
    pub unsupported_types: BTreeMap<String, usize>,
}

impl EditabilitySummary {
    pub fn record(&mut self, block: &Block) {
        self.total += 1;
        if !block.is_editable() {
            self.read_only += 1;
        }
        if let BlockKind::Unsupported { type_name } = block.kind() {
            *self.unsupported_types.entry(type_name.clone()).or_default() += 1;
        }
    }

    pub fn is_fully_editable(&self) -> bool {
        self.read_only == 0
    }

    /// One-line description suitable for a status line
    pub fn describe(&self) -> String {
        if self.is_fully_editable() {
            return format!("{} blocks, all editable", self.total);
        }
        let mut out = format!("{} blocks, {} read-only", self.total, self.read_only);
        if !self.unsupported_types.is_empty() {
            let names: Vec<String> = self
                .unsupported_types
                .iter()
                .map(|(name, count)| format!("{name} ×{count}"))
                .collect();
            out.push_str(&format!(" (unsupported: {})", names.join(", ")));
        }
        out
    }
}
