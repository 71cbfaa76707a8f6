// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::tool::Tool;

/// Central registry holding every available tool, keyed by canonical id.
///
/// Registration happens during initialization; afterwards the registry is
/// read-only, which is what makes sharing it across concurrent runs safe.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Re-registering an id overwrites the previous entry
    /// and logs a warning — silent replacement has hidden more than one
    /// wiring bug.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        if self.tools.insert(id.clone(), tool).is_some() {
            warn!(tool_id = %id, "re-registered tool overwrites existing entry");
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// All tools, sorted by id for deterministic manifests.
    pub fn get_all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.id().cmp(b.id()));
        tools
    }

    /// Tools for the given ids, in id-list order, silently skipping misses.
    pub fn get_by_ids(&self, ids: &[String]) -> Vec<Arc<dyn Tool>> {
        ids.iter()
            .filter_map(|id| self.tools.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
