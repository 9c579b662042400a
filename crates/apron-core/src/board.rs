use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info};

use crate::filter::{DateField, FilterSpec, filter_jobs};
use crate::gate::{RequestGate, RequestTicket};
use crate::response::NormalizedResponse;
use crate::task::{TaskId, TaskNode, View};
use crate::tree::{TreeOptions, build_tree_with};

/// State behind one "My Jobs" listing: the active view, the forest from the
/// latest accepted fetch, the filter, and which nodes are expanded.
///
/// Owned by the caller and passed by reference; the tree and filter
/// functions it drives stay pure.
#[derive(Debug)]
pub struct JobBoard {
    view: View,
    gate: RequestGate,
    tree_options: TreeOptions,
    forest: Vec<TaskNode>,
    total_count: usize,
    metadata: BTreeMap<String, Value>,
    spec: FilterSpec,
    expanded: BTreeSet<TaskId>,
}

impl JobBoard {
    pub fn new(view: View) -> Self {
        Self {
            view,
            gate: RequestGate::new(),
            tree_options: TreeOptions::default(),
            forest: Vec::new(),
            total_count: 0,
            metadata: BTreeMap::new(),
            spec: FilterSpec::for_view(view),
            expanded: BTreeSet::new(),
        }
    }

    pub fn with_tree_options(mut self, options: TreeOptions) -> Self {
        self.tree_options = options;
        self
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn forest(&self) -> &[TaskNode] {
        &self.forest
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn begin_fetch(&self) -> RequestTicket {
        self.gate.begin()
    }

    /// Installs a fetched response if `ticket` is still the latest one.
    /// Returns whether it was applied.
    #[tracing::instrument(skip(self, response), fields(view = %self.view, generation = ticket.generation()))]
    pub fn apply(&mut self, ticket: RequestTicket, response: NormalizedResponse) -> bool {
        let Some(response) = self.gate.accept(ticket, response) else {
            return false;
        };

        let NormalizedResponse {
            tasks,
            total_count,
            metadata,
        } = response;
        self.forest = build_tree_with(tasks, self.tree_options);
        self.total_count = total_count;
        self.metadata = metadata;
        self.expanded.clear();
        info!(roots = self.forest.len(), total_count, "applied task list");
        true
    }

    /// Switches tab. Data for the previous view is discarded, and any fetch
    /// still in flight for it will be rejected by [`JobBoard::apply`].
    pub fn switch_view(&mut self, view: View) {
        if view == self.view {
            return;
        }
        debug!(from = %self.view, to = %view, "switching view");
        self.gate.invalidate();
        self.view = view;
        self.forest.clear();
        self.total_count = 0;
        self.metadata.clear();
        self.expanded.clear();
        self.spec.date_field = DateField::for_view(view);
    }

    /// Replaces the filter. The date field always follows the view.
    pub fn set_filter(&mut self, mut spec: FilterSpec) {
        spec.date_field = DateField::for_view(self.view);
        self.spec = spec;
    }

    pub fn visible(&self) -> Vec<TaskNode> {
        filter_jobs(&self.forest, &self.spec)
    }

    /// Flips the expanded state of `id`; returns the new state.
    pub fn toggle_expanded(&mut self, id: &TaskId) -> bool {
        if self.expanded.remove(id) {
            false
        } else {
            self.expanded.insert(id.clone());
            true
        }
    }

    pub fn is_expanded(&self, id: &TaskId) -> bool {
        self.expanded.contains(id)
    }
}
