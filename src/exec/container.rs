use tracing::debug;

use super::processor::ProcessorId;
use super::sink::{ResultSink, SinkFactory};
use super::statement::Statement;
use super::types::{ExecResult, Statistics};

const TOOLTIP_MAX_CHARS: usize = 1000;

/// One addressable result slot: a tab in the results pane.
///
/// Back-references are indices, never live references: the owning coordinator
/// is identified by id, and this container by its global tab index, so
/// disposal ordering cannot dangle.
pub struct ResultsContainer {
    processor: ProcessorId,
    result_set_index: usize,
    tab_index: usize,
    pinned: bool,
    query: Option<Statement>,
    last_good_query: Option<Statement>,
    /// Set when this container shows a pivoted sub-view instead of a
    /// statement's own results.
    data_source: Option<String>,
    tab_name: Option<String>,
    user_named: bool,
    sink: Box<dyn ResultSink>,
}

impl ResultsContainer {
    fn new(
        processor: ProcessorId,
        result_set_index: usize,
        tab_index: usize,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        Self {
            processor,
            result_set_index,
            tab_index,
            pinned: false,
            query: None,
            last_good_query: None,
            data_source: None,
            tab_name: None,
            user_named: false,
            sink,
        }
    }

    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    pub fn result_set_index(&self) -> usize {
        self.result_set_index
    }

    pub fn tab_index(&self) -> usize {
        self.tab_index
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    pub fn query(&self) -> Option<&Statement> {
        self.query.as_ref()
    }

    pub fn last_good_query(&self) -> Option<&Statement> {
        self.last_good_query.as_ref()
    }

    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    pub fn tab_name(&self) -> Option<&str> {
        self.tab_name.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.sink.is_dirty()
    }

    pub fn has_data(&self) -> bool {
        self.sink.has_data()
    }

    pub fn sink_mut(&mut self) -> &mut dyn ResultSink {
        self.sink.as_mut()
    }

    /// Bind the statement that is about to stream into this container.
    /// `last_good_query` is only advanced once the statement completes
    /// without error, see [`mark_good`](Self::mark_good).
    pub(crate) fn bind_query(&mut self, statement: Statement) {
        let tooltip = truncate(statement.text(), TOOLTIP_MAX_CHARS);
        self.query = Some(statement);
        let name = self.tab_name.clone();
        self.sink
            .update_name(name.as_deref().unwrap_or(""), Some(&tooltip));
    }

    pub(crate) fn mark_good(&mut self) {
        self.last_good_query = self.query.clone();
    }

    /// Assign a result-set name unless the user already set one by hand.
    pub(crate) fn update_results_name(&mut self, name: &str, user_assigned: bool) {
        if self.user_named && !user_assigned {
            return;
        }
        self.tab_name = Some(name.to_string());
        self.user_named = user_assigned;
        self.sink.update_name(name, None);
    }

    pub(crate) fn apply_statistics(&mut self, statistics: &Statistics) {
        self.sink.set_statistics(statistics);
    }
}

/// Ordered container collection for one coordinator. Indices within one
/// statement stay contiguous from zero; removal renumbers survivors.
pub struct ContainerList {
    containers: Vec<ResultsContainer>,
}

impl ContainerList {
    /// Creates the list with its default container (index 0), which exists
    /// for the lifetime of the coordinator.
    pub(crate) fn with_default(
        processor: ProcessorId,
        factory: &mut dyn SinkFactory,
        next_tab_index: &mut usize,
    ) -> ExecResult<Self> {
        let mut list = Self {
            containers: Vec::new(),
        };
        list.append(processor, 0, factory, next_tab_index)?;
        Ok(list)
    }

    fn append(
        &mut self,
        processor: ProcessorId,
        result_set_index: usize,
        factory: &mut dyn SinkFactory,
        next_tab_index: &mut usize,
    ) -> ExecResult<usize> {
        // Sink creation first: if it fails, no container is registered.
        let tab_index = *next_tab_index;
        let sink = factory.create_sink(tab_index)?;
        *next_tab_index += 1;
        self.containers.push(ResultsContainer::new(
            processor,
            result_set_index,
            tab_index,
            sink,
        ));
        Ok(self.containers.len() - 1)
    }

    /// Containers that show statement results, excluding data-source views.
    fn statement_container_count(&self) -> usize {
        self.containers
            .iter()
            .filter(|c| c.data_source.is_none())
            .count()
    }

    /// Container holding the given result-set index of the statement stream.
    pub(crate) fn statement_container_mut(
        &mut self,
        result_set_index: usize,
    ) -> Option<&mut ResultsContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.data_source.is_none() && c.result_set_index == result_set_index)
    }

    /// Materialize containers up to and including result-set index `n`.
    /// Requested from a job callback, executed only inside the presentation
    /// pump.
    pub(crate) fn create_for_result_index(
        &mut self,
        processor: ProcessorId,
        n: usize,
        factory: &mut dyn SinkFactory,
        next_tab_index: &mut usize,
    ) -> ExecResult<()> {
        while self.statement_container_count() <= n {
            let index = self.statement_container_count();
            self.append(processor, index, factory, next_tab_index)?;
            debug!(result_set_index = index, "created extra results container");
        }
        Ok(())
    }

    /// Extra container bound to an alternate data source (e.g. a foreign-key
    /// drill-down) instead of a statement.
    pub(crate) fn create_for_data_container(
        &mut self,
        processor: ProcessorId,
        source_name: &str,
        factory: &mut dyn SinkFactory,
        next_tab_index: &mut usize,
    ) -> ExecResult<usize> {
        let index = self.statement_container_count();
        let pos = self.append(processor, index, factory, next_tab_index)?;
        let container = &mut self.containers[pos];
        container.data_source = Some(source_name.to_string());
        container.update_results_name(source_name, false);
        Ok(container.tab_index)
    }

    /// Detach a container by global tab index. Remaining containers bound to
    /// the same statement are renumbered so their indices stay contiguous
    /// from zero. Returns the removed container so the caller can close its
    /// surface; `None` when the tab index is not ours.
    pub(crate) fn remove(&mut self, tab_index: usize) -> Option<ResultsContainer> {
        let pos = self
            .containers
            .iter()
            .position(|c| c.tab_index == tab_index)?;
        let removed = self.containers.remove(pos);
        if removed.data_source.is_none() {
            for container in &mut self.containers {
                if container.data_source.is_none()
                    && container.result_set_index > removed.result_set_index
                {
                    container.result_set_index -= 1;
                }
            }
        }
        Some(removed)
    }

    pub fn results_for(&self, statement: &Statement) -> Option<&ResultsContainer> {
        self.containers
            .iter()
            .find(|c| c.query.as_ref() == Some(statement))
    }

    pub(crate) fn bound_to_mut<'a>(
        &'a mut self,
        statement: &'a Statement,
    ) -> impl Iterator<Item = &'a mut ResultsContainer> + 'a {
        self.containers
            .iter_mut()
            .filter(move |c| c.query.as_ref() == Some(statement))
    }

    pub fn first(&self) -> &ResultsContainer {
        &self.containers[0]
    }

    pub(crate) fn first_mut(&mut self) -> &mut ResultsContainer {
        &mut self.containers[0]
    }

    pub fn get(&self, index: usize) -> Option<&ResultsContainer> {
        self.containers.get(index)
    }

    pub(crate) fn by_tab_index_mut(&mut self, tab_index: usize) -> Option<&mut ResultsContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.tab_index == tab_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultsContainer> {
        self.containers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ResultsContainer> {
        self.containers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Tab indices of closable extra containers: everything past the default
    /// container that is not pinned.
    pub(crate) fn extra_unpinned_tab_indices(&self) -> Vec<usize> {
        self.containers
            .iter()
            .skip(1)
            .filter(|c| !c.pinned)
            .map(|c| c.tab_index)
            .collect()
    }

    pub fn has_pinned(&self) -> bool {
        self.containers.iter().any(|c| c.pinned)
    }

    pub fn is_dirty(&self) -> bool {
        self.containers.iter().any(|c| c.is_dirty())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
