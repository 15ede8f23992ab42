//! Mutation Executor: applies a model response and proves it took effect.
//!
//! Two paths with deliberately different trust models:
//! - `DocumentReplacement` swaps markup/stylesheet wholesale and is always
//!   classified applied: the model is obliged to return the complete
//!   document, and we hold it to that claim rather than diffing.
//! - `ImperativeEdit` runs the closed instruction set against an
//!   instrumented capability wrapper, then verifies via before/after
//!   snapshots. No observable change is a `NoEffect` error with a
//!   diagnostic ranked by what the tracker saw.

use pagesmith_document::{Criterion, DocumentAccessor, DocumentError, NodeId};

use crate::client::MutationResult;
use crate::errors::{AssistError, NoEffectDiagnostic};
use crate::instruction::{self, Operation};

/// Mutable counters scoped to a single execution attempt. Created fresh
/// per attempt, discarded after verification; never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModificationTracker {
    pub lookups: usize,
    pub nodes_matched: usize,
    pub nodes_mutated: usize,
    pub errors: Vec<String>,
}

/// Decorator over the real accessor: same capability interface, plus
/// counting. Lookups and mutating setters are instrumented; everything
/// else delegates untouched.
pub struct InstrumentedAccessor<'a, A: DocumentAccessor> {
    inner: &'a mut A,
    selection_scope: Option<NodeId>,
    pub tracker: ModificationTracker,
}

impl<'a, A: DocumentAccessor> InstrumentedAccessor<'a, A> {
    pub fn new(inner: &'a mut A, selection_scope: Option<NodeId>) -> Self {
        Self {
            inner,
            selection_scope,
            tracker: ModificationTracker::default(),
        }
    }

    fn note_mutation(&mut self, result: Result<(), DocumentError>) -> Result<(), DocumentError> {
        if result.is_ok() {
            self.tracker.nodes_mutated += 1;
        }
        result
    }
}

impl<A: DocumentAccessor> DocumentAccessor for InstrumentedAccessor<'_, A> {
    fn markup(&self) -> String {
        self.inner.markup()
    }

    fn stylesheet(&self) -> String {
        self.inner.stylesheet()
    }

    fn set_markup(&mut self, markup: &str) -> Result<(), DocumentError> {
        self.inner.set_markup(markup)
    }

    fn set_stylesheet(&mut self, css: &str) {
        self.inner.set_stylesheet(css);
    }

    fn selected_node(&self) -> Option<NodeId> {
        self.selection_scope.or_else(|| self.inner.selected_node())
    }

    fn find_nodes(&self, criterion: &Criterion) -> Vec<NodeId> {
        if let (Criterion::Selection, Some(scope)) = (criterion, self.selection_scope) {
            return vec![scope];
        }
        self.inner.find_nodes(criterion)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner.attribute(node, name)
    }

    fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        let result = self.inner.set_attribute(node, name, value);
        self.note_mutation(result)
    }

    fn content(&self, node: NodeId) -> Option<String> {
        self.inner.content(node)
    }

    fn set_content(&mut self, node: NodeId, text: &str) -> Result<(), DocumentError> {
        let result = self.inner.set_content(node, text);
        self.note_mutation(result)
    }

    fn style(&self, node: NodeId, property: &str) -> Option<String> {
        self.inner.style(node, property)
    }

    fn set_style(
        &mut self,
        node: NodeId,
        property: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        let result = self.inner.set_style(node, property, value);
        self.note_mutation(result)
    }

    fn element_id(&self, node: NodeId) -> Option<String> {
        self.inner.element_id(node)
    }

    fn classes(&self, node: NodeId) -> Vec<String> {
        self.inner.classes(node)
    }

    fn add_class(&mut self, node: NodeId, class: &str) -> Result<(), DocumentError> {
        let result = self.inner.add_class(node, class);
        self.note_mutation(result)
    }

    fn remove_class(&mut self, node: NodeId, class: &str) -> Result<(), DocumentError> {
        let result = self.inner.remove_class(node, class);
        self.note_mutation(result)
    }

    fn remove(&mut self, node: NodeId) -> Result<(), DocumentError> {
        let result = self.inner.remove(node);
        self.note_mutation(result)
    }

    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    fn flush(&mut self) -> Result<(), DocumentError> {
        self.inner.flush()
    }

    fn mark_pending_assist(&mut self) {
        self.inner.mark_pending_assist();
    }

    fn clear_pending_assist(&mut self) {
        self.inner.clear_pending_assist();
    }

    fn has_pending_assist(&self) -> bool {
        self.inner.has_pending_assist()
    }
}

impl<A: DocumentAccessor> InstrumentedAccessor<'_, A> {
    /// Instrumented lookup used by the interpreter: counts the attempt and
    /// records a descriptive error when nothing matches.
    fn lookup(&mut self, criterion: &Criterion) -> Vec<NodeId> {
        self.tracker.lookups += 1;
        let found = self.find_nodes(criterion);
        if found.is_empty() {
            self.tracker
                .errors
                .push(format!("no elements matched {}", criterion));
        }
        self.tracker.nodes_matched += found.len();
        found
    }
}

/// How the change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Replacement,
    Imperative,
    TextualFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub explanation: String,
    pub path: ExecutionPath,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    markup: String,
    stylesheet: String,
    node_count: usize,
}

impl Snapshot {
    fn take<A: DocumentAccessor>(doc: &A) -> Self {
        Self {
            markup: doc.markup(),
            stylesheet: doc.stylesheet(),
            node_count: doc.node_count(),
        }
    }
}

pub struct Executor;

impl Executor {
    /// Apply a model response. `Ok` means the change observably took
    /// effect; `Err(NoEffect)` and friends feed the fallback path.
    pub fn apply<A: DocumentAccessor>(
        doc: &mut A,
        result: &MutationResult,
        selection_scope: Option<NodeId>,
    ) -> Result<ExecutionOutcome, AssistError> {
        match result {
            MutationResult::DocumentReplacement {
                explanation,
                new_markup,
                new_stylesheet,
            } => Self::apply_replacement(doc, explanation, new_markup, new_stylesheet.as_deref()),
            MutationResult::ImperativeEdit {
                explanation,
                operations,
            } => Self::apply_imperative(doc, explanation, operations, selection_scope),
        }
    }

    fn apply_replacement<A: DocumentAccessor>(
        doc: &mut A,
        explanation: &str,
        new_markup: &str,
        new_stylesheet: Option<&str>,
    ) -> Result<ExecutionOutcome, AssistError> {
        let unchanged = doc.markup() == new_markup;
        doc.set_markup(new_markup)?;
        if let Some(css) = new_stylesheet {
            doc.set_stylesheet(css);
        }
        if unchanged {
            // Trust the model's completeness claim: identical content is
            // still applied, not a failure.
            tracing::debug!("replacement content identical to current document");
        }
        Ok(ExecutionOutcome {
            explanation: explanation.to_string(),
            path: ExecutionPath::Replacement,
            warnings: Vec::new(),
        })
    }

    fn apply_imperative<A: DocumentAccessor>(
        doc: &mut A,
        explanation: &str,
        operations: &serde_json::Value,
        selection_scope: Option<NodeId>,
    ) -> Result<ExecutionOutcome, AssistError> {
        instruction::screen_raw_operations(operations)?;
        let ops = instruction::parse_operations(operations)?;

        for op in &ops {
            if op.is_destructive() {
                tracing::warn!(op = op.kind(), target = %op.target(), "destructive operation requested");
            }
        }

        let before = Snapshot::take(doc);
        let mut accessor = InstrumentedAccessor::new(doc, selection_scope);
        Self::execute_operations(&mut accessor, &ops);
        let tracker = accessor.tracker.clone();
        let after = Snapshot::take(doc);

        for message in &tracker.errors {
            tracing::debug!("operation issue: {message}");
        }

        let applied = after.markup != before.markup
            || after.stylesheet != before.stylesheet
            || after.node_count != before.node_count
            || tracker.nodes_mutated > 0;

        if !applied {
            let diagnostic = if tracker.lookups == 0 {
                NoEffectDiagnostic::NoLookupAttempted
            } else if tracker.nodes_matched == 0 {
                NoEffectDiagnostic::NothingMatched
            } else if tracker.nodes_mutated == 0 {
                NoEffectDiagnostic::MatchedButUnmodified {
                    matched: tracker.nodes_matched,
                }
            } else {
                NoEffectDiagnostic::Unknown
            };
            return Err(AssistError::NoEffect { diagnostic });
        }

        let mut warnings = Vec::new();
        if after.node_count < before.node_count {
            // Removal is permitted; the surrounding editor keeps it undoable.
            tracing::warn!(
                before = before.node_count,
                after = after.node_count,
                "node count decreased during imperative edit"
            );
            warnings.push(format!(
                "removed {} element(s); undo is available",
                before.node_count - after.node_count
            ));
        }

        Ok(ExecutionOutcome {
            explanation: explanation.to_string(),
            path: ExecutionPath::Imperative,
            warnings,
        })
    }

    fn execute_operations<A: DocumentAccessor>(
        accessor: &mut InstrumentedAccessor<'_, A>,
        ops: &[Operation],
    ) {
        for op in ops {
            let targets = accessor.lookup(op.target());
            for node in targets {
                let result = match op {
                    Operation::SetContent { value, .. } => accessor.set_content(node, value),
                    Operation::SetAttribute { name, value, .. } => {
                        accessor.set_attribute(node, name, value)
                    }
                    Operation::SetStyle {
                        property, value, ..
                    } => accessor.set_style(node, property, value),
                    Operation::AddClass { class, .. } => accessor.add_class(node, class),
                    Operation::RemoveClass { class, .. } => accessor.remove_class(node, class),
                    Operation::RemoveNode { .. } => accessor.remove(node),
                    Operation::ClearChildren { .. } => accessor.set_content(node, ""),
                };
                if let Err(err) = result {
                    accessor
                        .tracker
                        .errors
                        .push(format!("{} failed: {}", op.kind(), err));
                }
            }
        }
    }
}
