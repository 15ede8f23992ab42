//! Request Orchestrator: owns the request lifecycle.
//!
//! States: `Idle → AwaitingResponse → {Applying, Failed, Cancelled} → Idle`.
//!
//! One request runs to completion at a time; the only concurrency is that
//! a newer request cancels an older still-pending one (last-request-wins,
//! explicit requests preempt auto-suggestions). Cancellation is
//! cooperative: the token is checked before dispatch, before each retry
//! iteration, and when a response lands. A cancelled request is silent,
//! produces no UI event, and does not consume retry budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use pagesmith_document::{DocumentAccessor, EditableDocument, NodeId};

use crate::client::{
    MutationResult, SaveContent, SuggestionRequest, SuggestionResponse, SuggestionService,
    PersistenceService, QUOTA_ERROR_CODE,
};
use crate::errors::AssistError;
use crate::executor::{ExecutionOutcome, ExecutionPath, Executor};
use crate::fallback::{detect_anchor, FallbackMutator};
use crate::persist::{PersistenceCoordinator, SavePolicy};
use crate::prompt::PromptBuilder;

/// Cooperative cancellation handle shared between a request and whoever
/// supersedes it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Exponential backoff for transient upstream failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base, doubled each
    /// time, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << doublings);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub document_id: String,
    pub device_context: String,
    /// Edit events since the last suggestion required before auto-suggest
    /// fires.
    pub auto_suggest_threshold: u32,
    /// Quiet period after the last edit event before the threshold check
    /// runs.
    pub auto_suggest_debounce: Duration,
    pub retry: RetryPolicy,
    pub save: SavePolicy,
}

impl OrchestratorConfig {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            device_context: String::new(),
            auto_suggest_threshold: 5,
            auto_suggest_debounce: Duration::from_millis(1500),
            retry: RetryPolicy::default(),
            save: SavePolicy::default(),
        }
    }
}

/// Session-scoped conversation state. Owned by the orchestrator, reset
/// when a new document is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub conversation_id: Option<String>,
    pub last_snapshot_fingerprint: u64,
    pub pending_edit_count: u32,
    pub auto_suggest_armed: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            last_snapshot_fingerprint: 0,
            pending_edit_count: 0,
            auto_suggest_armed: true,
        }
    }
}

/// One user action or auto-suggestion trigger. Immutable once sent.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub instruction_text: Option<String>,
    pub selection_scope: Option<NodeId>,
    pub device_context: String,
    pub prior_conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponse,
    Applying,
    Failed,
    Cancelled,
}

/// UI-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistEvent {
    Applied { explanation: String },
    Warning { message: String },
    Failed { message: String },
    /// Distinct event so a dependent quota display can refresh.
    QuotaExhausted,
    Saved { changed: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveDisposition {
    Saved { changed: bool },
    /// Applied but not saved; never conflated with a mutation failure.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistOutcome {
    pub explanation: String,
    pub path: ExecutionPath,
    pub warnings: Vec<String>,
    pub save: SaveDisposition,
}

struct Inner {
    phase: Phase,
    conversation: ConversationState,
    token: CancelToken,
    suggestion_displayed: bool,
    last_edit_at: Option<Instant>,
    last_saved: Option<SaveContent>,
}

pub struct Orchestrator<S, P> {
    config: OrchestratorConfig,
    service: S,
    persistence: P,
    prompt: PromptBuilder,
    fallback: FallbackMutator,
    coordinator: PersistenceCoordinator,
    doc: tokio::sync::Mutex<EditableDocument>,
    inner: Mutex<Inner>,
    events: UnboundedSender<AssistEvent>,
}

impl<S, P> Orchestrator<S, P>
where
    S: SuggestionService,
    P: PersistenceService,
{
    pub fn new(
        config: OrchestratorConfig,
        service: S,
        persistence: P,
        doc: EditableDocument,
    ) -> (Self, UnboundedReceiver<AssistEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let coordinator = PersistenceCoordinator::new(config.save.clone());
        let orchestrator = Self {
            config,
            service,
            persistence,
            prompt: PromptBuilder::new(),
            fallback: FallbackMutator::new(),
            coordinator,
            doc: tokio::sync::Mutex::new(doc),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                conversation: ConversationState::default(),
                token: CancelToken::new(),
                suggestion_displayed: false,
                last_edit_at: None,
                last_saved: None,
            }),
            events,
        };
        (orchestrator, receiver)
    }

    /// The live document. The host edits through this between requests.
    pub fn document(&self) -> &tokio::sync::Mutex<EditableDocument> {
        &self.doc
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    pub fn conversation(&self) -> ConversationState {
        self.inner.lock().unwrap().conversation.clone()
    }

    /// Record one edit event from the surrounding editor.
    pub fn note_edit(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.conversation.pending_edit_count += 1;
        inner.last_edit_at = Some(Instant::now());
    }

    /// The user dismissed the currently displayed suggestion.
    pub fn dismiss_suggestion(&self) {
        self.inner.lock().unwrap().suggestion_displayed = false;
    }

    /// Swap in a newly loaded document; conversation state starts over.
    pub async fn reset_for_document(&self, doc: EditableDocument) {
        let mut guard = self.doc.lock().await;
        *guard = doc;
        let mut inner = self.inner.lock().unwrap();
        inner.token.cancel();
        inner.token = CancelToken::new();
        inner.phase = Phase::Idle;
        inner.conversation = ConversationState::default();
        inner.suggestion_displayed = false;
        inner.last_edit_at = None;
        inner.last_saved = None;
    }

    /// Explicit user instruction. Disarms auto-suggest for the session and
    /// preempts any in-flight request.
    pub async fn submit_instruction(
        &self,
        instruction: impl Into<String>,
    ) -> Result<AssistOutcome, AssistError> {
        let instruction = instruction.into();
        self.note_user_interaction();
        let (selection, conversation_id) = self.request_context().await;
        let request = MutationRequest {
            instruction_text: Some(instruction),
            selection_scope: selection,
            device_context: self.config.device_context.clone(),
            prior_conversation_id: conversation_id,
        };
        self.run_request(request, true).await
    }

    /// Explicit "suggest something" action.
    pub async fn request_suggestion(&self) -> Result<AssistOutcome, AssistError> {
        self.note_user_interaction();
        let (selection, conversation_id) = self.request_context().await;
        let request = MutationRequest {
            instruction_text: None,
            selection_scope: selection,
            device_context: self.config.device_context.clone(),
            prior_conversation_id: conversation_id,
        };
        self.run_request(request, true).await
    }

    /// Auto-suggestion trigger. Returns `None` when ineligible: below the
    /// edit threshold, disarmed, a suggestion is already displayed, or a
    /// request is in flight. Otherwise waits out the debounce quiet period
    /// and runs one suggestion attempt.
    pub async fn auto_suggest(&self) -> Option<Result<AssistOutcome, AssistError>> {
        loop {
            let wait = {
                let inner = self.inner.lock().unwrap();
                if !inner.conversation.auto_suggest_armed
                    || inner.suggestion_displayed
                    || inner.phase == Phase::AwaitingResponse
                    || inner.conversation.pending_edit_count < self.config.auto_suggest_threshold
                {
                    return None;
                }
                let last_edit = inner.last_edit_at?;
                let elapsed = last_edit.elapsed();
                if elapsed >= self.config.auto_suggest_debounce {
                    break;
                }
                self.config.auto_suggest_debounce - elapsed
            };
            tokio::time::sleep(wait).await;
        }

        let conversation_id = self.inner.lock().unwrap().conversation.conversation_id.clone();
        let request = MutationRequest {
            instruction_text: None,
            selection_scope: None,
            device_context: self.config.device_context.clone(),
            prior_conversation_id: conversation_id,
        };
        Some(self.run_request(request, false).await)
    }

    /// First real user interaction permanently disarms auto-suggest for
    /// this session.
    fn note_user_interaction(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.conversation.auto_suggest_armed {
            tracing::debug!("auto-suggest disarmed by user interaction");
            inner.conversation.auto_suggest_armed = false;
        }
        inner.suggestion_displayed = false;
    }

    async fn request_context(&self) -> (Option<NodeId>, Option<String>) {
        let selection = self.doc.lock().await.selected_node();
        let conversation_id = self.inner.lock().unwrap().conversation.conversation_id.clone();
        (selection, conversation_id)
    }

    async fn run_request(
        &self,
        request: MutationRequest,
        user_initiated: bool,
    ) -> Result<AssistOutcome, AssistError> {
        let token = {
            let mut inner = self.inner.lock().unwrap();
            // Last-request-wins: supersede whatever is outstanding.
            inner.token.cancel();
            inner.token = CancelToken::new();
            inner.phase = Phase::AwaitingResponse;
            inner.token.clone()
        };

        let result = self.drive(&request, &token).await;

        let mut inner = self.inner.lock().unwrap();
        let still_current = inner.token.same(&token);
        match &result {
            Ok(outcome) => {
                if still_current {
                    inner.phase = Phase::Idle;
                }
                inner.conversation.pending_edit_count = 0;
                if !user_initiated {
                    inner.suggestion_displayed = true;
                }
                drop(inner);
                let _ = self.events.send(AssistEvent::Applied {
                    explanation: outcome.explanation.clone(),
                });
                for warning in &outcome.warnings {
                    let _ = self.events.send(AssistEvent::Warning {
                        message: warning.clone(),
                    });
                }
            }
            Err(AssistError::Cancelled) => {
                // Superseded: silent, no UI effect.
                if still_current {
                    inner.phase = Phase::Cancelled;
                }
            }
            Err(err) => {
                if still_current {
                    inner.phase = Phase::Failed;
                }
                let message = err.user_message();
                let quota = matches!(err, AssistError::QuotaExceeded { .. });
                drop(inner);
                if quota {
                    let _ = self.events.send(AssistEvent::QuotaExhausted);
                }
                if let Some(message) = message {
                    let _ = self.events.send(AssistEvent::Failed { message });
                }
            }
        }
        result
    }

    async fn drive(
        &self,
        request: &MutationRequest,
        token: &CancelToken,
    ) -> Result<AssistOutcome, AssistError> {
        let (prompt, markup, stylesheet) = {
            let doc = self.doc.lock().await;
            (
                self.prompt.build(
                    &*doc,
                    request.selection_scope,
                    request.instruction_text.as_deref(),
                    &request.device_context,
                ),
                doc.markup(),
                doc.stylesheet(),
            )
        };

        let wire = SuggestionRequest {
            prompt,
            user_input: request.instruction_text.clone(),
            is_user_prompt: request.instruction_text.is_some(),
            document_id: self.config.document_id.clone(),
            conversation_id: request.prior_conversation_id.clone(),
            markup: Some(markup),
            stylesheet: Some(stylesheet),
        };

        let response = self.call_with_retries(&wire, token).await?;

        if let Some(conversation_id) = &response.conversation_id {
            self.inner.lock().unwrap().conversation.conversation_id =
                Some(conversation_id.clone());
        }

        let payload = response.suggestion.ok_or(AssistError::EmptySuggestion)?;
        let result = MutationResult::from_payload(payload)?;

        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.token.same(token) || token.is_cancelled() {
                return Err(AssistError::Cancelled);
            }
            inner.phase = Phase::Applying;
        }

        let mut doc = self.doc.lock().await;
        let outcome = match Executor::apply(&mut *doc, &result, request.selection_scope) {
            Ok(outcome) => outcome,
            Err(err @ AssistError::UnsafeInstruction { .. }) => return Err(err),
            Err(err) => self.attempt_fallback(&mut doc, &result, err)?,
        };

        doc.mark_pending_assist();
        let fingerprint = content_fingerprint(&doc.markup(), &doc.stylesheet());

        let previous = self.inner.lock().unwrap().last_saved.clone();
        let save = match self
            .coordinator
            .save(
                &mut *doc,
                &self.persistence,
                &self.config.document_id,
                previous.as_ref(),
            )
            .await
        {
            Ok((content, report)) => {
                let mut inner = self.inner.lock().unwrap();
                inner.last_saved = Some(content);
                inner.conversation.last_snapshot_fingerprint = fingerprint;
                drop(inner);
                let _ = self.events.send(AssistEvent::Saved {
                    changed: report.changed,
                });
                SaveDisposition::Saved {
                    changed: report.changed,
                }
            }
            Err(AssistError::SaveFailed { message }) => {
                tracing::error!("mutation applied but save failed: {message}");
                let _ = self.events.send(AssistEvent::Warning {
                    message: "your change was applied but couldn't be saved".to_string(),
                });
                SaveDisposition::Failed { message }
            }
            Err(other) => return Err(other),
        };

        Ok(AssistOutcome {
            explanation: outcome.explanation,
            path: outcome.path,
            warnings: outcome.warnings,
            save,
        })
    }

    /// The imperative path proved ineffective or threw; try the textual
    /// fallback when the explanation suggests a concrete change.
    fn attempt_fallback(
        &self,
        doc: &mut EditableDocument,
        result: &MutationResult,
        original: AssistError,
    ) -> Result<ExecutionOutcome, AssistError> {
        let explanation = result.explanation();
        let imperative = matches!(result, MutationResult::ImperativeEdit { .. });
        if !imperative || !FallbackMutator::is_applicable(explanation) {
            return Err(original);
        }
        tracing::info!("imperative edit ineffective ({original}), attempting textual fallback");
        let anchor = detect_anchor(&doc.markup(), explanation);
        self.fallback
            .try_fallback(doc, explanation, anchor.as_deref())?;
        Ok(ExecutionOutcome {
            explanation: explanation.to_string(),
            path: ExecutionPath::TextualFallback,
            warnings: Vec::new(),
        })
    }

    async fn call_with_retries(
        &self,
        wire: &SuggestionRequest,
        token: &CancelToken,
    ) -> Result<SuggestionResponse, AssistError> {
        let mut retries = 0u32;
        loop {
            // Checked before dispatching the network call.
            if token.is_cancelled() {
                return Err(AssistError::Cancelled);
            }

            let attempt = self.service.request_suggestion(wire).await;

            // A late response for a superseded request is discarded.
            if token.is_cancelled() {
                return Err(AssistError::Cancelled);
            }

            let failure = match attempt {
                Ok(response) if response.success => return Ok(response),
                Ok(response) => {
                    if response.error_code.as_deref() == Some(QUOTA_ERROR_CODE) {
                        // Terminal for the attempt: quota never retries.
                        return Err(AssistError::QuotaExceeded {
                            message: response
                                .error
                                .unwrap_or_else(|| "usage limit reached".to_string()),
                        });
                    }
                    AssistError::Transient {
                        message: response
                            .error
                            .unwrap_or_else(|| "upstream reported failure".to_string()),
                        retries,
                    }
                }
                Err(err @ AssistError::Transient { .. }) => err,
                Err(err) => return Err(err),
            };

            if retries >= self.config.retry.max_retries {
                return Err(match failure {
                    AssistError::Transient { message, .. } => {
                        AssistError::Transient { message, retries }
                    }
                    other => other,
                });
            }
            retries += 1;
            let delay = self.config.retry.delay_for(retries);
            tracing::warn!(retries, ?delay, "transient upstream failure, backing off: {failure}");

            // Checked before each retry iteration.
            if token.is_cancelled() {
                return Err(AssistError::Cancelled);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

fn content_fingerprint(markup: &str, stylesheet: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    markup.hash(&mut hasher);
    stylesheet.hash(&mut hasher);
    hasher.finish()
}
