//! # Pagesmith Assist
//!
//! AI-assisted mutation pipeline for the visual website builder.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ orchestrator: request lifecycle             │
//! │  - debounced auto-suggestion triggering     │
//! │  - cancellation (last-request-wins)         │
//! │  - exponential-backoff retry, quota gate    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ prompt: markup + stylesheet + selection     │
//! │         → bounded prompt text               │
//! └─────────────────────────────────────────────┘
//!                     ↓ upstream model call
//! ┌─────────────────────────────────────────────┐
//! │ executor: apply + verify the response       │
//! │  - replacement path (trusted, wholesale)    │
//! │  - imperative path (instrumented, verified) │
//! └─────────────────────────────────────────────┘
//!                     ↓ on NoEffect / throw
//! ┌─────────────────────────────────────────────┐
//! │ fallback: pattern-extracted text            │
//! │           substitution on serialized markup │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ persist: flush cycles + durable save        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Detectable application, not semantic correctness**: verification
//!    proves an edit took effect, never that it was the right edit
//! 2. **Closed instruction grammar**: model operations parse into a fixed
//!    set of tree operations; there is no dynamic evaluation path
//! 3. **One active mutator**: the state machine guarantees a single writer
//!    to the document at a time; a newer request cancels an older one
//! 4. **Two-audience errors**: technical detail goes to logs, users see
//!    the simplified classification text

mod client;
mod errors;
mod executor;
mod fallback;
mod instruction;
mod orchestrator;
mod persist;
mod prompt;

pub use client::{
    HistoryPage, HistoryRecord, HistoryService, HttpHistoryService, HttpPersistenceService,
    HttpSuggestionService, MutationResult, PersistenceService, SaveContent, SaveError,
    ServiceConfig, SuggestionPayload, SuggestionRequest, SuggestionResponse, SuggestionService,
    QUOTA_ERROR_CODE,
};
pub use errors::{AssistError, NoEffectDiagnostic};
pub use executor::{
    ExecutionOutcome, ExecutionPath, Executor, InstrumentedAccessor, ModificationTracker,
};
pub use fallback::{detect_anchor, Extraction, FallbackMutator};
pub use instruction::{parse_operations, screen_raw_operations, Operation};
pub use orchestrator::{
    AssistEvent, AssistOutcome, CancelToken, ConversationState, MutationRequest, Orchestrator,
    OrchestratorConfig, Phase, RetryPolicy, SaveDisposition,
};
pub use persist::{PersistenceCoordinator, SavePolicy, SaveReport};

// Re-export the document capability surface for convenience
pub use pagesmith_document::{Criterion, DocumentAccessor, EditableDocument, NodeId};
