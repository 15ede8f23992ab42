//! End-to-end orchestrator tests against programmable service mocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use pagesmith_assist::{
    AssistError, AssistEvent, DocumentAccessor, EditableDocument, ExecutionPath,
    NoEffectDiagnostic, Orchestrator,
    OrchestratorConfig, PersistenceService, Phase, RetryPolicy, SaveContent, SaveDisposition,
    SaveError, SavePolicy, SuggestionPayload, SuggestionRequest, SuggestionResponse,
    SuggestionService, QUOTA_ERROR_CODE,
};

enum Scripted {
    Success {
        response: SuggestionResponse,
        delay: Duration,
    },
    Transient {
        message: String,
    },
}

/// Replays a queue of scripted replies and records every request.
struct ScriptedService {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<SuggestionRequest>>,
    calls: AtomicU32,
}

impl ScriptedService {
    fn new(replies: Vec<Scripted>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn recorded_requests(&self) -> Vec<SuggestionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuggestionService for &ScriptedService {
    async fn request_suggestion(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse, AssistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Scripted::Success { response, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(Scripted::Transient { message }) => Err(AssistError::Transient {
                message,
                retries: 0,
            }),
            None => Err(AssistError::Transient {
                message: "script exhausted".to_string(),
                retries: 0,
            }),
        }
    }
}

/// In-memory persistence endpoint that records every save.
#[derive(Default)]
struct MemorySaves {
    saved: Mutex<Vec<SaveContent>>,
}

impl MemorySaves {
    fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl PersistenceService for &MemorySaves {
    async fn save(&self, _document_id: &str, content: &SaveContent) -> Result<(), SaveError> {
        self.saved.lock().unwrap().push(content.clone());
        Ok(())
    }

    async fn load_previous(&self, _document_id: &str) -> Result<Option<SaveContent>, SaveError> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }
}

struct RejectingSaves;

#[async_trait]
impl PersistenceService for RejectingSaves {
    async fn save(&self, _document_id: &str, _content: &SaveContent) -> Result<(), SaveError> {
        Err(SaveError::Unauthorized("session expired".to_string()))
    }

    async fn load_previous(&self, _document_id: &str) -> Result<Option<SaveContent>, SaveError> {
        Ok(None)
    }
}

fn replacement(markup: &str, explanation: &str) -> SuggestionResponse {
    SuggestionResponse {
        success: true,
        suggestion: Some(SuggestionPayload {
            explanation: explanation.to_string(),
            operations: None,
            new_markup: Some(markup.to_string()),
            new_stylesheet: None,
        }),
        conversation_id: Some("conv-1".to_string()),
        ..Default::default()
    }
}

fn imperative(operations: serde_json::Value, explanation: &str) -> SuggestionResponse {
    SuggestionResponse {
        success: true,
        suggestion: Some(SuggestionPayload {
            explanation: explanation.to_string(),
            operations: Some(operations),
            new_markup: None,
            new_stylesheet: None,
        }),
        conversation_id: Some("conv-1".to_string()),
        ..Default::default()
    }
}

fn quota() -> SuggestionResponse {
    SuggestionResponse {
        success: false,
        error_code: Some(QUOTA_ERROR_CODE.to_string()),
        error: Some("monthly limit reached".to_string()),
        ..Default::default()
    }
}

fn ok(response: SuggestionResponse) -> Scripted {
    Scripted::Success {
        response,
        delay: Duration::ZERO,
    }
}

fn ok_after(response: SuggestionResponse, delay: Duration) -> Scripted {
    Scripted::Success { response, delay }
}

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new("doc-1");
    config.device_context = "desktop".to_string();
    config.auto_suggest_debounce = Duration::from_millis(5);
    config.retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };
    config.save = SavePolicy {
        flush_cycles: 1,
        flush_pause: Duration::from_millis(1),
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
    };
    config
}

fn test_document() -> EditableDocument {
    EditableDocument::from_parts(
        r#"<section><div id="slot-title">Old Name</div><p id="keep">Untouched</p></section>"#,
        "p { margin: 0 }",
    )
    .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drain(receiver: &mut UnboundedReceiver<AssistEvent>) -> Vec<AssistEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_zero_match_imperative_triggers_fallback() {
    let service = ScriptedService::new(vec![ok(imperative(
        json!([{"op": "setContent", "target": {"by": "id", "value": "does-not-exist"},
                "value": "Acme Farms"}]),
        "I changed the title to 'Acme Farms'",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let outcome = orchestrator.submit_instruction("rename the title").await.unwrap();
    assert_eq!(outcome.path, ExecutionPath::TextualFallback);

    let doc = orchestrator.document().lock().await;
    let markup = doc.markup();
    assert!(markup.contains(r#"<div id="slot-title">Acme Farms</div>"#));
    assert!(markup.contains("Untouched"));
}

#[tokio::test]
async fn test_zero_match_without_change_vocabulary_surfaces_no_effect() {
    let service = ScriptedService::new(vec![ok(imperative(
        json!([{"op": "setContent", "target": {"by": "id", "value": "does-not-exist"},
                "value": "x"}]),
        "Here is an overview of your page",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, mut events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let err = orchestrator.submit_instruction("do something").await.unwrap_err();
    match err {
        AssistError::NoEffect { diagnostic } => {
            assert_eq!(diagnostic, NoEffectDiagnostic::NothingMatched);
        }
        other => panic!("expected NoEffect, got {other:?}"),
    }
    assert_eq!(saves.save_count(), 0, "nothing persisted on failure");

    let events = drain(&mut events);
    assert!(events.contains(&AssistEvent::Failed {
        message: "couldn't find that element".to_string()
    }));
}

#[tokio::test]
async fn test_fallback_exhausted_is_surfaced_as_structured_error() {
    let service = ScriptedService::new(vec![ok(imperative(
        json!([{"op": "setContent", "target": {"by": "id", "value": "does-not-exist"},
                "value": "x"}]),
        // Change vocabulary but no quoted replacement text to extract.
        "I updated the page styling for you",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let err = orchestrator.submit_instruction("restyle").await.unwrap_err();
    assert!(matches!(err, AssistError::FallbackExhausted { .. }));
}

#[tokio::test]
async fn test_identical_replacement_applies_and_resave_short_circuits() {
    let markup = r#"<main><h1>Same</h1></main>"#;
    let service = ScriptedService::new(vec![
        ok(replacement(markup, "I rebuilt the page")),
        ok(replacement(markup, "I rebuilt the page again")),
    ]);
    let saves = MemorySaves::default();
    let (orchestrator, mut events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let first = orchestrator.submit_instruction("rebuild").await.unwrap();
    assert_eq!(first.path, ExecutionPath::Replacement);
    assert_eq!(first.save, SaveDisposition::Saved { changed: true });
    assert_eq!(saves.save_count(), 1);

    // Identical content: still applied, save short-circuits but succeeds.
    let second = orchestrator.submit_instruction("rebuild again").await.unwrap();
    assert_eq!(second.path, ExecutionPath::Replacement);
    assert_eq!(second.save, SaveDisposition::Saved { changed: false });
    assert_eq!(saves.save_count(), 1, "endpoint not called for identical content");

    let events = drain(&mut events);
    let applied = events
        .iter()
        .filter(|e| matches!(e, AssistEvent::Applied { .. }))
        .count();
    assert_eq!(applied, 2);
}

#[tokio::test]
async fn test_transient_errors_retry_to_the_ceiling_and_stop() {
    let service = ScriptedService::new(vec![
        Scripted::Transient {
            message: "connection reset".to_string(),
        },
        Scripted::Transient {
            message: "connection reset".to_string(),
        },
        Scripted::Transient {
            message: "connection reset".to_string(),
        },
        Scripted::Transient {
            message: "connection reset".to_string(),
        },
    ]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let err = orchestrator.submit_instruction("anything").await.unwrap_err();
    match err {
        AssistError::Transient { retries, .. } => {
            assert_eq!(retries, 2, "retry count equals the ceiling");
        }
        other => panic!("expected Transient, got {other:?}"),
    }
    // Initial attempt + two retries, never more.
    assert_eq!(service.calls(), 3);
    assert_eq!(orchestrator.phase(), Phase::Failed);
}

#[tokio::test]
async fn test_quota_short_circuits_retry_and_raises_event() {
    let service = ScriptedService::new(vec![ok(quota()), ok(quota())]);
    let saves = MemorySaves::default();
    let (orchestrator, mut events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let err = orchestrator.submit_instruction("anything").await.unwrap_err();
    assert!(matches!(err, AssistError::QuotaExceeded { .. }));
    assert_eq!(service.calls(), 1, "quota never triggers a second attempt");

    let events = drain(&mut events);
    assert!(events.contains(&AssistEvent::QuotaExhausted));
}

#[tokio::test]
async fn test_auto_suggest_requires_five_edits() {
    let service = ScriptedService::new(vec![ok(replacement(
        r#"<main><h1>Better</h1></main>"#,
        "I tightened the headline",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    for _ in 0..4 {
        orchestrator.note_edit();
    }
    assert!(orchestrator.auto_suggest().await.is_none());
    assert_eq!(service.calls(), 0, "below threshold never calls upstream");

    orchestrator.note_edit();
    let outcome = orchestrator.auto_suggest().await.expect("eligible now").unwrap();
    assert_eq!(outcome.path, ExecutionPath::Replacement);
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn test_auto_suggest_blocked_while_suggestion_displayed() {
    let markup = r#"<main><h1>Better</h1></main>"#;
    let service = ScriptedService::new(vec![
        ok(replacement(markup, "First suggestion")),
        ok(replacement(markup, "Second suggestion")),
    ]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    for _ in 0..5 {
        orchestrator.note_edit();
    }
    orchestrator.auto_suggest().await.expect("first fires").unwrap();

    for _ in 0..5 {
        orchestrator.note_edit();
    }
    assert!(
        orchestrator.auto_suggest().await.is_none(),
        "blocked while a suggestion is displayed"
    );

    orchestrator.dismiss_suggestion();
    assert!(orchestrator.auto_suggest().await.is_some());
}

#[tokio::test]
async fn test_user_interaction_permanently_disarms_auto_suggest() {
    let service = ScriptedService::new(vec![ok(replacement(
        r#"<main><h1>Done</h1></main>"#,
        "I did the thing",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    orchestrator.submit_instruction("do the thing").await.unwrap();
    assert!(!orchestrator.conversation().auto_suggest_armed);

    for _ in 0..10 {
        orchestrator.note_edit();
    }
    assert!(orchestrator.auto_suggest().await.is_none());
}

#[tokio::test]
async fn test_explicit_request_cancels_in_flight_auto_suggestion() {
    init_tracing();
    let service = ScriptedService::new(vec![
        // Consumed by the auto-suggestion; slow enough to be preempted.
        ok_after(
            replacement(r#"<main><h1>Auto</h1></main>"#, "Auto suggestion"),
            Duration::from_millis(200),
        ),
        // Consumed by the explicit request.
        ok(replacement(r#"<main><h1>User</h1></main>"#, "User change")),
    ]);
    let saves = MemorySaves::default();
    let (orchestrator, mut events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    for _ in 0..5 {
        orchestrator.note_edit();
    }

    let (auto_result, user_result) = tokio::join!(orchestrator.auto_suggest(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.submit_instruction("make it mine").await
    });

    let auto_err = auto_result.expect("auto-suggest was eligible").unwrap_err();
    assert!(matches!(auto_err, AssistError::Cancelled));

    let user_outcome = user_result.unwrap();
    assert_eq!(user_outcome.explanation, "User change");

    // The late auto response is discarded without UI effect: the only
    // Applied event is the user's.
    let events = drain(&mut events);
    let applied: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AssistEvent::Applied { explanation } => Some(explanation.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(applied, vec!["User change"]);

    let doc = orchestrator.document().lock().await;
    assert!(doc.markup().contains("User"));
}

#[tokio::test]
async fn test_save_failure_reported_distinctly_from_mutation_failure() {
    let service = ScriptedService::new(vec![ok(replacement(
        r#"<main><h1>Applied</h1></main>"#,
        "I applied it",
    ))]);
    let (orchestrator, mut events) =
        Orchestrator::new(test_config(), &service, RejectingSaves, test_document());

    let outcome = orchestrator.submit_instruction("apply").await.unwrap();
    assert!(matches!(outcome.save, SaveDisposition::Failed { .. }));

    // The mutation stuck even though the save failed.
    let doc = orchestrator.document().lock().await;
    assert!(doc.markup().contains("Applied"));
    drop(doc);

    let events = drain(&mut events);
    assert!(events.contains(&AssistEvent::Warning {
        message: "your change was applied but couldn't be saved".to_string()
    }));
}

#[tokio::test]
async fn test_conversation_id_carried_to_next_request() {
    let markup = r#"<main><h1>Ok</h1></main>"#;
    let service = ScriptedService::new(vec![
        ok(replacement(markup, "first")),
        ok(replacement(markup, "second")),
    ]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    orchestrator.submit_instruction("one").await.unwrap();
    orchestrator.submit_instruction("two").await.unwrap();

    let requests = service.recorded_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id.as_deref(), Some("conv-1"));
    assert!(requests[0].is_user_prompt);
    assert_eq!(requests[0].user_input.as_deref(), Some("one"));
}

#[tokio::test]
async fn test_unsafe_operations_never_reach_the_fallback() {
    let service = ScriptedService::new(vec![ok(imperative(
        json!([{"op": "setContent", "target": {"by": "id", "value": "slot-title"},
                "value": "fetch(attacker)"}]),
        "I changed the title to 'Acme Farms'",
    ))]);
    let saves = MemorySaves::default();
    let (orchestrator, _events) =
        Orchestrator::new(test_config(), &service, &saves, test_document());

    let err = orchestrator.submit_instruction("rename").await.unwrap_err();
    assert!(matches!(err, AssistError::UnsafeInstruction { .. }));

    let doc = orchestrator.document().lock().await;
    let markup = doc.markup();
    assert!(markup.contains("Old Name"), "document untouched");
    assert_eq!(saves.save_count(), 0);
}
