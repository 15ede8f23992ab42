//! Persistence Coordinator: flush, snapshot, and durably save.
//!
//! The document accessor normalizes its tree asynchronously, so the save
//! path forces several flush cycles with short pauses before reading the
//! final content. Transient endpoint failures are retried up to a ceiling;
//! authorization and validation failures are not.

use std::time::Duration;

use pagesmith_document::DocumentAccessor;

use crate::client::{PersistenceService, SaveContent, SaveError};
use crate::errors::AssistError;

#[derive(Debug, Clone)]
pub struct SavePolicy {
    /// Forced flush/refresh cycles before reading final content.
    pub flush_cycles: u32,
    /// Pause between flush cycles.
    pub flush_pause: Duration,
    /// Retries on transient save failures.
    pub max_retries: u32,
    /// Pause between save retries.
    pub retry_delay: Duration,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            flush_cycles: 3,
            flush_pause: Duration::from_millis(50),
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// False when content was byte-identical to the previous save and the
    /// endpoint was skipped. Still a success.
    pub changed: bool,
    /// Save attempts actually issued.
    pub attempts: u32,
}

pub struct PersistenceCoordinator {
    policy: SavePolicy,
}

impl Default for PersistenceCoordinator {
    fn default() -> Self {
        Self::new(SavePolicy::default())
    }
}

impl PersistenceCoordinator {
    pub fn new(policy: SavePolicy) -> Self {
        Self { policy }
    }

    /// Flush, compare against `previous`, and persist. On success the
    /// document's pending-AI-content marker is cleared so subsequent saves
    /// read from the live document.
    pub async fn save<A, P>(
        &self,
        doc: &mut A,
        service: &P,
        document_id: &str,
        previous: Option<&SaveContent>,
    ) -> Result<(SaveContent, SaveReport), AssistError>
    where
        A: DocumentAccessor,
        P: PersistenceService,
    {
        for cycle in 0..self.policy.flush_cycles {
            doc.flush()?;
            if cycle + 1 < self.policy.flush_cycles {
                tokio::time::sleep(self.policy.flush_pause).await;
            }
        }

        let content = SaveContent {
            markup: doc.markup(),
            stylesheet: doc.stylesheet(),
        };

        // Diagnostic comparison only; a no-change result is not an error.
        match previous {
            Some(prev) if *prev == content => {
                tracing::debug!(document_id, "content identical to previous save, skipping endpoint");
                doc.clear_pending_assist();
                return Ok((
                    content,
                    SaveReport {
                        changed: false,
                        attempts: 0,
                    },
                ));
            }
            Some(_) => tracing::debug!(document_id, "content changed since previous save"),
            None => tracing::debug!(document_id, "no previous save snapshot"),
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match service.save(document_id, &content).await {
                Ok(()) => {
                    doc.clear_pending_assist();
                    tracing::info!(document_id, attempts, "document saved");
                    return Ok((content, SaveReport { changed: true, attempts }));
                }
                Err(err) if err.is_retryable() && attempts <= self.policy.max_retries => {
                    tracing::warn!(document_id, attempts, "transient save failure: {err}");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(err) => {
                    tracing::error!(document_id, attempts, "save failed: {err}");
                    return Err(AssistError::SaveFailed {
                        message: match err {
                            SaveError::Transient(m)
                            | SaveError::Unauthorized(m)
                            | SaveError::Validation(m) => m,
                        },
                    });
                }
            }
        }
    }
}
