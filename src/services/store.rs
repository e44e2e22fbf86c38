//! The store facade: lifecycle, session records, quiz snapshot cache, and
//! the current-question scalar.

use chrono::Utc;
use futures::future::BoxFuture;
use rand::Rng;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    config::StoreConfig,
    dao::{
        models::{Opaque, SessionEntity, SessionPatch, SessionStatus},
        session_store::{BackendKind, SessionBackend},
        storage::StorageResult,
    },
    error::StoreError,
    services::supervisor,
    state::{SharedState, StoreState},
};

/// Characters used for generated session codes; visually ambiguous ones
/// are left out.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// Input for [`LiveSessionStore::create_session`].
#[derive(Debug, Clone, Validate)]
pub struct NewSession {
    /// Session code to use; a fresh one is generated when absent.
    #[validate(length(min = 4, max = 16))]
    pub session_code: Option<String>,
    /// Identifier of the quiz content, kept verbatim.
    #[validate(length(min = 1))]
    pub quiz_id: String,
    /// Identifier of the hosting user.
    #[validate(length(min = 1))]
    pub host_id: String,
    /// Participant cap for the session.
    #[validate(range(min = 1, max = 10_000))]
    pub max_participants: u32,
    /// Opaque session settings.
    pub settings: Opaque,
    /// Opaque quiz metadata.
    pub quiz_metadata: Opaque,
}

impl NewSession {
    /// Input with the given quiz/host identifiers and defaults for the
    /// rest (generated code, cap of 100, empty blobs).
    pub fn new(quiz_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self {
            session_code: None,
            quiz_id: quiz_id.into(),
            host_id: host_id.into(),
            max_participants: 100,
            settings: Opaque::default(),
            quiz_metadata: Opaque::default(),
        }
    }

    /// Use an explicit session code instead of a generated one.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.session_code = Some(code.into());
        self
    }

    /// Override the participant cap.
    pub fn with_max_participants(mut self, cap: u32) -> Self {
        self.max_participants = cap;
        self
    }

    /// Attach the opaque settings blob.
    pub fn with_settings(mut self, settings: Opaque) -> Self {
        self.settings = settings;
        self
    }

    /// Attach the opaque quiz metadata blob.
    pub fn with_quiz_metadata(mut self, metadata: Opaque) -> Self {
        self.quiz_metadata = metadata;
        self
    }
}

/// Store service for live quiz sessions.
///
/// Owns the backend lifecycle: [`init`](Self::init) connects to the first
/// reachable candidate (or starts degraded on the in-process fallback) and
/// [`shutdown`](Self::shutdown) stops the health watcher. All operations go
/// through whichever backend is active; a distributed backend that becomes
/// unreachable mid-operation is swapped out transparently and the operation
/// is retried once on the fallback.
pub struct LiveSessionStore {
    state: SharedState,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSessionStore {
    /// Connect to the configured backends and build the store.
    ///
    /// Candidate attempts are bounded by the configured timeout; when every
    /// candidate fails the store comes up degraded on the in-process
    /// fallback rather than erroring.
    pub async fn init(config: StoreConfig) -> Self {
        let state = StoreState::new(config.session_ttl);
        let mut watcher = None;

        match supervisor::connect_distributed(&config).await {
            Some(backend) => {
                state.install_distributed(backend).await;
                watcher = Some(tokio::spawn(supervisor::watch(state.clone())));
            }
            None => {
                if config.candidates.is_empty() {
                    info!("no backend candidates configured; running on in-process fallback");
                } else {
                    warn!(
                        candidates = config.candidates.len(),
                        "all backend candidates failed; running on in-process fallback"
                    );
                }
            }
        }

        Self {
            state,
            watcher: Mutex::new(watcher),
        }
    }

    /// Stop the health watcher. Pending operations finish normally.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().await.take() {
            handle.abort();
        }
    }

    /// Whether the store is currently running on the in-process fallback.
    pub async fn is_degraded(&self) -> bool {
        self.state.is_degraded().await
    }

    /// Subscribe to degraded-mode changes.
    pub fn degraded_watcher(&self) -> tokio::sync::watch::Receiver<bool> {
        self.state.degraded_watcher()
    }

    pub(crate) fn shared_state(&self) -> &SharedState {
        &self.state
    }

    /// Run one backend operation, transparently failing over to the
    /// in-process store when the distributed backend is unreachable.
    pub(crate) async fn with_backend<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(&dyn SessionBackend) -> BoxFuture<'static, StorageResult<T>>,
    {
        let backend = self.state.backend().await;
        match op(backend.as_ref()).await {
            Err(err) if err.is_unavailable() && backend.kind() == BackendKind::Distributed => {
                warn!(error = %err, "distributed backend unreachable; retrying on fallback");
                let fallback = self.state.activate_fallback().await;
                op(fallback.as_ref()).await.map_err(Into::into)
            }
            result => result.map_err(Into::into),
        }
    }

    /// Create a session record, assigning timestamps and starting its TTL
    /// window. The code is generated when the input carries none.
    pub async fn create_session(&self, request: NewSession) -> Result<SessionEntity, StoreError> {
        request.validate()?;

        let session_code = request
            .session_code
            .map(|code| code.to_uppercase())
            .unwrap_or_else(generate_session_code);

        let session = SessionEntity {
            session_code,
            quiz_id: request.quiz_id,
            host_id: request.host_id,
            status: SessionStatus::Waiting,
            current_question_index: 0,
            max_participants: request.max_participants,
            settings: request.settings,
            quiz_metadata: request.quiz_metadata,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };

        self.with_backend(|backend| backend.put_session(session.clone()))
            .await?;

        debug!(code = %session.session_code, quiz = %session.quiz_id, "session created");
        Ok(session)
    }

    /// Fetch a session record; `None` when absent or expired.
    pub async fn session(&self, code: &str) -> Result<Option<SessionEntity>, StoreError> {
        self.with_backend(|backend| backend.get_session(code)).await
    }

    /// Merge a partial update into a session and slide its TTL window.
    ///
    /// Fails with [`StoreError::NotFound`] when the session is absent.
    pub async fn update_session(
        &self,
        code: &str,
        patch: SessionPatch,
    ) -> Result<SessionEntity, StoreError> {
        let Some(mut session) = self.session(code).await? else {
            return Err(StoreError::NotFound(format!("session `{code}`")));
        };

        session.apply(patch, Utc::now());
        self.with_backend(|backend| backend.put_session(session.clone()))
            .await?;
        self.extend_ttl(code).await?;

        Ok(session)
    }

    /// Delete a session and every child structure in the same call.
    ///
    /// After this returns `true`, reads against any structure of the code
    /// come back empty.
    pub async fn delete_session(&self, code: &str) -> Result<bool, StoreError> {
        let deleted = self
            .with_backend(|backend| backend.delete_session(code))
            .await?;
        if deleted {
            debug!(%code, "session deleted");
        }
        Ok(deleted)
    }

    /// Slide the TTL window of the whole session tree; returns whether the
    /// session still existed.
    pub async fn extend_ttl(&self, code: &str) -> Result<bool, StoreError> {
        self.with_backend(|backend| backend.touch_session(code))
            .await
    }

    /// Cache the opaque quiz payload for the session's lifetime.
    pub async fn cache_quiz(&self, code: &str, payload: Opaque) -> Result<(), StoreError> {
        self.with_backend(|backend| backend.put_quiz(code, payload.clone()))
            .await
    }

    /// Fetch the cached quiz payload, verbatim.
    pub async fn cached_quiz(&self, code: &str) -> Result<Option<Opaque>, StoreError> {
        self.with_backend(|backend| backend.get_quiz(code)).await
    }

    /// Store the index of the question currently on screen.
    pub async fn set_current_question(&self, code: &str, index: u32) -> Result<(), StoreError> {
        self.with_backend(|backend| backend.set_current_question(code, index))
            .await
    }

    /// Fetch the current-question index, if set.
    pub async fn current_question(&self, code: &str) -> Result<Option<u32>, StoreError> {
        self.with_backend(|backend| backend.get_current_question(code))
            .await
    }
}

/// Generate a six-character uppercase session code.
fn generate_session_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_the_expected_shape() {
        for _ in 0..100 {
            let code = generate_session_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|byte| CODE_ALPHABET.contains(&byte)));
        }
    }

    #[test]
    fn new_session_input_validates_bounds() {
        assert!(NewSession::new("Q1", "H1").validate().is_ok());
        assert!(NewSession::new("", "H1").validate().is_err());
        assert!(
            NewSession::new("Q1", "H1")
                .with_max_participants(0)
                .validate()
                .is_err()
        );
        assert!(
            NewSession::new("Q1", "H1")
                .with_code("AB")
                .validate()
                .is_err()
        );
    }
}
