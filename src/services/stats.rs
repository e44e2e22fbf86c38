//! Health and stats introspection for monitoring.

use serde::Serialize;

use crate::{
    dao::{models::SessionStatus, session_store::BackendKind},
    error::StoreError,
    services::store::LiveSessionStore,
};

/// Counters for one session, for observability dashboards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStats {
    /// Session code the stats describe.
    pub session_code: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Number of participants in the directory.
    pub participant_count: u64,
    /// Number of appended answers.
    pub answer_count: u64,
    /// Index of the question currently being played.
    pub current_question_index: u32,
}

/// Shape of the active backend, for observability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackendStats {
    /// Which backend mode is serving operations.
    #[serde(serialize_with = "serialize_kind")]
    pub mode: BackendKind,
    /// Whether the store is running degraded on the fallback.
    pub degraded: bool,
    /// Number of live session records held by the active backend.
    pub sessions: u64,
}

fn serialize_kind<S: serde::Serializer>(kind: &BackendKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&kind.to_string())
}

impl LiveSessionStore {
    /// Whether the active backend is serviceable. The in-process fallback
    /// is always serviceable, so a degraded store still reports healthy.
    pub async fn is_healthy(&self) -> bool {
        self.with_backend(|backend| backend.health_check())
            .await
            .is_ok()
    }

    /// Counters for one session; `None` when the session is absent.
    pub async fn session_stats(&self, code: &str) -> Result<Option<SessionStats>, StoreError> {
        let Some(session) = self.session(code).await? else {
            return Ok(None);
        };

        let participant_count = self.participant_count(code).await?;
        let answer_count = self.answer_count(code).await?;

        Ok(Some(SessionStats {
            session_code: session.session_code,
            status: session.status,
            participant_count,
            answer_count,
            current_question_index: session.current_question_index,
        }))
    }

    /// Shape of the active backend.
    pub async fn backend_stats(&self) -> Result<BackendStats, StoreError> {
        let backend = self.shared_state().backend().await;
        let mode = backend.kind();
        let sessions = self
            .with_backend(|backend| backend.session_count())
            .await?;

        Ok(BackendStats {
            mode,
            degraded: mode == BackendKind::InProcess,
            sessions,
        })
    }
}
