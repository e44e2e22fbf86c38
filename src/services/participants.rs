//! Participant directory operations.

use chrono::Utc;
use tracing::debug;
use validator::Validate;

use crate::{
    dao::models::{ParticipantEntity, ParticipantPatch},
    error::StoreError,
    services::store::LiveSessionStore,
};

/// Input for [`LiveSessionStore::add_participant`].
#[derive(Debug, Clone, Validate)]
pub struct NewParticipant {
    /// Identity supplied by the auth collaborator.
    #[validate(length(min = 1))]
    pub user_id: String,
    /// Display name.
    #[validate(length(min = 1, max = 64))]
    pub user_name: String,
    /// Optional avatar URL.
    pub user_picture: Option<String>,
    /// Transport identifier owned by the socket layer.
    pub socket_id: Option<String>,
}

impl NewParticipant {
    /// Input with the given identity and display name.
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_picture: None,
            socket_id: None,
        }
    }

    /// Attach an avatar URL.
    pub fn with_picture(mut self, url: impl Into<String>) -> Self {
        self.user_picture = Some(url.into());
        self
    }

    /// Attach the transport identifier.
    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }
}

impl LiveSessionStore {
    /// Add a participant to a session, idempotently by `user_id`: re-adding
    /// overwrites the previous record (a rejoin path).
    ///
    /// Fails with [`StoreError::NotFound`] when the session is absent and
    /// with [`StoreError::InvalidInput`] when the session is full.
    pub async fn add_participant(
        &self,
        code: &str,
        request: NewParticipant,
    ) -> Result<ParticipantEntity, StoreError> {
        request.validate()?;

        let Some(session) = self.session(code).await? else {
            return Err(StoreError::NotFound(format!("session `{code}`")));
        };

        // Rejoins bypass the cap check; only genuinely new participants
        // count against it.
        let existing = self.participant(code, &request.user_id).await?;
        if existing.is_none() {
            let count = self.participant_count(code).await?;
            if count >= u64::from(session.max_participants) {
                return Err(StoreError::InvalidInput(format!(
                    "session `{code}` is full ({count} participants)"
                )));
            }
        }

        let participant = ParticipantEntity {
            user_id: request.user_id,
            user_name: request.user_name,
            user_picture: request.user_picture,
            score: 0,
            correct_answers: 0,
            incorrect_answers: 0,
            joined_at: Utc::now(),
            is_active: true,
            socket_id: request.socket_id,
        };

        self.with_backend(|backend| backend.put_participant(code, participant.clone()))
            .await?;
        self.extend_ttl(code).await?;

        debug!(%code, user = %participant.user_id, "participant joined");
        Ok(participant)
    }

    /// Fetch a single participant record.
    pub async fn participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<Option<ParticipantEntity>, StoreError> {
        self.with_backend(|backend| backend.get_participant(code, user_id))
            .await
    }

    /// Fetch every participant of a session, in no particular order.
    pub async fn participants(&self, code: &str) -> Result<Vec<ParticipantEntity>, StoreError> {
        self.with_backend(|backend| backend.all_participants(code))
            .await
    }

    /// Merge a partial update into a participant record.
    ///
    /// This is a read-modify-write with no lock; concurrent updates to the
    /// same participant can race. The orchestrator serializes gameplay
    /// updates per user, which is what makes this acceptable.
    pub async fn update_participant(
        &self,
        code: &str,
        user_id: &str,
        patch: ParticipantPatch,
    ) -> Result<ParticipantEntity, StoreError> {
        let Some(mut participant) = self.participant(code, user_id).await? else {
            return Err(StoreError::NotFound(format!(
                "participant `{user_id}` in session `{code}`"
            )));
        };

        participant.apply(patch);
        self.with_backend(|backend| backend.put_participant(code, participant.clone()))
            .await?;

        Ok(participant)
    }

    /// Remove a participant record (and their leaderboard entry); returns
    /// whether the record existed.
    pub async fn remove_participant(&self, code: &str, user_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .with_backend(|backend| backend.remove_participant(code, user_id))
            .await?;
        if removed {
            debug!(%code, user = %user_id, "participant removed");
        }
        Ok(removed)
    }

    /// Number of participants currently in the session.
    pub async fn participant_count(&self, code: &str) -> Result<u64, StoreError> {
        self.with_backend(|backend| backend.participant_count(code))
            .await
    }
}
