//! Append-only answer log operations.

use chrono::Utc;
use validator::Validate;

use crate::{
    dao::models::{AnswerEntity, Opaque},
    error::StoreError,
    services::store::LiveSessionStore,
};

/// Input for [`LiveSessionStore::record_answer`].
#[derive(Debug, Clone, Validate)]
pub struct NewAnswer {
    /// Identity of the answering participant.
    #[validate(length(min = 1))]
    pub user_id: String,
    /// Identifier of the answered question.
    #[validate(length(min = 1))]
    pub question_id: String,
    /// The submitted answer, kept opaque.
    pub selected_answer: Opaque,
    /// Whether the orchestrator judged the answer correct.
    pub is_correct: bool,
    /// Points awarded for this answer.
    pub points: i64,
    /// Time spent on the question, in milliseconds.
    pub time_spent_ms: u64,
}

impl NewAnswer {
    /// Input for one submitted answer.
    pub fn new(
        user_id: impl Into<String>,
        question_id: impl Into<String>,
        selected_answer: Opaque,
        is_correct: bool,
        points: i64,
        time_spent_ms: u64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            question_id: question_id.into(),
            selected_answer,
            is_correct,
            points,
            time_spent_ms,
        }
    }
}

impl LiveSessionStore {
    /// Append an immutable answer record and return it with its timestamp.
    /// Records are never mutated or reordered afterwards.
    pub async fn record_answer(
        &self,
        code: &str,
        request: NewAnswer,
    ) -> Result<AnswerEntity, StoreError> {
        request.validate()?;

        let answer = AnswerEntity {
            user_id: request.user_id,
            question_id: request.question_id,
            selected_answer: request.selected_answer,
            is_correct: request.is_correct,
            points: request.points,
            answered_at: Utc::now(),
            time_spent_ms: request.time_spent_ms,
        };

        self.with_backend(|backend| backend.push_answer(code, answer.clone()))
            .await?;

        Ok(answer)
    }

    /// Every answer of a session, in append order.
    pub async fn answers(&self, code: &str) -> Result<Vec<AnswerEntity>, StoreError> {
        self.with_backend(|backend| backend.all_answers(code)).await
    }

    /// Number of appended answers; callers use this to pace leaderboard
    /// rebroadcasts (for example, only every K answers) so large sessions
    /// do not become broadcast storms.
    pub async fn answer_count(&self, code: &str) -> Result<u64, StoreError> {
        self.with_backend(|backend| backend.answer_count(code)).await
    }
}
