//! Leaderboard operations: atomic score increments and the derived,
//! joined leaderboard view.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::{AnswerEntity, ParticipantPatch},
    error::StoreError,
    services::store::LiveSessionStore,
};

/// Hard cap on leaderboard queries; each returned row costs a participant
/// lookup, so unbounded limits would fan out badly on large sessions.
const MAX_LEADERBOARD_LIMIT: usize = 50;

/// One row of the derived leaderboard view: the ranked score joined with
/// the participant record and per-user answer aggregates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeaderboardEntry {
    /// 1-indexed position in the ranked order.
    pub rank: u64,
    /// Participant identity.
    pub user_id: String,
    /// Display name from the participant record.
    pub user_name: String,
    /// Avatar URL from the participant record.
    pub user_picture: Option<String>,
    /// Current ranked score.
    pub score: i64,
    /// Fraction of answered questions that were correct, in `0.0..=1.0`.
    pub accuracy: f64,
    /// Mean time spent per answered question, in milliseconds.
    pub avg_time_per_question_ms: f64,
}

/// Per-user aggregates folded out of the answer log.
#[derive(Default, Clone, Copy)]
struct AnswerAggregate {
    answered: u32,
    correct: u32,
    total_time_ms: u64,
}

impl AnswerAggregate {
    fn fold(answers: &[AnswerEntity]) -> HashMap<&str, AnswerAggregate> {
        let mut by_user: HashMap<&str, AnswerAggregate> = HashMap::new();
        for answer in answers {
            let aggregate = by_user.entry(answer.user_id.as_str()).or_default();
            aggregate.answered += 1;
            if answer.is_correct {
                aggregate.correct += 1;
            }
            aggregate.total_time_ms += answer.time_spent_ms;
        }
        by_user
    }

    fn accuracy(&self) -> f64 {
        if self.answered == 0 {
            return 0.0;
        }
        f64::from(self.correct) / f64::from(self.answered)
    }

    fn avg_time_ms(&self) -> f64 {
        if self.answered == 0 {
            return 0.0;
        }
        self.total_time_ms as f64 / f64::from(self.answered)
    }
}

impl LiveSessionStore {
    /// Atomically add `delta` to a participant's ranked score and return
    /// the new value.
    ///
    /// The increment is the backend's atomic counter primitive, so
    /// concurrent calls always sum regardless of interleaving. The new
    /// value is then mirrored into the participant record best-effort; a
    /// failure there leaves the two out of sync until the next update,
    /// which is the accepted eventual-consistency model. Like any other
    /// write, the increment slides the session's TTL window.
    ///
    /// Fails with [`StoreError::NotFound`] when the session is absent, so
    /// both backends agree instead of one fabricating a score.
    pub async fn update_leaderboard(
        &self,
        code: &str,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        if self.session(code).await?.is_none() {
            return Err(StoreError::NotFound(format!("session `{code}`")));
        }

        let score = self
            .with_backend(|backend| backend.increment_score(code, user_id, delta))
            .await?;
        self.extend_ttl(code).await?;

        let mirror = self
            .update_participant(
                code,
                user_id,
                ParticipantPatch {
                    score: Some(score),
                    ..Default::default()
                },
            )
            .await;
        if let Err(err) = mirror {
            warn!(
                %code, user = %user_id, error = %err,
                "participant score out of sync with leaderboard"
            );
        }

        Ok(score)
    }

    /// The top of the leaderboard as joined entries, best score first.
    ///
    /// Ties are ordered by `user_id` descending, matching the ranked-set
    /// ordering of the distributed backend. `limit` is clamped to 50.
    /// Scores whose participant record has vanished are skipped.
    pub async fn leaderboard(
        &self,
        code: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let limit = limit.clamp(1, MAX_LEADERBOARD_LIMIT);

        let scores = self
            .with_backend(|backend| backend.top_scores(code, limit))
            .await?;
        if scores.is_empty() {
            return Ok(Vec::new());
        }

        // One pass over the answer log covers every row.
        let answers = self.answers(code).await?;
        let aggregates = AnswerAggregate::fold(&answers);

        let mut entries = Vec::with_capacity(scores.len());
        for (position, entry) in scores.into_iter().enumerate() {
            let Some(participant) = self.participant(code, &entry.user_id).await? else {
                warn!(%code, user = %entry.user_id, "ranked score without participant record");
                continue;
            };

            let aggregate = aggregates
                .get(entry.user_id.as_str())
                .copied()
                .unwrap_or_default();

            entries.push(LeaderboardEntry {
                rank: position as u64 + 1,
                user_id: entry.user_id,
                user_name: participant.user_name,
                user_picture: participant.user_picture,
                score: entry.score,
                accuracy: aggregate.accuracy(),
                avg_time_per_question_ms: aggregate.avg_time_ms(),
            });
        }

        Ok(entries)
    }

    /// A participant's 1-indexed rank, or `None` when they hold no score.
    pub async fn user_rank(&self, code: &str, user_id: &str) -> Result<Option<u64>, StoreError> {
        let rank = self
            .with_backend(|backend| backend.score_rank(code, user_id))
            .await?;
        Ok(rank.map(|rank| rank + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::dao::models::Opaque;

    fn answer(user_id: &str, is_correct: bool, time_spent_ms: u64) -> AnswerEntity {
        AnswerEntity {
            user_id: user_id.into(),
            question_id: "q".into(),
            selected_answer: Opaque::new(serde_json::json!(0)),
            is_correct,
            points: if is_correct { 10 } else { 0 },
            answered_at: Utc::now(),
            time_spent_ms,
        }
    }

    #[test]
    fn aggregates_fold_per_user() {
        let answers = vec![
            answer("U1", true, 1000),
            answer("U1", false, 3000),
            answer("U2", true, 500),
        ];

        let aggregates = AnswerAggregate::fold(&answers);

        let u1 = aggregates["U1"];
        assert_eq!(u1.answered, 2);
        assert_eq!(u1.correct, 1);
        assert!((u1.accuracy() - 0.5).abs() < f64::EPSILON);
        assert!((u1.avg_time_ms() - 2000.0).abs() < f64::EPSILON);

        let u2 = aggregates["U2"];
        assert!((u2.accuracy() - 1.0).abs() < f64::EPSILON);
        assert!((u2.avg_time_ms() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_aggregate_reads_as_zero() {
        let aggregate = AnswerAggregate::default();
        assert_eq!(aggregate.accuracy(), 0.0);
        assert_eq!(aggregate.avg_time_ms(), 0.0);
    }
}
