use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque JSON payload produced and validated by an external collaborator.
///
/// The store keeps these verbatim and never assumes internal structure;
/// session settings, quiz metadata and the cached quiz snapshot all use it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Opaque(pub serde_json::Value);

impl Opaque {
    /// Wrap an arbitrary JSON value without inspecting it.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the wrapped JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for Opaque {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a live quiz session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session exists and accepts joins, gameplay has not started.
    Waiting,
    /// Gameplay in progress.
    Active,
    /// Gameplay finished; the record lingers until its TTL expires.
    Ended,
}

/// Per-session state record, keyed by the session code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Unique code namespacing every other structure of this session.
    pub session_code: String,
    /// Identifier of the quiz content served in this session.
    pub quiz_id: String,
    /// Identifier of the hosting user.
    pub host_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Index of the question currently being played.
    pub current_question_index: u32,
    /// Maximum number of participants allowed to join.
    pub max_participants: u32,
    /// Opaque session settings supplied by the orchestrator.
    pub settings: Opaque,
    /// Opaque quiz metadata supplied by the quiz-content collaborator.
    pub quiz_metadata: Opaque,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the session transitions to [`SessionStatus::Active`].
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the session transitions to [`SessionStatus::Ended`].
    pub ended_at: Option<DateTime<Utc>>,
}

/// Participant record, unique per `user_id` within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantEntity {
    /// Identity supplied by the auth collaborator.
    pub user_id: String,
    /// Display name.
    pub user_name: String,
    /// Optional avatar URL.
    pub user_picture: Option<String>,
    /// Cumulative score; tracks the leaderboard counter eventually,
    /// not transactionally.
    pub score: i64,
    /// Number of correctly answered questions.
    pub correct_answers: u32,
    /// Number of incorrectly answered questions.
    pub incorrect_answers: u32,
    /// Timestamp of the join.
    pub joined_at: DateTime<Utc>,
    /// Whether the participant is currently connected.
    pub is_active: bool,
    /// Transport identifier owned by the socket layer, kept verbatim.
    pub socket_id: Option<String>,
}

/// Immutable record of a single submitted answer. Append-only; never
/// mutated or reordered once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerEntity {
    /// Identity of the answering participant.
    pub user_id: String,
    /// Identifier of the answered question.
    pub question_id: String,
    /// The submitted answer, kept opaque.
    pub selected_answer: Opaque,
    /// Whether the answer was judged correct by the orchestrator.
    pub is_correct: bool,
    /// Points awarded for this answer.
    pub points: i64,
    /// Submission timestamp.
    pub answered_at: DateTime<Utc>,
    /// Time spent on the question, in milliseconds.
    pub time_spent_ms: u64,
}

/// Member/score pair returned by the ranked-score structure, ordered by
/// score descending then `user_id` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    /// Participant identity.
    pub user_id: String,
    /// Current counter value.
    pub score: i64,
}

/// Event fanned out on a session channel by the broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    /// Event name chosen by the orchestrator.
    pub event: String,
    /// Opaque event payload.
    pub data: Opaque,
}

/// Partial update applied to a session record; `None` fields are left
/// untouched by the merge.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// New lifecycle status.
    pub status: Option<SessionStatus>,
    /// New current question index.
    pub current_question_index: Option<u32>,
    /// New participant cap.
    pub max_participants: Option<u32>,
    /// Replacement settings blob.
    pub settings: Option<Opaque>,
    /// Replacement quiz metadata blob.
    pub quiz_metadata: Option<Opaque>,
}

/// Partial update applied to a participant record.
#[derive(Debug, Clone, Default)]
pub struct ParticipantPatch {
    /// New display name.
    pub user_name: Option<String>,
    /// New avatar URL (`Some(None)` clears it).
    pub user_picture: Option<Option<String>>,
    /// New cumulative score.
    pub score: Option<i64>,
    /// New correct-answer count.
    pub correct_answers: Option<u32>,
    /// New incorrect-answer count.
    pub incorrect_answers: Option<u32>,
    /// New connectivity flag.
    pub is_active: Option<bool>,
    /// New transport identifier (`Some(None)` clears it).
    pub socket_id: Option<Option<String>>,
}

impl SessionEntity {
    /// Merge a partial update into this record, stamping `started_at` /
    /// `ended_at` on the corresponding status transitions.
    pub fn apply(&mut self, patch: SessionPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            if status == SessionStatus::Active && self.started_at.is_none() {
                self.started_at = Some(now);
            }
            if status == SessionStatus::Ended && self.ended_at.is_none() {
                self.ended_at = Some(now);
            }
            self.status = status;
        }
        if let Some(index) = patch.current_question_index {
            self.current_question_index = index;
        }
        if let Some(cap) = patch.max_participants {
            self.max_participants = cap;
        }
        if let Some(settings) = patch.settings {
            self.settings = settings;
        }
        if let Some(metadata) = patch.quiz_metadata {
            self.quiz_metadata = metadata;
        }
    }
}

impl ParticipantEntity {
    /// Merge a partial update into this record.
    pub fn apply(&mut self, patch: ParticipantPatch) {
        if let Some(name) = patch.user_name {
            self.user_name = name;
        }
        if let Some(picture) = patch.user_picture {
            self.user_picture = picture;
        }
        if let Some(score) = patch.score {
            self.score = score;
        }
        if let Some(correct) = patch.correct_answers {
            self.correct_answers = correct;
        }
        if let Some(incorrect) = patch.incorrect_answers {
            self.incorrect_answers = incorrect;
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        if let Some(socket) = patch.socket_id {
            self.socket_id = socket;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(code: &str) -> SessionEntity {
        SessionEntity {
            session_code: code.into(),
            quiz_id: "Q1".into(),
            host_id: "H1".into(),
            status: SessionStatus::Waiting,
            current_question_index: 0,
            max_participants: 100,
            settings: Opaque::default(),
            quiz_metadata: Opaque::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn activating_a_session_stamps_started_at() {
        let mut record = session("ABC123");
        let now = Utc::now();

        record.apply(
            SessionPatch {
                status: Some(SessionStatus::Active),
                ..Default::default()
            },
            now,
        );

        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.started_at, Some(now));
        assert_eq!(record.ended_at, None);
    }

    #[test]
    fn ending_a_session_keeps_existing_started_at() {
        let mut record = session("ABC123");
        let started = Utc::now();
        record.apply(
            SessionPatch {
                status: Some(SessionStatus::Active),
                ..Default::default()
            },
            started,
        );

        let ended = Utc::now();
        record.apply(
            SessionPatch {
                status: Some(SessionStatus::Ended),
                ..Default::default()
            },
            ended,
        );

        assert_eq!(record.started_at, Some(started));
        assert_eq!(record.ended_at, Some(ended));
    }

    #[test]
    fn merge_leaves_unset_fields_alone() {
        let mut record = session("ABC123");
        record.apply(
            SessionPatch {
                current_question_index: Some(4),
                ..Default::default()
            },
            Utc::now(),
        );

        assert_eq!(record.current_question_index, 4);
        assert_eq!(record.status, SessionStatus::Waiting);
        assert_eq!(record.max_participants, 100);
    }
}
