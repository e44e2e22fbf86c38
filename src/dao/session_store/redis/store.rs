use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::{StreamExt, future::BoxFuture};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{
    config::RedisConfig,
    connection::establish_connection,
    error::{RedisDaoError, RedisResult},
};
use crate::dao::{
    models::{AnswerEntity, Opaque, ParticipantEntity, ScoreEntry, SessionEntity, SessionEvent},
    session_store::{BackendKind, SessionBackend},
    storage::StorageResult,
};

/// Capacity of each per-session local broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Key and channel layout for one namespace prefix.
///
/// Every structure of a session lives under `<prefix>:<kind>:<code>` so a
/// cascade delete is a single multi-key `DEL`.
#[derive(Clone)]
struct KeySpace {
    prefix: String,
    ttl_secs: i64,
}

impl KeySpace {
    fn session(&self, code: &str) -> String {
        format!("{}:session:{}", self.prefix, code)
    }

    fn leaderboard(&self, code: &str) -> String {
        format!("{}:leaderboard:{}", self.prefix, code)
    }

    fn participants(&self, code: &str) -> String {
        format!("{}:participants:{}", self.prefix, code)
    }

    fn answers(&self, code: &str) -> String {
        format!("{}:answers:{}", self.prefix, code)
    }

    fn quiz(&self, code: &str) -> String {
        format!("{}:quiz:{}", self.prefix, code)
    }

    fn current_question(&self, code: &str) -> String {
        format!("{}:current-question:{}", self.prefix, code)
    }

    fn channel(&self, code: &str) -> String {
        format!("{}:events:{}", self.prefix, code)
    }

    fn channel_prefix(&self) -> String {
        format!("{}:events:", self.prefix)
    }

    fn session_pattern(&self) -> String {
        format!("{}:session:*", self.prefix)
    }

    fn tree(&self, code: &str) -> [String; 6] {
        [
            self.session(code),
            self.leaderboard(code),
            self.participants(code),
            self.answers(code),
            self.quiz(code),
            self.current_question(code),
        ]
    }
}

/// Control messages for the pub/sub driver task.
enum PubSubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Distributed [`SessionBackend`] over a single logical Redis instance.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
    keys: KeySpace,
    hub: Arc<DashMap<String, broadcast::Sender<SessionEvent>>>,
    control: mpsc::UnboundedSender<PubSubCommand>,
}

impl RedisSessionStore {
    /// Connect to one candidate, probe it with `PING`, and start the
    /// pub/sub driver task.
    pub async fn connect(config: RedisConfig) -> RedisResult<Self> {
        let (client, connection) = establish_connection(&config).await?;

        let keys = KeySpace {
            prefix: config.key_prefix.clone(),
            ttl_secs: config.session_ttl.as_secs() as i64,
        };

        let hub: Arc<DashMap<String, broadcast::Sender<SessionEvent>>> = Arc::new(DashMap::new());
        let control = spawn_pubsub_driver(client, keys.channel_prefix(), hub.clone());

        let store = Self {
            connection,
            keys,
            hub,
            control,
        };

        store.ping().await?;
        Ok(store)
    }

    async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|source| RedisDaoError::Global {
                command: "PING",
                source,
            })?;
        Ok(())
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> RedisResult<String> {
        serde_json::to_string(value).map_err(|source| RedisDaoError::Encode {
            key: key.to_owned(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> RedisResult<T> {
        serde_json::from_str(raw).map_err(|source| RedisDaoError::Decode {
            key: key.to_owned(),
            source,
        })
    }

    async fn put_session(&self, session: SessionEntity) -> RedisResult<()> {
        let code = session.session_code.clone();
        let key = self.keys.session(&code);
        let payload = Self::encode(&key, &session)?;
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(&key, payload, self.keys.ttl_secs as u64)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "SET session",
                code,
                source,
            })
    }

    async fn get_session(&self, code: &str) -> RedisResult<Option<SessionEntity>> {
        let key = self.keys.session(code);
        let mut conn = self.connection.clone();

        let raw: Option<String> =
            conn.get(&key)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "GET session",
                    code: code.to_owned(),
                    source,
                })?;

        raw.map(|raw| Self::decode(&key, &raw)).transpose()
    }

    /// Remove the whole session tree as one pipeline so no child key can
    /// outlive the session record.
    async fn delete_session(&self, code: &str) -> RedisResult<bool> {
        let keys = self.keys.tree(code).to_vec();
        let mut conn = self.connection.clone();

        let removed: u64 = conn
            .del(keys)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "DEL session tree",
                code: code.to_owned(),
                source,
            })?;

        // Local fan-out for this code is finished as well.
        if self.hub.remove(code).is_some() {
            let _ = self
                .control
                .send(PubSubCommand::Unsubscribe(self.keys.channel(code)));
        }

        Ok(removed > 0)
    }

    async fn touch_session(&self, code: &str) -> RedisResult<bool> {
        let mut pipe = redis::pipe();
        for key in self.keys.tree(code) {
            pipe.expire(key, self.keys.ttl_secs);
        }

        let mut conn = self.connection.clone();
        let refreshed: Vec<bool> =
            pipe.query_async(&mut conn)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "EXPIRE session tree",
                    code: code.to_owned(),
                    source,
                })?;

        Ok(refreshed.first().copied().unwrap_or(false))
    }

    async fn session_count(&self) -> RedisResult<u64> {
        let pattern = self.keys.session_pattern();
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut count: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|source| RedisDaoError::Global {
                    command: "SCAN sessions",
                    source,
                })?;

            count += keys.len() as u64;
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(count)
    }

    async fn put_participant(&self, code: &str, participant: ParticipantEntity) -> RedisResult<()> {
        let key = self.keys.participants(code);
        let payload = Self::encode(&key, &participant)?;
        let mut conn = self.connection.clone();

        let mut pipe = redis::pipe();
        pipe.hset(&key, &participant.user_id, payload)
            .expire(&key, self.keys.ttl_secs);
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "HSET participant",
                code: code.to_owned(),
                source,
            })?;

        Ok(())
    }

    async fn get_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> RedisResult<Option<ParticipantEntity>> {
        let key = self.keys.participants(code);
        let mut conn = self.connection.clone();

        let raw: Option<String> =
            conn.hget(&key, user_id)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "HGET participant",
                    code: code.to_owned(),
                    source,
                })?;

        raw.map(|raw| Self::decode(&key, &raw)).transpose()
    }

    async fn all_participants(&self, code: &str) -> RedisResult<Vec<ParticipantEntity>> {
        let key = self.keys.participants(code);
        let mut conn = self.connection.clone();

        let raw: std::collections::HashMap<String, String> =
            conn.hgetall(&key)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "HGETALL participants",
                    code: code.to_owned(),
                    source,
                })?;

        raw.values()
            .map(|value| Self::decode(&key, value))
            .collect()
    }

    /// Drop the participant record and their leaderboard entry together so
    /// the join never sees a score without its participant.
    async fn remove_participant(&self, code: &str, user_id: &str) -> RedisResult<bool> {
        let participants = self.keys.participants(code);
        let leaderboard = self.keys.leaderboard(code);
        let mut conn = self.connection.clone();

        let mut pipe = redis::pipe();
        pipe.hdel(&participants, user_id).zrem(&leaderboard, user_id);
        let (removed, _): (u64, u64) =
            pipe.query_async(&mut conn)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "HDEL participant",
                    code: code.to_owned(),
                    source,
                })?;

        Ok(removed > 0)
    }

    async fn participant_count(&self, code: &str) -> RedisResult<u64> {
        let key = self.keys.participants(code);
        let mut conn = self.connection.clone();

        conn.hlen(&key)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "HLEN participants",
                code: code.to_owned(),
                source,
            })
    }

    async fn increment_score(&self, code: &str, user_id: &str, delta: i64) -> RedisResult<i64> {
        let key = self.keys.leaderboard(code);
        let mut conn = self.connection.clone();

        // ZINCRBY is the backend's atomic counter primitive; interleaved
        // calls from any number of workers always sum. The EXPIRE rides in
        // the same pipeline so the sorted set never outlives the tree.
        let mut pipe = redis::pipe();
        pipe.zincr(&key, user_id, delta)
            .expire(&key, self.keys.ttl_secs);
        let (score, _): (f64, bool) =
            pipe.query_async(&mut conn)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "ZINCRBY leaderboard",
                    code: code.to_owned(),
                    source,
                })?;

        Ok(score as i64)
    }

    async fn top_scores(&self, code: &str, limit: usize) -> RedisResult<Vec<ScoreEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = self.keys.leaderboard(code);
        let mut conn = self.connection.clone();

        let entries: Vec<(String, f64)> = conn
            .zrevrange_withscores(&key, 0, limit as isize - 1)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "ZREVRANGE leaderboard",
                code: code.to_owned(),
                source,
            })?;

        Ok(entries
            .into_iter()
            .map(|(user_id, score)| ScoreEntry {
                user_id,
                score: score as i64,
            })
            .collect())
    }

    async fn score_rank(&self, code: &str, user_id: &str) -> RedisResult<Option<u64>> {
        let key = self.keys.leaderboard(code);
        let mut conn = self.connection.clone();

        redis::cmd("ZREVRANK")
            .arg(&key)
            .arg(user_id)
            .query_async::<Option<u64>>(&mut conn)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "ZREVRANK leaderboard",
                code: code.to_owned(),
                source,
            })
    }

    async fn push_answer(&self, code: &str, answer: AnswerEntity) -> RedisResult<()> {
        let key = self.keys.answers(code);
        let payload = Self::encode(&key, &answer)?;
        let mut conn = self.connection.clone();

        let mut pipe = redis::pipe();
        pipe.rpush(&key, payload).expire(&key, self.keys.ttl_secs);
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "RPUSH answer",
                code: code.to_owned(),
                source,
            })?;

        Ok(())
    }

    async fn all_answers(&self, code: &str) -> RedisResult<Vec<AnswerEntity>> {
        let key = self.keys.answers(code);
        let mut conn = self.connection.clone();

        let raw: Vec<String> =
            conn.lrange(&key, 0, -1)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "LRANGE answers",
                    code: code.to_owned(),
                    source,
                })?;

        raw.iter().map(|value| Self::decode(&key, value)).collect()
    }

    async fn answer_count(&self, code: &str) -> RedisResult<u64> {
        let key = self.keys.answers(code);
        let mut conn = self.connection.clone();

        conn.llen(&key)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "LLEN answers",
                code: code.to_owned(),
                source,
            })
    }

    async fn put_quiz(&self, code: &str, payload: Opaque) -> RedisResult<()> {
        let key = self.keys.quiz(code);
        let encoded = Self::encode(&key, &payload)?;
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(&key, encoded, self.keys.ttl_secs as u64)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "SET quiz",
                code: code.to_owned(),
                source,
            })
    }

    async fn get_quiz(&self, code: &str) -> RedisResult<Option<Opaque>> {
        let key = self.keys.quiz(code);
        let mut conn = self.connection.clone();

        let raw: Option<String> =
            conn.get(&key)
                .await
                .map_err(|source| RedisDaoError::Command {
                    command: "GET quiz",
                    code: code.to_owned(),
                    source,
                })?;

        raw.map(|raw| Self::decode(&key, &raw)).transpose()
    }

    async fn set_current_question(&self, code: &str, index: u32) -> RedisResult<()> {
        let key = self.keys.current_question(code);
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(&key, index, self.keys.ttl_secs as u64)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "SET current-question",
                code: code.to_owned(),
                source,
            })
    }

    async fn get_current_question(&self, code: &str) -> RedisResult<Option<u32>> {
        let key = self.keys.current_question(code);
        let mut conn = self.connection.clone();

        conn.get(&key)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "GET current-question",
                code: code.to_owned(),
                source,
            })
    }

    async fn publish(&self, code: &str, event: SessionEvent) -> RedisResult<()> {
        let channel = self.keys.channel(code);
        let payload = Self::encode(&channel, &event)?;
        let mut conn = self.connection.clone();

        conn.publish::<_, _, ()>(&channel, payload)
            .await
            .map_err(|source| RedisDaoError::Command {
                command: "PUBLISH event",
                code: code.to_owned(),
                source,
            })
    }

    /// Register a local receiver for a session channel, subscribing the
    /// shared pub/sub connection on first use.
    fn subscribe(&self, code: &str) -> RedisResult<broadcast::Receiver<SessionEvent>> {
        match self.hub.entry(code.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                entry.insert(sender);
                self.control
                    .send(PubSubCommand::Subscribe(self.keys.channel(code)))
                    .map_err(|_| RedisDaoError::PubSubClosed)?;
                Ok(receiver)
            }
        }
    }
}

/// Spawn the task owning the dedicated pub/sub connection. Incoming
/// messages are routed into the per-session local hubs; the returned sender
/// carries subscribe/unsubscribe requests into the task.
fn spawn_pubsub_driver(
    client: Client,
    channel_prefix: String,
    hub: Arc<DashMap<String, broadcast::Sender<SessionEvent>>>,
) -> mpsc::UnboundedSender<PubSubCommand> {
    let (control, mut requests) = mpsc::unbounded_channel::<PubSubCommand>();

    tokio::spawn(async move {
        let pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!(error = %err, "failed to open pub/sub connection; session events disabled");
                return;
            }
        };
        let (mut sink, mut stream) = pubsub.split();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(PubSubCommand::Subscribe(channel)) => {
                        if let Err(err) = sink.subscribe(&channel).await {
                            warn!(%channel, error = %err, "pub/sub subscribe failed");
                        }
                    }
                    Some(PubSubCommand::Unsubscribe(channel)) => {
                        let _ = sink.unsubscribe(&channel).await;
                    }
                    None => break,
                },
                message = stream.next() => match message {
                    Some(message) => route_message(&hub, &channel_prefix, message),
                    None => {
                        debug!("pub/sub stream closed");
                        break;
                    }
                },
            }
        }
    });

    control
}

fn route_message(
    hub: &DashMap<String, broadcast::Sender<SessionEvent>>,
    channel_prefix: &str,
    message: redis::Msg,
) {
    let channel = message.get_channel_name().to_owned();
    let Some(code) = channel.strip_prefix(channel_prefix) else {
        return;
    };

    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%channel, error = %err, "undecodable pub/sub payload");
            return;
        }
    };

    match serde_json::from_str::<SessionEvent>(&payload) {
        Ok(event) => {
            if let Some(sender) = hub.get(code) {
                // Delivery errors just mean no local subscriber is listening.
                let _ = sender.send(event);
            }
        }
        Err(err) => warn!(%channel, error = %err, "malformed session event dropped"),
    }
}

impl SessionBackend for RedisSessionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    fn put_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.put_session(session).await.map_err(Into::into) })
    }

    fn get_session(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.get_session(&code).await.map_err(Into::into) })
    }

    fn delete_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.delete_session(&code).await.map_err(Into::into) })
    }

    fn touch_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.touch_session(&code).await.map_err(Into::into) })
    }

    fn session_count(&self) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.session_count().await.map_err(Into::into) })
    }

    fn put_participant(
        &self,
        code: &str,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move {
            store
                .put_participant(&code, participant)
                .await
                .map_err(Into::into)
        })
    }

    fn get_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            store
                .get_participant(&code, &user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn all_participants(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.all_participants(&code).await.map_err(Into::into) })
    }

    fn remove_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let code = code.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            store
                .remove_participant(&code, &user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn participant_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.participant_count(&code).await.map_err(Into::into) })
    }

    fn increment_score(
        &self,
        code: &str,
        user_id: &str,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        let code = code.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            store
                .increment_score(&code, &user_id, delta)
                .await
                .map_err(Into::into)
        })
    }

    fn top_scores(
        &self,
        code: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.top_scores(&code, limit).await.map_err(Into::into) })
    }

    fn score_rank(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<u64>>> {
        let store = self.clone();
        let code = code.to_owned();
        let user_id = user_id.to_owned();
        Box::pin(async move { store.score_rank(&code, &user_id).await.map_err(Into::into) })
    }

    fn push_answer(
        &self,
        code: &str,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.push_answer(&code, answer).await.map_err(Into::into) })
    }

    fn all_answers(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.all_answers(&code).await.map_err(Into::into) })
    }

    fn answer_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.answer_count(&code).await.map_err(Into::into) })
    }

    fn put_quiz(&self, code: &str, payload: Opaque) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.put_quiz(&code, payload).await.map_err(Into::into) })
    }

    fn get_quiz(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<Opaque>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.get_quiz(&code).await.map_err(Into::into) })
    }

    fn set_current_question(
        &self,
        code: &str,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move {
            store
                .set_current_question(&code, index)
                .await
                .map_err(Into::into)
        })
    }

    fn get_current_question(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<u32>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.get_current_question(&code).await.map_err(Into::into) })
    }

    fn publish(&self, code: &str, event: SessionEvent) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.publish(&code, event).await.map_err(Into::into) })
    }

    fn subscribe(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<broadcast::Receiver<SessionEvent>>>> {
        let store = self.clone();
        let code = code.to_owned();
        Box::pin(async move { store.subscribe(&code).map(Some).map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}
