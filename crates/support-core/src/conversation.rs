/// Append-only conversation transcripts.
///
/// A transcript holds the user turns and the final assistant answers of one
/// conversation. It is handed to the dispatch loop as history on each turn.
/// Transcripts live in Redis when it is reachable and in process memory otherwise.
/// Both backends forget a conversation once it has been idle for the store's TTL.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::openai::Message;

static CONVO_COUNTER: AtomicU64 = AtomicU64::new(0);

const KEY_PREFIX: &str = "support:v1:convo:";

/// First element of every Redis transcript list. Redis drops empty lists, so a
/// freshly started conversation needs something to hold its key.
const START_MARKER: &str = "#start";

pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(86_400);

pub type ConversationId = String;

#[derive(Debug)]
struct Transcript {
    messages: Vec<Message>,
    touched: Instant,
}

#[derive(Clone)]
enum Backend {
    Redis(redis::Client),
    Memory(Arc<RwLock<HashMap<ConversationId, Transcript>>>),
}

#[derive(Clone)]
pub struct ConversationStore {
    backend: Backend,
    ttl: Duration,
}

impl ConversationStore {
    /// Use Redis at `redis_url` if it answers a PING, otherwise keep transcripts in memory.
    pub async fn connect(redis_url: Option<&str>, ttl: Duration) -> Self {
        let client = redis_url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "failed to create redis client"))
                .ok()
        });

        if let Some(client) = client {
            if ping(&client).await {
                return Self {
                    backend: Backend::Redis(client),
                    ttl,
                };
            }
            warn!("redis unreachable, keeping conversations in memory");
        }
        Self::in_memory(ttl)
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            ttl,
        }
    }

    pub fn is_redis(&self) -> bool {
        matches!(self.backend, Backend::Redis(_))
    }

    /// Register a new, empty conversation. `None` if it could not be stored.
    pub async fn start(&self) -> Option<ConversationId> {
        let id = new_conversation_id();
        match &self.backend {
            Backend::Redis(client) => {
                let mut conn = connection(client).await?;
                let key = convo_key(&id);
                let stored: redis::RedisResult<()> = redis::pipe()
                    .atomic()
                    .del(&key)
                    .ignore()
                    .rpush(&key, START_MARKER)
                    .ignore()
                    .expire(&key, self.ttl_secs())
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = stored {
                    warn!(error = %e, key, "storing new conversation failed");
                    return None;
                }
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                self.evict_idle(&mut map);
                map.insert(
                    id.clone(),
                    Transcript {
                        messages: Vec::new(),
                        touched: Instant::now(),
                    },
                );
            }
        }
        Some(id)
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Vec<Message>> {
        match &self.backend {
            Backend::Redis(client) => {
                let mut conn = connection(client).await?;
                let key = convo_key(conversation_id);
                let raw: Vec<String> = conn
                    .lrange(&key, 0, -1)
                    .await
                    .inspect_err(|e| warn!(error = %e, key, "reading transcript failed"))
                    .ok()?;
                decode_transcript(conversation_id, raw)
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                self.evict_idle(&mut map);
                map.get(conversation_id).map(|t| t.messages.clone())
            }
        }
    }

    /// Append `messages` to an existing transcript and refresh its TTL. Returns
    /// `false` if the conversation is unknown or could not be written.
    ///
    /// Concurrent appends to one conversation never overwrite each other.
    pub async fn append(&self, conversation_id: &str, messages: &[Message]) -> bool {
        match &self.backend {
            Backend::Redis(client) => {
                let encoded: Result<Vec<String>, _> =
                    messages.iter().map(serde_json::to_string).collect();
                let Ok(encoded) = encoded else {
                    return false;
                };
                let Some(mut conn) = connection(client).await else {
                    return false;
                };
                let key = convo_key(conversation_id);
                // RPUSHX only pushes onto an existing list, so unknown ids stay unknown.
                let pushed: redis::RedisResult<(u64,)> = redis::pipe()
                    .atomic()
                    .cmd("RPUSHX")
                    .arg(&key)
                    .arg(&encoded)
                    .expire(&key, self.ttl_secs())
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                match pushed {
                    Ok((len,)) => len > 0,
                    Err(e) => {
                        warn!(error = %e, key, "appending to transcript failed");
                        false
                    }
                }
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                self.evict_idle(&mut map);
                match map.get_mut(conversation_id) {
                    Some(transcript) => {
                        transcript.messages.extend_from_slice(messages);
                        transcript.touched = Instant::now();
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Forget a conversation. Returns `true` if it existed.
    pub async fn end(&self, conversation_id: &str) -> bool {
        match &self.backend {
            Backend::Redis(client) => {
                let Some(mut conn) = connection(client).await else {
                    return false;
                };
                let key = convo_key(conversation_id);
                match conn.del::<_, u64>(&key).await {
                    Ok(removed) => removed > 0,
                    Err(e) => {
                        warn!(error = %e, key, "deleting transcript failed");
                        false
                    }
                }
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                self.evict_idle(&mut map);
                map.remove(conversation_id).is_some()
            }
        }
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs().max(1)).unwrap_or(i64::MAX)
    }

    fn evict_idle(&self, map: &mut HashMap<ConversationId, Transcript>) {
        let before = map.len();
        map.retain(|_, t| t.touched.elapsed() < self.ttl);
        let evicted = before - map.len();
        if evicted > 0 {
            debug!(evicted, "idle conversations evicted");
        }
    }
}

/// `None` when the list is missing (never started or expired).
fn decode_transcript(conversation_id: &str, raw: Vec<String>) -> Option<Vec<Message>> {
    let mut items = raw.into_iter();
    if items.next()? != START_MARKER {
        warn!(conversation_id, "transcript without start marker");
        return None;
    }
    let mut messages = Vec::new();
    for item in items {
        match serde_json::from_str::<Message>(&item) {
            Ok(message) => messages.push(message),
            Err(e) => warn!(error = %e, conversation_id, "skipping corrupt transcript entry"),
        }
    }
    Some(messages)
}

async fn connection(client: &redis::Client) -> Option<MultiplexedConnection> {
    match client.get_multiplexed_async_connection().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!(error = %e, "cannot reach redis");
            None
        }
    }
}

async fn ping(client: &redis::Client) -> bool {
    let Some(mut conn) = connection(client).await else {
        return false;
    };
    let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    pong.is_ok()
}

fn convo_key(conversation_id: &str) -> String {
    format!("{KEY_PREFIX}{conversation_id}")
}

/// 128 bits of SHA-256 over the clock, the pid and a process-wide counter, as hex.
fn new_conversation_id() -> ConversationId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = CONVO_COUNTER.fetch_add(1, Ordering::Relaxed);

    let digest = Sha256::new()
        .chain_update(nanos.to_le_bytes())
        .chain_update(std::process::id().to_le_bytes())
        .chain_update(seq.to_le_bytes())
        .finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::in_memory(DEFAULT_CONVERSATION_TTL)
    }

    #[tokio::test]
    async fn transcript_is_append_only() {
        let store = store();
        let id = store.start().await.unwrap();
        assert_eq!(store.get(&id).await, Some(vec![]));

        assert!(store.append(&id, &[Message::user("Кредит 500 тысяч на год под 15%")]).await);
        assert!(store.append(&id, &[Message::assistant("Платёж 45 129,16 руб.")]).await);

        let transcript = store.get(&id).await.unwrap();
        let roles: Vec<&str> = transcript.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_created_by_append() {
        let store = store();
        assert!(!store.append("missing", &[Message::user("привет")]).await);
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn end_forgets_transcript() {
        let store = store();
        let id = store.start().await.unwrap();
        assert!(store.end(&id).await);
        assert!(!store.end(&id).await);
        assert_eq!(store.get(&id).await, None);
    }

    #[tokio::test]
    async fn idle_conversations_expire_in_memory() {
        let store = ConversationStore::in_memory(Duration::from_millis(100));
        let idle = store.start().await.unwrap();
        let active = store.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.append(&active, &[Message::user("ещё здесь")]).await);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get(&idle).await, None);
        assert!(!store.append(&idle, &[Message::user("поздно")]).await);
        assert_eq!(store.get(&active).await.map(|t| t.len()), Some(1));

        let Backend::Memory(map) = &store.backend else {
            panic!("expected in-memory backend");
        };
        assert_eq!(map.read().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_turn() {
        let store = store();
        let id = store.start().await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .append(&id, &[Message::user(format!("вопрос {i}")), Message::assistant("ответ")])
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(store.get(&id).await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn missing_redis_falls_back_to_memory() {
        let store = ConversationStore::connect(None, DEFAULT_CONVERSATION_TTL).await;
        assert!(!store.is_redis());
    }

    /// Runs against a live server only when `SUPPORT_TEST_REDIS_URL` is set.
    #[tokio::test]
    async fn redis_appends_are_atomic() {
        let Ok(url) = std::env::var("SUPPORT_TEST_REDIS_URL") else {
            return;
        };
        let store = ConversationStore::connect(Some(&url), Duration::from_secs(60)).await;
        assert!(store.is_redis());

        let id = store.start().await.unwrap();
        assert_eq!(store.get(&id).await, Some(vec![]));
        assert!(!store.append("missing", &[Message::user("привет")]).await);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .append(&id, &[Message::user(format!("вопрос {i}")), Message::assistant("ответ")])
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(store.get(&id).await.unwrap().len(), 16);
        assert!(store.end(&id).await);
        assert_eq!(store.get(&id).await, None);
    }

    #[test]
    fn decoding_requires_the_start_marker() {
        assert_eq!(decode_transcript("c", vec![]), None);
        assert_eq!(decode_transcript("c", vec!["{}".to_string()]), None);
        assert_eq!(
            decode_transcript("c", vec![START_MARKER.to_string()]),
            Some(vec![])
        );

        let user = serde_json::to_string(&Message::user("привет")).unwrap();
        let decoded = decode_transcript(
            "c",
            vec![START_MARKER.to_string(), user, "not json".to_string()],
        )
        .unwrap();
        assert_eq!(decoded, vec![Message::user("привет")]);
    }

    #[test]
    fn conversation_ids_are_distinct_hex() {
        let a = new_conversation_id();
        let b = new_conversation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
