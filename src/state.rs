use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// The logged-in user. Immutable for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub nickname: String,
}

/// Another user in the directory. `public_key` is `None` until the key
/// lookup succeeds; sending to such a peer is rejected before encryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: UserId,
    pub nickname: String,
    pub public_key: Option<String>,
}

/// One message of a pairwise conversation. Server-assigned ids are decimal
/// strings; optimistic local echoes carry a uuid until the server copy
/// arrives and the tuple dedup rule reconciles them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub encrypted_content: String,
    #[serde(with = "iso_instant")]
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Dual dedup rule: same id, or same (sender, receiver, content,
    /// timestamp) tuple for copies that crossed channels under different ids.
    pub fn is_duplicate_of(&self, other: &StoredMessage) -> bool {
        self.id == other.id
            || (self.sender_id == other.sender_id
                && self.receiver_id == other.receiver_id
                && self.content == other.content
                && self.timestamp == other.timestamp)
    }
}

/// Lightweight per-conversation preview, rebuilt from history fetches and
/// updated last-write-wins on live ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub last_encrypted: String,
    pub last_content: String,
    pub last_sender_name: String,
    #[serde(with = "iso_instant")]
    pub last_timestamp: DateTime<Utc>,
}

/// Transient alert for a message outside the open conversation. Lives only
/// in the router's pending set; arrival order determines the stacking slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub source_message_id: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub preview: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { identity: Identity },
}

/// Per-peer entry of the conversation list, sorted by last activity.
#[derive(Clone, Debug)]
pub struct ConversationEntry {
    pub peer_id: UserId,
    pub peer_name: String,
    pub has_key: bool,
    pub summary: Option<ConversationSummary>,
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub connection: ConnectionState,
    pub peers: Vec<Peer>,
    pub selected_peer: Option<UserId>,
    pub conversations: Vec<ConversationEntry>,
    pub current_messages: Vec<StoredMessage>,
    pub notifications: Vec<Notification>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            connection: ConnectionState::Disconnected,
            peers: vec![],
            selected_peer: None,
            conversations: vec![],
            current_messages: vec![],
            notifications: vec![],
            toast: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.auth {
            AuthState::LoggedIn { identity } => Some(identity),
            AuthState::LoggedOut => None,
        }
    }

    pub fn peer(&self, id: UserId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    /// Display-name lookup by id. The roster is replaced wholesale on
    /// refresh, so continuity must come from ids, never positions.
    pub fn peer_name(&self, id: UserId) -> Option<String> {
        self.peer(id).map(|p| p.nickname.clone())
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// ISO-8601 instants as the server emits them. FastAPI serializes naive
/// datetimes without an offset, so deserialization falls back from RFC 3339
/// to naive-as-UTC.
pub mod iso_instant {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Ok(t.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .map(|n| Utc.from_utc_datetime(&n))
            .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
    }
}
