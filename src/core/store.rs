// Per-peer conversation logs: dedup, ordering, summaries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{iso_instant, ConversationSummary, StoredMessage, UserId};

const UNKNOWN_SENDER: &str = "unknown sender";

/// Message as it crosses the wire (REST history and push frames share the
/// shape). `id` can be absent on echo-path payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub id: Option<i64>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub encrypted_content: String,
    #[serde(with = "iso_instant")]
    pub timestamp: DateTime<Utc>,
}

impl WireMessage {
    pub fn into_stored(self) -> StoredMessage {
        StoredMessage {
            id: self
                .id
                .map(|n| n.to_string())
                .unwrap_or_else(local_message_id),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            encrypted_content: self.encrypted_content,
            timestamp: self.timestamp,
        }
    }
}

pub fn local_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Push-channel envelope. Inbound frames are wrapped `{type, data}`;
/// unknown types land in an explicit variant instead of a parse error so
/// future frame kinds degrade to a no-op.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Message { data: WireMessage },
    Error { message: String },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// New message, inserted in sorted position.
    Appended(StoredMessage),
    /// Already present under either dedup rule; summary still refreshed.
    Duplicate,
    /// The server pushed a `{type: "error"}` frame.
    ServiceError(String),
    /// Unknown frame type or unparseable payload.
    Unrecognized,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<StoredMessage>,
    pub summary: Option<ConversationSummary>,
}

/// In-memory conversation map for one identity. Owned exclusively by the
/// app actor; `load_history`, `ingest_frame` and `record_outgoing` are the
/// only mutation paths, which keeps the merge commutative with live
/// ingestion regardless of fetch timing.
pub struct MessageStore {
    identity_id: UserId,
    conversations: HashMap<UserId, Conversation>,
}

impl MessageStore {
    pub fn new(identity_id: UserId) -> Self {
        Self {
            identity_id,
            conversations: HashMap::new(),
        }
    }

    /// Rebuild a store around a previously persisted conversation map.
    pub fn from_parts(identity_id: UserId, conversations: HashMap<UserId, Conversation>) -> Self {
        Self {
            identity_id,
            conversations,
        }
    }

    pub fn into_parts(self) -> HashMap<UserId, Conversation> {
        self.conversations
    }

    pub fn conversations(&self) -> &HashMap<UserId, Conversation> {
        &self.conversations
    }

    pub fn messages(&self, peer_id: UserId) -> &[StoredMessage] {
        self.conversations
            .get(&peer_id)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Lazily create the conversation for a newly selected peer.
    pub fn touch(&mut self, peer_id: UserId) {
        self.conversations.entry(peer_id).or_default();
    }

    /// The other party of a pairwise message, or `None` when the message
    /// does not involve this identity at all (not ours to store).
    fn partner_of(&self, sender_id: UserId, receiver_id: UserId) -> Option<UserId> {
        if sender_id == self.identity_id {
            Some(receiver_id)
        } else if receiver_id == self.identity_id {
            Some(sender_id)
        } else {
            None
        }
    }

    /// Sorted insert, stable on equal timestamps: the new message lands
    /// after every existing message with the same instant, so arrival
    /// order is preserved and re-merges never reshuffle.
    fn insert_sorted(conv: &mut Conversation, msg: StoredMessage) {
        let idx = conv
            .messages
            .partition_point(|m| m.timestamp <= msg.timestamp);
        conv.messages.insert(idx, msg);
    }

    fn is_duplicate(conv: &Conversation, msg: &StoredMessage) -> bool {
        conv.messages.iter().any(|m| m.is_duplicate_of(msg))
    }

    fn summary_for(msg: &StoredMessage, resolve_name: &dyn Fn(UserId) -> Option<String>) -> ConversationSummary {
        ConversationSummary {
            last_encrypted: msg.encrypted_content.clone(),
            last_content: msg.content.clone(),
            last_sender_name: resolve_name(msg.sender_id)
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            last_timestamp: msg.timestamp,
        }
    }

    /// Merge a full history fetch (all messages for the identity, both
    /// directions) into the conversation map, then rebuild every
    /// conversation's preview in one pass over the fetched set.
    ///
    /// Idempotent, and commutative with `ingest_frame`: the dedup rule
    /// makes a re-fetch after live messages a no-op for the logs.
    pub fn load_history(
        &mut self,
        all_messages: Vec<WireMessage>,
        resolve_name: &dyn Fn(UserId) -> Option<String>,
    ) {
        let mut newest: HashMap<UserId, StoredMessage> = HashMap::new();

        for wire in all_messages {
            let Some(partner) = self.partner_of(wire.sender_id, wire.receiver_id) else {
                tracing::warn!(
                    sender = wire.sender_id,
                    receiver = wire.receiver_id,
                    "history message does not involve this identity, skipping"
                );
                continue;
            };
            let stored = wire.into_stored();

            // Strictly-newer wins; ties keep the first occurrence.
            match newest.get(&partner) {
                Some(cur) if stored.timestamp <= cur.timestamp => {}
                _ => {
                    newest.insert(partner, stored.clone());
                }
            }

            let conv = self.conversations.entry(partner).or_default();
            if !Self::is_duplicate(conv, &stored) {
                Self::insert_sorted(conv, stored);
            }
        }

        for (partner, msg) in newest {
            let conv = self.conversations.entry(partner).or_default();
            conv.summary = Some(Self::summary_for(&msg, resolve_name));
        }
    }

    /// Parse and merge one raw push frame.
    pub fn ingest_frame(
        &mut self,
        raw: &str,
        resolve_name: &dyn Fn(UserId) -> Option<String>,
    ) -> IngestOutcome {
        let frame = match serde_json::from_str::<InboundFrame>(raw) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%e, "unparseable push frame");
                return IngestOutcome::Unrecognized;
            }
        };

        let data = match frame {
            InboundFrame::Message { data } => data,
            InboundFrame::Error { message } => return IngestOutcome::ServiceError(message),
            InboundFrame::Unrecognized => return IngestOutcome::Unrecognized,
        };

        let Some(partner) = self.partner_of(data.sender_id, data.receiver_id) else {
            tracing::warn!(
                sender = data.sender_id,
                receiver = data.receiver_id,
                "push message does not involve this identity"
            );
            return IngestOutcome::Unrecognized;
        };
        let stored = data.into_stored();

        let conv = self.conversations.entry(partner).or_default();
        // Preview refreshes even for duplicates: last write wins.
        conv.summary = Some(Self::summary_for(&stored, resolve_name));

        if Self::is_duplicate(conv, &stored) {
            return IngestOutcome::Duplicate;
        }
        Self::insert_sorted(conv, stored.clone());
        IngestOutcome::Appended(stored)
    }

    /// Optimistic local echo for an outbound message. Uses a locally
    /// generated id; the tuple dedup rule reconciles it if the server's
    /// copy ever arrives under an assigned id. No rollback path: a failed
    /// hand-off to the connection leaves the echo in place.
    pub fn record_outgoing(
        &mut self,
        peer_id: UserId,
        content: String,
        encrypted_content: String,
        sender_name: String,
    ) -> StoredMessage {
        let echo = StoredMessage {
            id: local_message_id(),
            sender_id: self.identity_id,
            receiver_id: peer_id,
            content,
            encrypted_content,
            timestamp: Utc::now(),
        };
        let conv = self.conversations.entry(peer_id).or_default();
        conv.summary = Some(ConversationSummary {
            last_encrypted: echo.encrypted_content.clone(),
            last_content: echo.content.clone(),
            last_sender_name: sender_name,
            last_timestamp: echo.timestamp,
        });
        Self::insert_sorted(conv, echo.clone());
        echo
    }

    /// Apply a decrypt result (or its per-message failure placeholder) to
    /// the stored message and the conversation preview.
    pub fn apply_decrypted(&mut self, peer_id: UserId, message_id: &str, text: &str) {
        let Some(conv) = self.conversations.get_mut(&peer_id) else {
            return;
        };
        let Some(msg) = conv.messages.iter_mut().find(|m| m.id == message_id) else {
            return;
        };
        msg.content = text.to_string();
        let encrypted = msg.encrypted_content.clone();
        if let Some(summary) = conv.summary.as_mut() {
            summary.last_encrypted = encrypted;
            summary.last_content = text.to_string();
        }
    }
}
