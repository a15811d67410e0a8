// Notification routing: decide, dedup, expire.

use crate::state::{now_ms, Notification, StoredMessage, UserId};

const UNKNOWN_SENDER: &str = "unknown sender";

/// Pending transient alerts, in arrival order. Arrival order is a contract:
/// it determines which stacking slot each notification occupies, so the set
/// is a Vec and never re-sorted. The router owns no timers and performs no
/// side effects; the actor schedules expiry and applies the click-through
/// selection itself.
#[derive(Default)]
pub struct NotificationRouter {
    pending: Vec<Notification>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[Notification] {
        &self.pending
    }

    /// Invoked once per appended message. Raises iff the message is
    /// addressed to the identity and its sender is not the open
    /// conversation; suppressed when a notification for the same source
    /// message is already pending.
    pub fn on_appended(
        &mut self,
        msg: &StoredMessage,
        identity_id: UserId,
        active_peer: Option<UserId>,
        resolve_name: &dyn Fn(UserId) -> Option<String>,
    ) -> Option<Notification> {
        if msg.receiver_id != identity_id {
            // Local identity's own messages never notify.
            return None;
        }
        if active_peer == Some(msg.sender_id) {
            // The user is looking at this conversation already.
            return None;
        }
        if self
            .pending
            .iter()
            .any(|n| n.source_message_id == msg.id)
        {
            return None;
        }

        let notification = Notification {
            source_message_id: msg.id.clone(),
            sender_id: msg.sender_id,
            sender_name: resolve_name(msg.sender_id)
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            preview: msg.content.clone(),
            created_at_ms: now_ms(),
        };
        self.pending.push(notification.clone());
        Some(notification)
    }

    /// Explicit dismissal. Returns whether anything was removed.
    pub fn dismiss(&mut self, source_message_id: &str) -> bool {
        let before = self.pending.len();
        self.pending
            .retain(|n| n.source_message_id != source_message_id);
        self.pending.len() != before
    }

    /// Click-through: dismisses and hands back the sender id so the caller
    /// can switch the open conversation. The router never reaches into the
    /// selector itself.
    pub fn click(&mut self, source_message_id: &str) -> Option<UserId> {
        let sender = self
            .pending
            .iter()
            .find(|n| n.source_message_id == source_message_id)
            .map(|n| n.sender_id)?;
        self.dismiss(source_message_id);
        Some(sender)
    }

    /// TTL expiry. Identical to dismissal; kept separate so expiry timers
    /// firing after a manual dismiss are a clean no-op.
    pub fn expire(&mut self, source_message_id: &str) -> bool {
        self.dismiss(source_message_id)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
