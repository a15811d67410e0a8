// Best-effort JSON persistence: credentials + per-identity chat state.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::store::Conversation;
use super::AppCore;
use crate::error::ChatError;
use crate::state::{Identity, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct PersistedChatState {
    pub(super) selected_peer: Option<UserId>,
    pub(super) conversations: HashMap<UserId, Conversation>,
}

impl AppCore {
    fn credentials_path(&self) -> PathBuf {
        std::path::Path::new(&self.data_dir).join("credentials.json")
    }

    fn chat_state_path(&self, identity_id: UserId) -> PathBuf {
        std::path::Path::new(&self.data_dir).join(format!("chat_state_{identity_id}.json"))
    }

    /// Saved credentials decide whether a session auto-resumes at startup.
    pub(super) fn load_credentials(&self) -> Option<Identity> {
        let data = std::fs::read_to_string(self.credentials_path()).ok()?;
        serde_json::from_str(&data).ok()
    }

    pub(super) fn save_credentials(&mut self, identity: &Identity) {
        if let Err(e) = self.try_save_credentials(identity) {
            tracing::warn!(%e, "could not save credentials");
            self.toast(ChatError::Storage(e.to_string()).to_string());
        }
    }

    fn try_save_credentials(&self, identity: &Identity) -> Result<()> {
        let json = serde_json::to_string(identity)?;
        std::fs::write(self.credentials_path(), json).context("write credentials")?;
        Ok(())
    }

    pub(super) fn clear_credentials(&self) {
        let _ = std::fs::remove_file(self.credentials_path());
    }

    /// Restore the conversation map and last selection for an identity.
    /// Restored data is reconciled with fresh history fetches through the
    /// store's dedup rule, never replaced.
    pub(super) fn load_chat_state(&self, identity_id: UserId) -> Option<PersistedChatState> {
        let data = std::fs::read_to_string(self.chat_state_path(identity_id)).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Best-effort for the in-memory state (a failed write never blocks the
    /// merge that triggered it), but the failure itself surfaces as a toast.
    pub(super) fn save_chat_state(&mut self) {
        if let Err(e) = self.try_save_chat_state() {
            tracing::warn!(%e, "could not save chat state");
            self.toast(ChatError::Storage(e.to_string()).to_string());
        }
    }

    fn try_save_chat_state(&self) -> Result<()> {
        let Some(sess) = self.session.as_ref() else {
            return Ok(());
        };
        let persisted = PersistedChatState {
            selected_peer: self.state.selected_peer,
            conversations: sess.store.conversations().clone(),
        };
        let json = serde_json::to_string(&persisted)?;
        std::fs::write(self.chat_state_path(sess.identity.id), json).context("write chat state")?;
        Ok(())
    }
}
