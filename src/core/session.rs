// Session lifecycle + networking side effects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::store::MessageStore;
use super::{connection, AppCore, Session};
use crate::api::ApiClient;
use crate::error::ChatError;
use crate::state::{AuthState, ConnectionState, Identity};
use crate::updates::InternalEvent;

impl AppCore {
    pub(super) fn start_session(&mut self, identity: Identity) {
        // Tear down any existing session first.
        self.stop_session();

        self.session_epoch = self.session_epoch.wrapping_add(1);
        let epoch = self.session_epoch;
        tracing::info!(id = identity.id, nickname = %identity.nickname, "start_session");

        let api = ApiClient::new(&self.api_base_url());

        // Persisted conversations are the starting point; history fetches
        // reconcile into them through the dedup rule.
        let (selected_peer, conversations) = self
            .load_chat_state(identity.id)
            .map(|p| (p.selected_peer, p.conversations))
            .unwrap_or((None, HashMap::new()));
        let store = MessageStore::from_parts(identity.id, conversations);

        let alive = Arc::new(AtomicBool::new(true));
        let mut sess = Session {
            identity: identity.clone(),
            epoch,
            alive: alive.clone(),
            api,
            store,
            outbound: None,
            own_public_key: None,
            own_private_key: None,
        };

        if self.network_enabled() {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            sess.outbound = Some(out_tx);
            self.runtime.spawn(connection::run_connection(
                self.ws_endpoint(identity.id),
                self.reconnect_delay(),
                epoch,
                alive,
                self.core_sender.clone(),
                out_rx,
            ));
        }

        self.session = Some(sess);
        self.state.auth = AuthState::LoggedIn { identity };
        self.state.connection = ConnectionState::Disconnected;
        self.state.selected_peer = selected_peer;

        self.refresh_directory();
        self.fetch_history();
        self.rebuild_view();
        self.emit_state();
    }

    pub(super) fn stop_session(&mut self) {
        // Invalidate in-flight async results for the old session.
        self.session_epoch = self.session_epoch.wrapping_add(1);

        if let Some(sess) = self.session.take() {
            tracing::info!(id = sess.identity.id, "stop_session");
            sess.alive.store(false, Ordering::SeqCst);
            // Dropping `sess.outbound` closes the write lane; the
            // connection task exits on its next poll.
        }

        self.notifications.clear();
        self.state.auth = AuthState::LoggedOut;
        self.state.connection = ConnectionState::Disconnected;
        self.state.peers = vec![];
        self.state.selected_peer = None;
        self.state.conversations = vec![];
        self.state.current_messages = vec![];
        self.state.notifications = vec![];
    }

    pub(super) fn session_epoch_matches(&self, epoch: u64) -> bool {
        self.session
            .as_ref()
            .map(|s| s.epoch == epoch)
            .unwrap_or(false)
    }

    /// Hand an outbound wire payload to the connection. Rejected unless the
    /// observed state is `Connected`; the caller surfaces the error.
    pub(super) fn send_wire_payload(&self, payload: String) -> Result<(), ChatError> {
        if self.state.connection != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        let outbound = self
            .session
            .as_ref()
            .and_then(|s| s.outbound.as_ref())
            .ok_or(ChatError::NotConnected)?;
        outbound.send(payload).map_err(|_| ChatError::NotConnected)
    }

    /// Fetch the identity's full message history (both directions, all
    /// peers); the store filters and merges.
    pub(super) fn fetch_history(&mut self) {
        if !self.network_enabled() {
            return;
        }
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let epoch = sess.epoch;
        let me = sess.identity.id;
        let alive = sess.alive.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api.messages_for(me).await {
                Ok(messages) => InternalEvent::HistoryFetched {
                    epoch,
                    messages,
                    error: None,
                },
                Err(e) => InternalEvent::HistoryFetched {
                    epoch,
                    messages: vec![],
                    error: Some(e.to_string()),
                },
            };
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(crate::updates::CoreMsg::Internal(Box::new(event)));
        });
    }

    /// Kick the decrypt capability for one stored message. Failure yields a
    /// per-message placeholder, never a global error.
    pub(super) fn fetch_decrypted(
        &mut self,
        peer_id: crate::state::UserId,
        message_id: String,
        encrypted: String,
        private_key: String,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let epoch = sess.epoch;
        let alive = sess.alive.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api.decrypt(&encrypted, &private_key).await {
                Ok(text) => InternalEvent::MessageDecrypted {
                    epoch,
                    peer_id,
                    message_id,
                    text,
                    failed: false,
                },
                Err(e) => {
                    tracing::warn!(%e, "decrypt failed");
                    InternalEvent::MessageDecrypted {
                        epoch,
                        peer_id,
                        message_id,
                        text: "failed to decrypt message".to_string(),
                        failed: true,
                    }
                }
            };
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(crate::updates::CoreMsg::Internal(Box::new(event)));
        });
    }

    /// Encrypt an outbound message via the external capability. The echo is
    /// recorded when the result arrives, then the payload goes to the wire.
    pub(super) fn fetch_encrypted(
        &mut self,
        peer_id: crate::state::UserId,
        content: String,
        public_key: String,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let epoch = sess.epoch;
        let alive = sess.alive.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api.encrypt(&content, &public_key).await {
                Ok(encrypted) => InternalEvent::OutboundEncrypted {
                    epoch,
                    peer_id,
                    content,
                    encrypted: Some(encrypted),
                    error: None,
                },
                Err(e) => InternalEvent::OutboundEncrypted {
                    epoch,
                    peer_id,
                    content,
                    encrypted: None,
                    error: Some(e.to_string()),
                },
            };
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(crate::updates::CoreMsg::Internal(Box::new(event)));
        });
    }
}
