mod config;
mod connection;
mod directory;
pub mod notify;
mod persist;
mod session;
pub mod store;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::api::ApiClient;
use crate::error::ChatError;
use crate::state::{
    AppState, ConnectionState, ConversationEntry, Identity, Peer, UserId,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use notify::NotificationRouter;
use store::{IngestOutcome, MessageStore};

/// One logged-in identity's live resources. Dropped wholesale on logout;
/// the `alive` flag and the session epoch keep late async results from
/// touching a torn-down session.
struct Session {
    identity: Identity,
    epoch: u64,
    alive: Arc<AtomicBool>,
    api: ApiClient,
    store: MessageStore,
    outbound: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    own_public_key: Option<String>,
    own_private_key: Option<String>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    data_dir: String,
    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    session: Option<Session>,
    session_epoch: u64,
    notifications: NotificationRouter,
}

fn resolve_display_name(identity: &Identity, peers: &[Peer], id: UserId) -> Option<String> {
    if id == identity.id {
        return Some(identity.nickname.clone());
    }
    peers.iter().find(|p| p.id == id).map(|p| p.nickname.clone())
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            data_dir,
            config,
            runtime,
            session: None,
            session_epoch: 0,
            notifications: NotificationRouter::new(),
        };

        // Ensure ChatApp::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Toasts stay in state until the UI explicitly clears them, so a
        // snapshot resync never loses one.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    /// Project the store, roster and pending notifications into the
    /// snapshot. Peer display data is resolved by id at projection time;
    /// a directory refresh replaces the roster wholesale and this picks up
    /// the new names on the next pass.
    fn rebuild_view(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            self.state.conversations = vec![];
            self.state.current_messages = vec![];
            self.state.notifications = vec![];
            return;
        };

        let mut entries: Vec<ConversationEntry> = sess
            .store
            .conversations()
            .iter()
            .map(|(peer_id, conv)| ConversationEntry {
                peer_id: *peer_id,
                peer_name: self
                    .state
                    .peer_name(*peer_id)
                    .unwrap_or_else(|| format!("user {peer_id}")),
                has_key: self
                    .state
                    .peer(*peer_id)
                    .and_then(|p| p.public_key.as_ref())
                    .is_some(),
                summary: conv.summary.clone(),
            })
            .collect();
        entries.sort_by_key(|e| {
            std::cmp::Reverse(e.summary.as_ref().map(|s| s.last_timestamp))
        });

        let current_messages = self
            .state
            .selected_peer
            .map(|p| sess.store.messages(p).to_vec())
            .unwrap_or_default();

        self.state.conversations = entries;
        self.state.current_messages = current_messages;
        self.state.notifications = self.notifications.pending().to_vec();
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Log the tag only: payloads can carry message plaintext.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Login { nickname } => self.login(nickname),
            AppAction::RestoreSession => match self.load_credentials() {
                Some(identity) => self.start_session(identity),
                None => {
                    tracing::info!("no saved credentials, staying logged out");
                }
            },
            AppAction::Logout => {
                self.clear_credentials();
                self.stop_session();
                self.emit_state();
            }
            AppAction::RefreshDirectory => self.refresh_directory(),
            AppAction::SelectPeer { peer_id } => self.select_peer(peer_id),
            AppAction::SendMessage { content } => self.send_message(content),
            AppAction::DecryptMessage { peer_id, message_id } => {
                self.decrypt_message(peer_id, message_id)
            }
            AppAction::DismissNotification { message_id } => {
                if self.notifications.dismiss(&message_id) {
                    self.rebuild_view();
                    self.emit_state();
                }
            }
            AppAction::OpenNotification { message_id } => {
                // Click-through: dismiss, then switch the open conversation
                // to the sender. The router only hands back the id.
                if let Some(sender) = self.notifications.click(&message_id) {
                    self.select_peer(sender);
                }
            }
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn login(&mut self, nickname: String) {
        let nickname = nickname.trim().to_string();
        if nickname.is_empty() {
            self.toast("nickname cannot be empty");
            return;
        }
        if !self.network_enabled() {
            self.toast("network is disabled, cannot log in");
            return;
        }

        let api = ApiClient::new(&self.api_base_url());
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            // Unknown nickname falls through to the create flow.
            let event = match api.user_by_nickname(&nickname).await {
                Ok(Some(rec)) => InternalEvent::LoginResolved {
                    identity: Some(Identity {
                        id: rec.id,
                        nickname: rec.nickname,
                    }),
                    error: None,
                },
                Ok(None) => match api.create_user(&nickname).await {
                    Ok(rec) => InternalEvent::LoginResolved {
                        identity: Some(Identity {
                            id: rec.id,
                            nickname: rec.nickname,
                        }),
                        error: None,
                    },
                    Err(e) => InternalEvent::LoginResolved {
                        identity: None,
                        error: Some(format!("could not create user: {e}")),
                    },
                },
                Err(e) => InternalEvent::LoginResolved {
                    identity: None,
                    error: Some(format!("login failed: {e}")),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    /// Idempotent; the single source of truth the notification router
    /// consults. A change of selection refreshes history for the view.
    fn select_peer(&mut self, peer_id: UserId) {
        let Some(sess) = self.session.as_mut() else {
            self.toast("not logged in");
            return;
        };
        sess.store.touch(peer_id);

        let changed = self.state.selected_peer != Some(peer_id);
        self.state.selected_peer = Some(peer_id);
        self.save_chat_state();
        if changed {
            self.fetch_history();
        }
        self.rebuild_view();
        self.emit_state();
    }

    fn send_message(&mut self, content: String) {
        let content = content.trim().to_string();
        if content.is_empty() {
            self.toast("message cannot be empty");
            return;
        }
        if self.session.is_none() {
            self.toast("not logged in");
            return;
        }
        let Some(peer_id) = self.state.selected_peer else {
            self.toast("select a recipient first");
            return;
        };
        let Some(peer) = self.state.peer(peer_id).cloned() else {
            self.toast(ChatError::SendRejected("recipient not found".into()).to_string());
            return;
        };
        // Key check happens before any encryption call is issued.
        let Some(public_key) = peer.public_key else {
            self.toast(
                ChatError::SendRejected(format!(
                    "{} has no public key, the message cannot be encrypted",
                    peer.nickname
                ))
                .to_string(),
            );
            return;
        };
        if self.state.connection != ConnectionState::Connected {
            self.toast(ChatError::NotConnected.to_string());
            return;
        }

        self.fetch_encrypted(peer_id, content, public_key);
    }

    fn decrypt_message(&mut self, peer_id: UserId, message_id: String) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let Some(private_key) = sess.own_private_key.clone() else {
            self.toast(
                ChatError::DecryptionService("no private key available".into()).to_string(),
            );
            return;
        };
        let Some(encrypted) = sess
            .store
            .messages(peer_id)
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.encrypted_content.clone())
        else {
            self.toast("message not found");
            return;
        };
        self.fetch_decrypted(peer_id, message_id, encrypted, private_key);
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::LoginResolved { identity, error } => {
                if let Some(e) = error {
                    self.toast(e);
                    return;
                }
                let Some(identity) = identity else {
                    return;
                };
                if self.session.is_some() {
                    // A session appeared while the lookup was in flight.
                    tracing::debug!("stale login result ignored");
                    return;
                }
                self.save_credentials(&identity);
                self.start_session(identity);
            }

            InternalEvent::ConnectionStateChanged { epoch, state } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                if self.state.connection != state {
                    tracing::info!(?state, "connection state");
                    self.state.connection = state;
                    self.emit_state();
                }
            }

            InternalEvent::InboundFrame { epoch, raw } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                self.ingest_raw_frame(&raw);
            }

            InternalEvent::DirectoryFetched {
                epoch,
                peers,
                own_public_key,
                own_private_key,
                error,
            } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                if let Some(e) = error {
                    self.toast(ChatError::DirectoryFetch(e).to_string());
                    return;
                }
                tracing::info!(peers = peers.len(), "directory refreshed");
                self.state.peers = peers;
                if let Some(sess) = self.session.as_mut() {
                    sess.own_public_key = own_public_key;
                    sess.own_private_key = own_private_key;
                }
                self.rebuild_view();
                self.emit_state();
            }

            InternalEvent::HistoryFetched {
                epoch,
                messages,
                error,
            } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                if let Some(e) = error {
                    self.toast(format!("could not load message history: {e}"));
                    return;
                }
                let Some(sess) = self.session.as_mut() else {
                    return;
                };
                let identity = sess.identity.clone();
                let resolve =
                    |id: UserId| resolve_display_name(&identity, &self.state.peers, id);
                sess.store.load_history(messages, &resolve);
                self.save_chat_state();
                self.rebuild_view();
                self.emit_state();
            }

            InternalEvent::OutboundEncrypted {
                epoch,
                peer_id,
                content,
                encrypted,
                error,
            } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                if let Some(e) = error {
                    self.toast(ChatError::EncryptionService(e).to_string());
                    return;
                }
                let Some(encrypted) = encrypted else {
                    return;
                };
                self.finish_send(peer_id, content, encrypted);
            }

            InternalEvent::MessageDecrypted {
                epoch,
                peer_id,
                message_id,
                text,
                failed,
            } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                if let Some(sess) = self.session.as_mut() {
                    sess.store.apply_decrypted(peer_id, &message_id, &text);
                }
                if failed {
                    self.toast(
                        ChatError::DecryptionService("see message placeholder".into())
                            .to_string(),
                    );
                }
                self.save_chat_state();
                self.rebuild_view();
                self.emit_state();
            }

            InternalEvent::NotificationExpired { epoch, message_id } => {
                if !self.session_epoch_matches(epoch) {
                    return;
                }
                // No-op when the notification was already dismissed or
                // clicked; the timer always fires.
                if self.notifications.expire(&message_id) {
                    self.rebuild_view();
                    self.emit_state();
                }
            }

            InternalEvent::InjectedFrame { raw } => {
                if self.session.is_some() {
                    self.ingest_raw_frame(&raw);
                }
            }

            InternalEvent::Toast(msg) => {
                tracing::info!(%msg, "toast");
                self.toast(msg);
            }
        }
    }

    /// Merge one raw push frame and route the outcome: appended messages
    /// are offered to the notification router against the current
    /// selection; duplicates still refresh the preview.
    fn ingest_raw_frame(&mut self, raw: &str) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let identity = sess.identity.clone();
        let resolve = |id: UserId| resolve_display_name(&identity, &self.state.peers, id);

        let outcome = sess.store.ingest_frame(raw, &resolve);

        let mut service_error = None;
        let mut expiry_to_schedule = None;
        let mut changed = false;
        match outcome {
            IngestOutcome::Appended(msg) => {
                changed = true;
                let active = self.state.selected_peer;
                if let Some(n) =
                    self.notifications
                        .on_appended(&msg, identity.id, active, &resolve)
                {
                    expiry_to_schedule = Some(n.source_message_id);
                }
            }
            IngestOutcome::Duplicate => {
                changed = true;
            }
            IngestOutcome::ServiceError(m) => {
                service_error = Some(m);
            }
            IngestOutcome::Unrecognized => {}
        }

        if let Some(m) = service_error {
            self.toast(m);
        }
        if let Some(message_id) = expiry_to_schedule {
            self.schedule_notification_expiry(message_id);
        }
        if changed {
            self.save_chat_state();
            self.rebuild_view();
            self.emit_state();
        }
    }

    fn finish_send(&mut self, peer_id: UserId, content: String, encrypted: String) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let me_id = sess.identity.id;
        let me_name = sess.identity.nickname.clone();
        sess.store
            .record_outgoing(peer_id, content.clone(), encrypted.clone(), me_name);
        self.save_chat_state();

        // Outbound frames are bare creation payloads; only inbound frames
        // carry the {type, data} envelope.
        let payload = serde_json::json!({
            "content": content,
            "encrypted_content": encrypted,
            "receiver_id": peer_id,
            "sender_id": me_id,
        })
        .to_string();

        if let Err(e) = self.send_wire_payload(payload) {
            // No rollback: the optimistic echo stays in place.
            self.toast(e.to_string());
        }
        self.rebuild_view();
        self.emit_state();
    }

    fn schedule_notification_expiry(&mut self, message_id: String) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let epoch = sess.epoch;
        let ttl = self.notification_ttl();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::NotificationExpired { epoch, message_id },
            )));
        });
    }
}
