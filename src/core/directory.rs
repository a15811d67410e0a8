// Directory cache refresh: roster + per-peer key resolution.

use std::sync::atomic::Ordering;

use futures_util::future::join_all;

use super::AppCore;
use crate::state::Peer;
use crate::updates::{CoreMsg, InternalEvent};

impl AppCore {
    /// Fetch the full user directory and the identity's own key pair, then
    /// resolve each peer's public key with independent lookups. A failed
    /// key lookup degrades that peer to `public_key: None`; it never drops
    /// the peer from the roster. The result replaces the cached roster
    /// wholesale.
    pub(super) fn refresh_directory(&mut self) {
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
            let users = match api.list_users().await {
                Ok(users) => users,
                Err(e) => {
                    if alive.load(Ordering::SeqCst) {
                        let _ = tx.send(CoreMsg::Internal(Box::new(
                            InternalEvent::DirectoryFetched {
                                epoch,
                                peers: vec![],
                                own_public_key: None,
                                own_private_key: None,
                                error: Some(e.to_string()),
                            },
                        )));
                    }
                    return;
                }
            };

            // Self lookup carries the private key; its failure degrades
            // decryption but must not abort the refresh.
            let (own_public_key, own_private_key) = match api.user_by_id(me).await {
                Ok(rec) => (rec.public_key, rec.private_key),
                Err(e) => {
                    tracing::warn!(%e, "own key lookup failed");
                    (None, None)
                }
            };

            let lookups = users
                .into_iter()
                .filter(|u| u.id != me)
                .map(|u| {
                    let api = api.clone();
                    async move {
                        match api.user_by_id(u.id).await {
                            Ok(rec) => Peer {
                                id: u.id,
                                nickname: u.nickname,
                                public_key: rec.public_key,
                            },
                            Err(e) => {
                                tracing::warn!(peer = u.id, %e, "peer key lookup failed");
                                Peer {
                                    id: u.id,
                                    nickname: u.nickname,
                                    public_key: None,
                                }
                            }
                        }
                    }
                })
                .collect::<Vec<_>>();
            let peers = join_all(lookups).await;

            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::DirectoryFetched {
                    epoch,
                    peers,
                    own_public_key,
                    own_private_key,
                    error: None,
                },
            )));
        });
    }
}
