use crate::actions::AppAction;
use crate::state::{AppState, ConnectionState, Identity, Peer, UserId};

/// Snapshot stream to the embedding layer. Every mutation bumps `rev` and
/// ships a full state clone, so listeners never need diff bookkeeping.
#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results of async side effects, re-entering the single-threaded actor.
/// Session-scoped events carry the epoch they were issued under; the actor
/// drops anything from a torn-down session.
#[derive(Debug)]
pub enum InternalEvent {
    // Login / account resolution
    LoginResolved {
        identity: Option<Identity>,
        error: Option<String>,
    },

    // Connection manager
    ConnectionStateChanged {
        epoch: u64,
        state: ConnectionState,
    },
    InboundFrame {
        epoch: u64,
        raw: String,
    },

    // REST fetch results
    DirectoryFetched {
        epoch: u64,
        peers: Vec<Peer>,
        own_public_key: Option<String>,
        own_private_key: Option<String>,
        error: Option<String>,
    },
    HistoryFetched {
        epoch: u64,
        messages: Vec<crate::core::store::WireMessage>,
        error: Option<String>,
    },

    // Crypto service results
    OutboundEncrypted {
        epoch: u64,
        peer_id: UserId,
        content: String,
        encrypted: Option<String>,
        error: Option<String>,
    },
    MessageDecrypted {
        epoch: u64,
        peer_id: UserId,
        message_id: String,
        text: String,
        failed: bool,
    },

    // Timers
    NotificationExpired {
        epoch: u64,
        message_id: String,
    },

    /// Raw frame delivered as if it came off the live channel, bound to
    /// whichever session is current. Test-only entry point.
    InjectedFrame {
        raw: String,
    },

    Toast(String),
}
