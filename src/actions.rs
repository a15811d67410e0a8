use crate::state::UserId;

#[derive(Debug, Clone)]
pub enum AppAction {
    // Auth
    Login { nickname: String },
    RestoreSession,
    Logout,

    // Directory
    RefreshDirectory,

    // Conversation
    SelectPeer { peer_id: UserId },
    SendMessage { content: String },
    DecryptMessage { peer_id: UserId, message_id: String },

    // Notifications
    DismissNotification { message_id: String },
    OpenNotification { message_id: String },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (payloads can carry message plaintext).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::Login { .. } => "Login",
            AppAction::RestoreSession => "RestoreSession",
            AppAction::Logout => "Logout",
            AppAction::RefreshDirectory => "RefreshDirectory",
            AppAction::SelectPeer { .. } => "SelectPeer",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::DecryptMessage { .. } => "DecryptMessage",
            AppAction::DismissNotification { .. } => "DismissNotification",
            AppAction::OpenNotification { .. } => "OpenNotification",
            AppAction::ClearToast => "ClearToast",
        }
    }
}
