use thiserror::Error;

/// Engine error taxonomy. Nothing here is fatal: connection errors recover
/// through the reconnect loop, everything else surfaces as a scoped toast
/// tied to the operation that failed.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not connected")]
    NotConnected,

    #[error("send rejected: {0}")]
    SendRejected(String),

    #[error("encryption service failed: {0}")]
    EncryptionService(String),

    #[error("decryption service failed: {0}")]
    DecryptionService(String),

    #[error("directory fetch failed: {0}")]
    DirectoryFetch(String),

    #[error("storage error: {0}")]
    Storage(String),
}
