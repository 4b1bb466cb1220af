use ragchat_backend_client::BackendError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagChatErr>;

#[derive(Error, Debug)]
pub enum RagChatErr {
    /// The connection to the backend failed or returned a bad status.
    #[error("{0}")]
    Transport(String),

    /// The backend reported an `[ERROR]` event in a reply stream.
    #[error("{0}")]
    Protocol(String),

    /// A Git sync job ended in an error state, or never finished.
    #[error("{0}")]
    SyncFailed(String),

    /// Rejected on the client before any request was made.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagChatErr {
    /// Text for showing to a user. Backend status failures carry the
    /// backend's own message.
    pub fn user_message(&self) -> String {
        match self {
            RagChatErr::Backend(err) => err.user_message(),
            other => other.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        RagChatErr::Validation(message.into())
    }
}
