use crate::game::repository::RepositoryError;
use crate::game::thread_guard::ThreadViolation;
use crate::info::{EncodeError, ObserverId};

/// Broadcast failures.
///
/// Protocol and capacity violations abort one observer's packet for the
/// tick; encode errors skip one avatar's extended info; thread violations
/// reject the whole call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BroadcastError {
    #[error("protocol violation for {observer} at avatar {avatar:?}: {reason}")]
    ProtocolViolation {
        observer: ObserverId,
        avatar: Option<u16>,
        reason: String,
    },

    #[error("{observer} packet needs {required} bytes, hard capacity is {capacity}")]
    CapacityExceeded {
        observer: ObserverId,
        required: usize,
        capacity: usize,
    },

    #[error("avatar {avatar}: {source}")]
    Encode {
        avatar: u16,
        #[source]
        source: EncodeError,
    },

    #[error(transparent)]
    ThreadViolation(#[from] ThreadViolation),

    #[error("work unit panicked: {0}")]
    UnitPanicked(String),

    #[error("{observer} is already registered")]
    DuplicateObserver { observer: ObserverId },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BroadcastError {
    /// Avatar index the error is attributed to, if any
    pub fn avatar(&self) -> Option<u16> {
        match self {
            BroadcastError::ProtocolViolation { avatar, .. } => *avatar,
            BroadcastError::Encode { avatar, .. } => Some(*avatar),
            _ => None,
        }
    }

    pub fn observer(&self) -> Option<ObserverId> {
        match self {
            BroadcastError::ProtocolViolation { observer, .. }
            | BroadcastError::CapacityExceeded { observer, .. }
            | BroadcastError::DuplicateObserver { observer } => Some(*observer),
            _ => None,
        }
    }
}

impl From<RepositoryError> for BroadcastError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Thread(violation) => BroadcastError::ThreadViolation(violation),
            other => BroadcastError::Config(other.to_string()),
        }
    }
}
