use thiserror::Error;

/// Reasons a room command can be refused.
///
/// Only the join/create family is reported back to the client (as a
/// `room_error`); everything else is dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Name already taken in this room")]
    NameTaken,
    #[error("Maximum {max} Players allowed. Join as Voter instead.")]
    RoleCapacityExceeded { max: usize },
    #[error("Already in a room")]
    AlreadyInRoom,
    #[error("only the host can do that")]
    NotHost,
    #[error("not a member of this room")]
    NotMember,
    #[error("participant's role may not do that")]
    RoleNotAllowed,
    #[error("command not valid in the {0} state")]
    InvalidState(crate::types::GameState),
    #[error("command not valid for a {0} room")]
    WrongMode(crate::types::RoomMode),
    #[error("question index {index} out of range (bank has {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("video lasts {duration_ms}ms, limit is {max_ms}ms")]
    DurationExceeded { duration_ms: u64, max_ms: u64 },
    #[error("video limit of {max} reached")]
    CapacityExceeded { max: usize },
    #[error("participant is not next in the buzz order")]
    NotNextInOrder,
}

impl RoomError {
    /// Whether the sender should be told about this error.
    pub fn is_reported(&self) -> bool {
        matches!(
            self,
            Self::RoomNotFound | Self::NameTaken | Self::RoleCapacityExceeded { .. } | Self::AlreadyInRoom
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}
