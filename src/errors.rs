use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried in the `{code, message}` envelope across RPC and
/// surfaced to clients as `error`-type socket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownError,
    RoomNotFoundError,
    RoomCloseError,
    NetWorkTimeoutError,
    MessageContentError,
    ServeError,
    ClientError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownError => "UnknownError",
            ErrorCode::RoomNotFoundError => "RoomNotFoundError",
            ErrorCode::RoomCloseError => "RoomCloseError",
            ErrorCode::NetWorkTimeoutError => "NetWorkTimeoutError",
            ErrorCode::MessageContentError => "MessageContentError",
            ErrorCode::ServeError => "ServeError",
            ErrorCode::ClientError => "ClientError",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomError {
    pub code: ErrorCode,
    pub message: String,
}

impl RoomError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        RoomError {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, message)
    }

    pub fn room_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoomNotFoundError, message)
    }

    pub fn room_close(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RoomCloseError, message)
    }

    pub fn network_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetWorkTimeoutError, message)
    }

    pub fn message_content(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MessageContentError, message)
    }

    pub fn serve(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServeError, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ClientError, message)
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for RoomError {}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::message_content(err.to_string())
    }
}

impl From<reqwest::Error> for RoomError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RoomError::network_timeout(err.to_string())
        } else {
            RoomError::unknown(err.to_string())
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
