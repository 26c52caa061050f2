//! Client-side error taxonomy.
//!
//! Every failure a call can observe is classified into exactly one
//! [`ClientError`] variant. The classification is made once per call and
//! cloned to every observer, so the enum is `Clone`.

use courier_core::{Code, ErrorDetail, FrameError, Status};

use crate::descriptor::MessageError;

/// Client-side error variants.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection could not be established or was lost.
    ///
    /// `connection_lost` is set for connection-level failures that took
    /// down every call on the channel.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        connection_lost: bool,
    },

    /// The peer violated the wire protocol (bad frame, missing trailer,
    /// unexpected content type, undecodable payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call's deadline passed before it completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,

    /// The server finished the call with a non-OK status.
    #[error("{0}")]
    Application(Status),

    /// The operation is not valid for the call's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// A transport error for a single call.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        ClientError::Transport {
            message: message.into(),
            connection_lost: false,
        }
    }

    /// A transport error caused by the shared connection going away.
    pub fn connection_lost<S: Into<String>>(message: S) -> Self {
        ClientError::Transport {
            message: message.into(),
            connection_lost: true,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        ClientError::Protocol(message.into())
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        ClientError::InvalidState(message.into())
    }

    /// An application error with a code and message.
    pub fn application<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Application(Status::new(code, message))
    }

    /// Map a non-2xx HTTP response status to an application error.
    pub fn from_http_status(status: http::StatusCode) -> Self {
        let code = Code::from_http_status(status);
        ClientError::Application(Status::new(
            code,
            format!("unexpected HTTP status {status}"),
        ))
    }

    /// Get the status code for this error.
    ///
    /// Non-application variants map to:
    /// - Transport: `Unavailable`
    /// - Protocol: `Internal`
    /// - DeadlineExceeded: `DeadlineExceeded`
    /// - Cancelled: `Canceled`
    /// - InvalidState: `FailedPrecondition`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Transport { .. } => Code::Unavailable,
            ClientError::Protocol(_) => Code::Internal,
            ClientError::DeadlineExceeded => Code::DeadlineExceeded,
            ClientError::Cancelled => Code::Canceled,
            ClientError::Application(status) => status.code(),
            ClientError::InvalidState(_) => Code::FailedPrecondition,
        }
    }

    /// Get the error message, if the variant carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Transport { message, .. } => Some(message),
            ClientError::Protocol(msg) | ClientError::InvalidState(msg) => Some(msg),
            ClientError::Application(status) if !status.message().is_empty() => {
                Some(status.message())
            }
            _ => None,
        }
    }

    /// The server status, for application errors.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Application(status) => Some(status),
            _ => None,
        }
    }

    /// Error details from `grpc-status-details-bin` (application errors only).
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            ClientError::Application(status) => status.details(),
            _ => &[],
        }
    }

    /// True when this error came from the shared connection going away.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ClientError::Transport {
                connection_lost: true,
                ..
            }
        )
    }

    /// Returns whether this error indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// ```
    /// use courier_client::ClientError;
    /// use courier_core::Code;
    ///
    /// assert!(ClientError::transport("connection reset").is_retryable());
    /// assert!(ClientError::application(Code::Unavailable, "overloaded").is_retryable());
    /// assert!(!ClientError::application(Code::NotFound, "no such room").is_retryable());
    /// assert!(!ClientError::DeadlineExceeded.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<MessageError> for ClientError {
    fn from(err: MessageError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Application(status)
    }
}

impl From<std::convert::Infallible> for ClientError {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}
