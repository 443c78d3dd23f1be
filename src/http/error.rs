//! Error taxonomy for the HTTP phase of a connection.
//!
//! # Design Decisions
//! - Transport errors and framing errors are both fatal to the connection
//! - Framing errors map to a 4xx status for the best-effort error response
//! - Application errors are a separate type ([`HandlerError`]) so they can
//!   never be confused with a broken byte stream

use std::io;

/// Broad class of an [`HttpError`], used to pick the connection's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Read/write failure or end-of-stream mid-message. No response possible.
    Transport,
    /// The byte stream is no longer trustworthy. Respond if possible, then close.
    Framing,
}

/// Errors produced while parsing requests or writing responses.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed in the middle of a message")]
    UnexpectedEof,

    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line")]
    MalformedHeader,

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("body of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge { length: u64, limit: u64 },

    #[error("malformed chunk size line")]
    MalformedChunkSize,

    #[error("chunk data not followed by CRLF")]
    MissingChunkTerminator,

    #[error("declared body length {declared} but source produced {actual}")]
    BodyLengthMismatch { declared: u64, actual: u64 },
}

impl HttpError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            HttpError::Io(_) | HttpError::UnexpectedEof | HttpError::BodyLengthMismatch { .. } => {
                ErrorClass::Transport
            }
            _ => ErrorClass::Framing,
        }
    }

    /// Status code for the best-effort error response.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::HeaderTooLarge { .. } => 431,
            HttpError::PayloadTooLarge { .. } => 413,
            _ => 400,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HttpError::Io(_) => "io",
            HttpError::UnexpectedEof => "unexpected_eof",
            HttpError::HeaderTooLarge { .. } => "header_too_large",
            HttpError::MalformedRequestLine => "request_line",
            HttpError::MalformedHeader => "header",
            HttpError::InvalidContentLength(_) => "content_length",
            HttpError::PayloadTooLarge { .. } => "payload_too_large",
            HttpError::MalformedChunkSize => "chunk_size",
            HttpError::MissingChunkTerminator => "chunk_terminator",
            HttpError::BodyLengthMismatch { .. } => "body_length_mismatch",
        }
    }
}

/// Failure reported by a request handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Reading the request body failed; the stream position is lost.
    #[error("request body: {0}")]
    Body(#[from] HttpError),

    /// Any other handler failure. Answered with a 500.
    #[error("{0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap an arbitrary application error.
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        HandlerError::Application(err.into())
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        HandlerError::Application(Box::new(err))
    }
}
