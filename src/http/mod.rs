//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept, spawn connection task)
//!     → connection.rs (request cycle, keep-alive, upgrade)
//!         → buffer.rs (transport bytes, leftover across requests)
//!         → request.rs (parse head, select body framing)
//!         → body.rs (bounded / chunked body reads)
//!         → handler.rs (application code)
//!         → response.rs (status line, headers, framed body)
//!     → Send to client
//! ```

pub mod body;
pub mod buffer;
pub mod connection;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use body::{BodyKind, BodyReader};
pub use buffer::FrameBuffer;
pub use connection::{BoxedIo, ConnectionLoop, ConnectionSettings, Io};
pub use error::{HandlerError, HttpError};
pub use handler::{Handler, Reply, RequestBody, Upgrade};
pub use request::{Headers, Method, ParseLimits, Request, Version};
pub use response::{reason_phrase, BodySource, Response, ResponseBody, ResponseWriter};
pub use server::HttpServer;
