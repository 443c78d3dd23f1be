//! Static file serving.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → path.rs (percent-decode, reject escapes, join onto root)
//!     → service.rs (metadata, index file, ETag / If-None-Match)
//!     → range.rs (single byte range → 206 / 416)
//!     → mime.rs (Content-Type)
//!     → Response::with_reader (fixed length, streamed from the file)
//! ```

pub mod mime;
pub mod path;
pub mod range;
pub mod service;

pub use range::RangeOutcome;
pub use service::StaticFiles;
