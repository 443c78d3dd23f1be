//! HTTP/1.1 server engine with WebSocket upgrade.

pub mod config;
pub mod files;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod ws;

pub use config::ServerConfig;
pub use http::{Handler, HttpServer, Reply, Request, RequestBody, Response, Upgrade};
pub use lifecycle::Shutdown;
pub use routing::Router;
pub use ws::{Message, WebSocket};
