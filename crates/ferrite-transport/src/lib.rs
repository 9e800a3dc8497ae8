pub mod auth;
pub mod client;
pub mod errors;
pub mod framing;
pub mod handler;
pub mod server;

pub use auth::{Claims, TokenIssuer};
pub use client::DriveClient;
pub use errors::{Result, TransportError};
pub use framing::{Frame, FrameDecoder};
pub use handler::{HandlerID, HandlerKind, HandlerRegistry, SingleHandler, StreamHandler};
pub use server::{ServerState, build_router};
