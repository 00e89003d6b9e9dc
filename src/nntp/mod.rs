//! NNTP posting client and connection pooling
//!
//! This module provides the async NNTP session state machine (greeting,
//! reader mode, authentication, POST/STAT/QUIT) and a deadpool-backed pool
//! of sessions shared by the upload workers.

mod auth;
mod connection;
mod pool;
mod response;

pub use auth::{AuthMethod, Capabilities};
pub use connection::{dot_stuff, NntpConnection, PostReceipt, SessionState};
pub use pool::{NntpConnectionManager, NntpPool, NntpPoolBuilder, NntpPoolExt, PooledConnection};
pub use response::{codes, NntpResponse, ResponseCategory};
