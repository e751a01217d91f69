//! radmux server: a multi-protocol authentication/accounting daemon with
//! a DHCPv4 listener, built on the `radmux-proto` codecs.
//!
//! The daemon runs a single dispatcher task over three RADIUS sockets
//! (authentication, accounting, proxy) and an optional DHCP socket.
//! Requests are deduplicated by `(source, id, vector)` in a request
//! table, handled by per-request worker tasks, and retired a few seconds
//! after completion so retransmissions can replay the cached reply.
//!
//! # Example
//!
//! ```rust,no_run
//! use radmux_server::{Config, Handlers, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.clients.push(radmux_server::Client {
//!         address: "192.168.1.0/24".to_string(),
//!         secret: "testing123".to_string(),
//!         name: None,
//!         auth_policy: Default::default(),
//!         enabled: true,
//!     });
//!
//!     let handlers = Handlers::from_config(&config, None);
//!     let mut server = Server::bind(config, handlers).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detail;
pub mod dispatch;
pub mod handlers;
pub mod request;

pub use config::{AuthPolicy, Client, Config, ConfigError, User};
pub use detail::DetailWriter;
pub use dispatch::{Server, ServerError};
pub use handlers::{
    AcctHandler, AuthHandler, DhcpHandler, FileAuthHandler, Handlers, LogAcctHandler,
    NullDhcpHandler, NullProxy, ProxyHooks,
};
pub use request::{
    Admission, CachedReply, RequestRecord, RequestTable, SocketRole, CLEANUP_DELAY, MAX_REQUESTS,
    MAX_REQUEST_TIME,
};
