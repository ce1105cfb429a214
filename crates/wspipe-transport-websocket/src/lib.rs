//! WebSocket transport using tokio-tungstenite
//!
//! Dials a `ws://` or `wss://` endpoint, optionally through an HTTP forward
//! proxy, and exposes the result as a [`wspipe_transport::DuplexConnection`].
//!
//! # Features
//!
//! - **Encryption**: TLS via rustls (wss://), optional client certificates
//! - **Firewall Friendly**: plain HTTP(S) upgrade, passes reverse proxies and
//!   load balancers
//! - **Forward proxies**: HTTP CONNECT with Basic proxy authentication
//!
//! # Example
//!
//! ```no_run
//! use wspipe_auth::Credential;
//! use wspipe_transport_websocket::{establish, DialConfig};
//!
//! # async fn dial() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DialConfig::builder("wss://tunnel.example.com/proxy/db/22")
//!     .basic_auth(Credential::new("alice", "secret"))
//!     .build()?;
//! let connection = establish(&config).await?;
//! # let _ = connection;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
mod proxy;

pub use config::{DialConfig, DialConfigBuilder, ForwardProxy, TlsSettings};
pub use connection::{WebSocketConnection, WebSocketSink, WebSocketSource};
pub use connector::establish;
