//! Client for the presentation server's state endpoints.
//!
//! A [`SessionClient`] keeps one persistent websocket to a state resource
//! (`api/state` or `api/display-state`), mirrors the server-owned state
//! record, correlates requests with their responses, and keeps the
//! connection alive with heartbeat pings, reconnecting whenever it drops.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use streamsys_client::{Endpoint, SessionConfig, StateSession, StaticToken};
//!
//! let config = SessionConfig::for_endpoint("http://127.0.0.1:8080", Endpoint::State)?;
//! let session = StateSession::websocket(config, Arc::new(StaticToken::new(None)));
//! session.connect().await;
//! println!("{:?}", session.current_state());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlator;
pub mod credentials;
pub mod error;
mod heartbeat;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{Endpoint, SessionConfig};
pub use credentials::{SharedToken, StaticToken, TokenProvider};
pub use error::{ConfigError, SessionError};
pub use session::{DisplaySession, Phase, SessionClient, SessionStatus, StateSession};
pub use state::{CurrentState, DisplayContent, DisplayState, StateRecord};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
