//! Duplex WebSocket transport to the realtime speech backend.
//!
//! The transport carries text frames and nothing else. Lifecycle callbacks are
//! delivered as [`TransportEvent`]s on a channel owned by the session.

pub mod endpoint;
pub mod transport;

pub use endpoint::{Endpoint, Provider};
pub use pepper_realtime_types as types;
pub use transport::{Transport, TransportError, TransportEvent, TransportHandle};
