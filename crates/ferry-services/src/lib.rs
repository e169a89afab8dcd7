//! ferry-services — shared relay state and the machinery that moves bytes
//! between sessions.
//!
//! - [`registry`] tracks live sessions and fans chat out to them.
//! - [`outbound`] owns each connection's write half.
//! - [`relay`] decides where each inbound frame goes.

pub mod outbound;
pub mod registry;
pub mod relay;

pub use outbound::{FileDelivery, Outbound, OutboundError, OutboundRx, OutboundTx, WriterTimeouts};
pub use registry::{BroadcastReport, RegistryError, SessionHandle, SessionId, SessionRegistry};
pub use relay::{FileRoute, Relay, RelayError, Transfer};
