//! ferryd — accepts connections and runs one session task per client.

pub mod listener;
pub mod session;

pub use listener::Server;
pub use session::{Disconnect, SessionSettings, SessionTask};
