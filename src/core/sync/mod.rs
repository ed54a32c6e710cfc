//! Synchronization engine, connection registry and per-account clients.

mod connection;
mod listener;
mod query;
mod registry;
mod trade;

pub use connection::{
    ConnectionOptions, RetryOptions, SynchronizationOptions, TerminalConnection,
};
pub use listener::{ReconnectListener, SynchronizationListener};
pub use query::QueryClient;
pub use registry::ConnectionRegistry;
pub use trade::TradeClient;
