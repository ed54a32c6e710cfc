//! Tradelink - client SDK mirroring a remote trading terminal.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Reusable library components
//! │   ├── domain/       # Pure domain types
//! │   ├── transport/    # Framed message channel + packet ordering
//! │   ├── state/        # Terminal state mirror
//! │   ├── store/        # Order/deal history storage
//! │   ├── health/       # Connection health monitor
//! │   └── sync/         # Synchronization engine, registry, clients
//! ├── app/              # Configuration and logging setup
//! └── testkit/          # Transport test doubles (feature `testkit`)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let config = Config::load("tradelink.toml")?;
//! let transport = WebSocketTransport::new(&config.endpoint_url()?, config.transport_options())?;
//! transport.connect().await?;
//!
//! let registry = ConnectionRegistry::new(transport, config.connection_options());
//! let connection = registry
//!     .connect(Account::new("account-id"), None, None)
//!     .await?;
//! connection.wait_synchronized(Default::default()).await?;
//!
//! let equity = connection.terminal_state().account_information();
//! ```

pub mod app;
pub mod core;
pub mod error;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use crate::app::Config;
pub use crate::core::domain::{Account, AccountId};
pub use crate::core::health::{HealthMonitor, Uptime};
pub use crate::core::state::TerminalState;
pub use crate::core::store::{HistoryStorage, MemoryHistoryStorage};
pub use crate::core::sync::{
    ConnectionRegistry, SynchronizationListener, SynchronizationOptions, TerminalConnection,
};
pub use crate::core::transport::{MessageTransport, WebSocketTransport};
pub use crate::error::{Error, Result};
