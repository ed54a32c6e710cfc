//! Account identity and account information types.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading account identifier - newtype for type safety.
///
/// The inner String is private to ensure all construction goes through
/// the defined constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new `AccountId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the account ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Handle describing the account a connection is opened for.
///
/// The `application` tag partitions history and synchronization streams on
/// the server side; `magic` is the default order tag applied to trades that
/// do not override it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub application: String,
    pub magic: Option<i64>,
}

impl Account {
    /// Create an account handle with the default `"MetaApi"` application tag.
    pub fn new(id: impl Into<AccountId>) -> Self {
        Self {
            id: id.into(),
            application: "MetaApi".to_string(),
            magic: None,
        }
    }

    /// Override the application tag.
    #[must_use]
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Set the default magic applied to trades.
    #[must_use]
    pub fn with_magic(mut self, magic: i64) -> Self {
        self.magic = Some(magic);
        self
    }
}

/// Account information snapshot reported by the terminal.
///
/// The derived fields (`equity`, `margin`, `free_margin`, `margin_level`) may
/// be overwritten locally by price updates between server snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInformation {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub broker: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub server: String,
    pub balance: Decimal,
    pub equity: Decimal,
    #[serde(default)]
    pub margin: Decimal,
    #[serde(default)]
    pub free_margin: Decimal,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_level: Option<Decimal>,
    #[serde(default)]
    pub margin_mode: Option<String>,
    #[serde(default = "default_true")]
    pub trade_allowed: bool,
    #[serde(default)]
    pub investor_mode: bool,
}

fn default_true() -> bool {
    true
}
