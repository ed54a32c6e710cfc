//! Pure domain types mirrored from the remote terminal.

mod account;
mod history;
mod order;
mod position;
mod symbol;
mod trade;

pub use account::{Account, AccountId, AccountInformation};
pub use history::{Deal, DealType};
pub use order::{ExpirationType, FillingMode, Order, OrderState, OrderType};
pub use position::{Position, PositionType};
pub use symbol::{SymbolPrice, SymbolSpecification};
pub use trade::{
    ActionType, MarketTradeOptions, PendingTradeOptions, TradeRequest, TradeResponse,
};
