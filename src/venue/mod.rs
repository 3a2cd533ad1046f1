//! Venue adapters: the capability contract every exchange integration
//! implements, plus the concrete KuCoin adapter and a mock for tests and
//! paper trading.

pub mod kucoin;
pub mod mock;
pub mod traits;
pub mod types;

pub use kucoin::KucoinAdapter;
pub use mock::MockVenueAdapter;
pub use traits::VenueAdapter;
pub use types::{
    Balance, BookLevel, BookLevels, OpenOrder, OrderSide, OrderStatus, OrderType, Ticker,
    TimeInForce, VenueOrderAck, VenueOrderRequest,
};
