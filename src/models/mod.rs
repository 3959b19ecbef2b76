pub mod candle;
pub mod direction;
pub mod position;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use position::{AccountSnapshot, BrokerPosition, OrderRequest};
pub use timeframe::Timeframe;
