//! gridbot-exchange: the Binance-spot-style REST/WS `ExchangePort`
//! implementation. Supplements the abstract port `gridbot-core`
//! defines; not a general-purpose Binance SDK.

mod client;
mod model;
mod signing;
mod ws;

pub use client::{BinanceSpotClient, ClientBuildError};
