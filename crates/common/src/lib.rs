pub mod error;
pub mod fsio;
pub mod retry;

pub use error::{CourierError, Error, FromMessage, Result};
