pub mod config;
pub mod error;
pub mod types;

pub use alloy_primitives::U256;
pub use error::{Result, Tick3tError};
pub use types::*;
