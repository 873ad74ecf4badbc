//! Useful development utils
//!
//! In-process stand-ins for the counterparty device and the token endpoint, which make it possible
//! to run full ceremonies against a [MemoryRelay](crate::relay::MemoryRelay) in tests.

mod phone;
mod token;

pub use phone::*;
pub use token::*;
