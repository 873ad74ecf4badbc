//! Ceremonies run by the web party
//!
//! Keygen and sign are multi-round ceremonies executed by [RoundDriver](crate::driver::RoundDriver).
//! Backup is a single write acknowledged by the counterparty.

pub mod backup;
pub mod keygen;
pub mod sign;

pub use backup::run_backup;
pub use keygen::{run_keygen, KeygenResult};
pub use sign::{run_sign, SignRequest, SignResult, ValidatedSign};
