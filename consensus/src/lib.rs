// Lodestone Consensus - SHA-256 Proof-of-Work search and block mining
//
// The core crate defines what a valid block is; this crate finds one.

pub mod error;
pub mod hashcash;
pub mod miner;

pub use error::ConsensusError;
pub use miner::mine;
