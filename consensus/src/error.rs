// Error types for consensus module
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("mining was cancelled")]
    Cancelled,
}
