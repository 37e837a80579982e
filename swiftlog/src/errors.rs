//! Error types and handling for the logging core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid backend configuration: {0}")]
    Config(String),
    #[error("could not format log statement: {0}")]
    Format(String),
    #[error("could not decode record: {0}")]
    Decode(String),
    #[error("backend worker failed to start: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, Error>;
