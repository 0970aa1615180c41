//! Healing error types.

use cellgrid_core::{MessengerError, SourceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealError {
    #[error("record source error: {0}")]
    Source(#[from] SourceError),

    #[error("broadcast failed: {0}")]
    Messenger(#[from] MessengerError),
}

pub type HealResult<T> = Result<T, HealError>;
