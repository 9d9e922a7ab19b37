use listsync_core::FilterError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// The caller broke the operation contract; retrying cannot help.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("list has no transport bound; mutating calls and polling are unavailable")]
    NoTransport,
}
