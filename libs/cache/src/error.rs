use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read/write cache snapshot {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to encode cache snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode cache snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
