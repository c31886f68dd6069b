use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("iptables backend error: {0}")]
    Backend(String),

    #[error("chain {0} is still referenced by a jump or rule")]
    InUse(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("failed to read/write filter-table snapshot {0}: {1}")]
    Snapshot(String, #[source] std::io::Error),

    #[error("failed to launch iptables helper: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
