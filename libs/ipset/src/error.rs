use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The `ipset` binary exited non-zero for a reason other than "already exists"
    /// / "in use"
    #[error("ipset backend error running `{0}`: {1}")]
    Backend(String, String),

    /// `destroy_set`/`destroy_list` attempted on an object still referenced by a
    /// rule or a list member
    #[error("set or list {0} is still in use")]
    InUse(String),

    /// A mutation was requested against a set/list the engine does not know about.
    /// Callers must `create_set`/`create_list` first.
    #[error("unknown set or list: {0}")]
    Unknown(String),

    #[error("failed to launch ipset: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read/write snapshot file {0}: {1}")]
    Snapshot(String, #[source] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
