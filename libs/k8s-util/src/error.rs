use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    KubeError(String, #[source] kube::Error),

    #[error("{0}")]
    MissingData(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
