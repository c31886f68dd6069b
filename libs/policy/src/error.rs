use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("NetworkPolicy {0} has no namespace")]
    MissingNamespace(String),

    #[error("NetworkPolicy {0} has no name")]
    MissingName(String),

    #[error("label selector operator {0:?} is not one of In/NotIn/Exists/DoesNotExist")]
    UnknownOperator(String),

    #[error("match expression for key {0} has operator {1} but no values")]
    MissingValues(String, String),

    #[error("named port {0} has no matching protocol")]
    UnknownProtocol(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
