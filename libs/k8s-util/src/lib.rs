//! Small Kubernetes-client utilities shared by every controller: a thin client
//! constructor, an `Event` recorder for `kubectl describe`-visible status, and a
//! helper for turning a Rust type name into a short diagnostic label.

pub mod client;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
