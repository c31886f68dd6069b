//! The Set Engine (IPSE): owner-refcounted mutations against the kernel's named-set
//! subsystem, applied through invocations of the `ipset` binary.

mod engine;
mod error;
mod kind;
mod runner;

pub use engine::IpsetEngine;
pub use error::{Error, Result};
pub use kind::{SetKind, UNSPECIFIED_CIDR, UNSPECIFIED_CIDR_SPLIT};
pub use runner::{CommandRunner, ProcessRunner};
