//! Controllers, reconciliation context, and process bootstrap/lifecycle for the
//! network policy engine (§4.4, §4.5).

pub mod bootstrap;
pub mod context;
pub mod controllers;
pub mod debug;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod telemetry;

pub use error::{Error, Result};
