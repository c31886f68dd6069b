use crate::error::{Error, Result};

use tokio::process::Command;

/// Abstraction over "invoke the `ipset` binary with these arguments", so the engine
/// can be unit tested without root or a real kernel
#[allow(async_fn_in_trait)]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, args: &[&str]) -> Result<String>;
}

/// Default runner: shells out to the real `ipset` binary via `tokio::process::Command`
/// rather than blocking the reactor.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    binary: String,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let binary = if self.binary.is_empty() {
            "ipset"
        } else {
            self.binary.as_str()
        };
        let output = Command::new(binary)
            .args(args)
            .output()
            .await
            .map_err(Error::Spawn)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(Error::Backend(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }
}
