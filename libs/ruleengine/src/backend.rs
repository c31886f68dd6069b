use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Abstraction over "run this iptables operation", so the engine can be unit tested
/// without root or a real netfilter table.
#[allow(async_fn_in_trait)]
pub trait RuleBackend: Send + Sync + 'static {
    async fn new_chain(&self, table: &str, chain: &str) -> Result<()>;
    async fn chain_exists(&self, table: &str, chain: &str) -> Result<bool>;
    async fn append_unique(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
    async fn insert_front(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
    async fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
    async fn flush_chain(&self, table: &str, chain: &str) -> Result<()>;
    async fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;
    async fn rule_exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool>;
    async fn save(&self, path: &Path) -> Result<()>;
    async fn restore(&self, path: &Path) -> Result<()>;
}

/// Default backend: talks to the real `iptables`/`ip6tables` binaries through the
/// `iptables` crate. Every call is blocking under the hood (it shells out per
/// invocation), so each one runs on the blocking pool.
#[derive(Clone)]
pub struct IptablesBackend {
    inner: Arc<iptables::IPTables>,
    save_binary: &'static str,
    restore_binary: &'static str,
}

impl IptablesBackend {
    pub fn new(ipv6: bool) -> Result<Self> {
        let inner =
            iptables::new(ipv6).map_err(|err| Error::Backend(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(inner),
            save_binary: if ipv6 { "ip6tables-save" } else { "iptables-save" },
            restore_binary: if ipv6 {
                "ip6tables-restore"
            } else {
                "iptables-restore"
            },
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&iptables::IPTables) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|err| Error::Backend(format!("blocking task panicked: {err}")))?
    }
}

impl RuleBackend for IptablesBackend {
    async fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        let (table, chain) = (table.to_string(), chain.to_string());
        self.blocking(move |ipt| {
            if ipt
                .chain_exists(&table, &chain)
                .map_err(|err| Error::Backend(err.to_string()))?
            {
                return Ok(());
            }
            ipt.new_chain(&table, &chain)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        let (table, chain) = (table.to_string(), chain.to_string());
        self.blocking(move |ipt| {
            ipt.chain_exists(&table, &chain)
                .map_err(|err| Error::Backend(err.to_string()))
        })
        .await
    }

    async fn append_unique(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        let (table, chain, rule) = (table.to_string(), chain.to_string(), rule.to_string());
        self.blocking(move |ipt| {
            ipt.append_unique(&table, &chain, &rule)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn insert_front(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        let (table, chain, rule) = (table.to_string(), chain.to_string(), rule.to_string());
        self.blocking(move |ipt| {
            ipt.insert_unique(&table, &chain, &rule, 1)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        let (table, chain, rule) = (table.to_string(), chain.to_string(), rule.to_string());
        self.blocking(move |ipt| {
            ipt.delete(&table, &chain, &rule)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn flush_chain(&self, table: &str, chain: &str) -> Result<()> {
        let (table, chain) = (table.to_string(), chain.to_string());
        self.blocking(move |ipt| {
            ipt.flush_chain(&table, &chain)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        let (table, chain) = (table.to_string(), chain.to_string());
        self.blocking(move |ipt| {
            ipt.delete_chain(&table, &chain)
                .map_err(|err| Error::Backend(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn rule_exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool> {
        let (table, chain, rule) = (table.to_string(), chain.to_string(), rule.to_string());
        self.blocking(move |ipt| {
            ipt.exists(&table, &chain, &rule)
                .map_err(|err| Error::Backend(err.to_string()))
        })
        .await
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let output = Command::new(self.save_binary)
            .output()
            .await
            .map_err(Error::Spawn)?;
        if !output.status.success() {
            return Err(Error::Backend(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        tokio::fs::write(path, &output.stdout)
            .await
            .map_err(|err| Error::Snapshot(path_str, err))?;
        Ok(())
    }

    async fn restore(&self, path: &Path) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let path_str = path.to_string_lossy().into_owned();
        let contents = tokio::fs::read(path)
            .await
            .map_err(|err| Error::Snapshot(path_str.clone(), err))?;

        let mut child = Command::new(self.restore_binary)
            .arg("-n")
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(Error::Spawn)?;
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(&contents)
            .await
            .map_err(Error::Spawn)?;
        let status = child.wait().await.map_err(Error::Spawn)?;
        if !status.success() {
            return Err(Error::Backend(format!("{} exited with {status}", self.restore_binary)));
        }
        Ok(())
    }
}
