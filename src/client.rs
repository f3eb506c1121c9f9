//! Client Facade (C9): lifecycle (Dial/Close), a single `Run(cmd) ->
//! bytes` operation, and helpers (`SaveConfig`, `GetConfig`,
//! `GetSystemInfo`) that external resource wrappers layer on top.
//!
//! Owns the Config, Pool, Executor, and Cache. A lifecycle mutex guards
//! only the active flag and handle reads/writes — never held across I/O,
//! per spec.md 4.9.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::cache::ConfigCache;
use crate::config::Config;
use crate::error::ClientError;
use crate::executor::Executor;
use crate::pool::{Pool, SessionFactory};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::session::InteractiveSession;
use crate::sftp::SftpKeyInstaller;
use crate::transport;

/// The literal command the device accepts to persist configuration.
const SAVE_COMMAND: &str = "save";

/// Convention per spec.md 9: model is discovered once via this command's
/// first line of output.
const MODEL_DISCOVERY_COMMAND: &str = "show environment";

const GET_CONFIG_COMMAND: &str = "show config";

struct RealSessionFactory {
    config: Config,
}

#[async_trait]
impl SessionFactory<InteractiveSession> for RealSessionFactory {
    async fn create(&self) -> Result<InteractiveSession, ClientError> {
        let mut handle = transport::dial(&self.config).await?;
        let channel = transport::open_shell_channel(&mut handle, self.config.timeout).await?;
        InteractiveSession::open(
            handle,
            channel,
            self.config.pager_disable_command.clone(),
            self.config.timeout,
        )
        .await
    }
}

/// Entry point consumed by an external IaC provider: owns one device
/// connection's full stack (transport, pool, executor, cache).
pub struct Client {
    config: Config,
    lifecycle: AsyncMutex<()>,
    active: AtomicBool,
    pool: OnceCell<Arc<Pool<InteractiveSession>>>,
    executor: OnceCell<Executor<InteractiveSession>>,
    cache: ConfigCache<String>,
    model: OnceCell<String>,
    sftp_installer: Option<Arc<dyn SftpKeyInstaller>>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lifecycle: AsyncMutex::new(()),
            active: AtomicBool::new(false),
            pool: OnceCell::new(),
            executor: OnceCell::new(),
            cache: ConfigCache::new(),
            model: OnceCell::new(),
            sftp_installer: None,
        }
    }

    pub fn with_sftp_installer(mut self, installer: Arc<dyn SftpKeyInstaller>) -> Self {
        self.sftp_installer = Some(installer);
        self
    }

    /// Opens the pool. Lazy: no network I/O happens here, only the first
    /// `Acquire` actually connects. Idempotent.
    pub async fn dial(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        if self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        let factory = Arc::new(RealSessionFactory { config: self.config.clone() });
        let pool = Pool::new(
            factory,
            self.config.pool.max_sessions,
            self.config.pool.idle_timeout,
            self.config.pool.acquire_timeout,
        );
        pool.spawn_idle_reaper();
        let retry: Arc<dyn RetryStrategy> = Arc::new(ExponentialBackoff {
            base: std::time::Duration::from_millis(200),
            cap: std::time::Duration::from_secs(5),
            max_retries: 3,
        });
        let executor = Executor::new(
            Arc::clone(&pool),
            retry,
            self.config.admin_password.clone(),
            self.config.timeout,
        );
        // Both OnceCells are only ever written here, under the lifecycle
        // mutex, so a racing dial() sees active=true and returns early.
        let _ = self.pool.set(pool);
        let _ = self.executor.set(executor);
        self.active.store(true, Ordering::SeqCst);
        info!(host = %self.config.host, "client dialed");
        Ok(())
    }

    /// Closes the pool. Idempotent: a double-close is explicitly allowed.
    pub async fn close(&self) -> Result<(), ClientError> {
        let _guard = self.lifecycle.lock().await;
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        Ok(())
    }

    fn executor(&self) -> Result<&Executor<InteractiveSession>, ClientError> {
        self.executor
            .get()
            .ok_or_else(|| ClientError::Internal("client not dialed".into()))
    }

    /// Runs one command through the pool and executor.
    pub async fn run(&self, payload: &str) -> Result<Vec<u8>, ClientError> {
        self.executor()?.run(payload).await
    }

    /// Runs many commands on one acquired session, concatenating output.
    pub async fn run_batch(&self, payloads: &[&str]) -> Result<Vec<u8>, ClientError> {
        self.executor()?
            .run_batch(payloads)
            .await
            .map_err(|batch_err| batch_err.source)
    }

    /// Like [`Client::run`], but a device-side "not found" error line is
    /// demoted to [`ClientError::NotFound`] instead of propagating as
    /// [`ClientError::CommandFailed`] — the helper resource wrappers use
    /// when a missing resource isn't an error condition.
    pub async fn run_ignoring_not_found(&self, payload: &str) -> Result<Vec<u8>, ClientError> {
        self.executor()?.run_ignoring_not_found(payload).await
    }

    /// Walks the administrator-password-change dialog.
    pub async fn set_administrator_password(&self, old: &str, new: &str) -> Result<(), ClientError> {
        self.executor()?.set_administrator_password(old, new).await
    }

    /// Walks the login-password-change dialog.
    pub async fn set_login_password(&self, new: &str) -> Result<(), ClientError> {
        self.executor()?.set_login_password(new).await
    }

    /// Submits the literal `save` command. Callers decide transaction
    /// boundaries (spec.md 9's first open question) — this crate never
    /// guesses when to call it.
    pub async fn save_config(&self) -> Result<(), ClientError> {
        self.run(SAVE_COMMAND).await?;
        Ok(())
    }

    /// Cache-fronted config fetch: returns the cached parse if valid and
    /// not dirty, else fetches a fresh snapshot via the Executor.
    pub async fn get_config(&self) -> Result<String, ClientError> {
        if self.cache.is_valid().await && !self.cache.is_dirty().await {
            let (parsed, present) = self.cache.get().await;
            if present {
                return Ok(parsed.unwrap());
            }
        }
        let bytes = self.run(GET_CONFIG_COMMAND).await?;
        let raw = String::from_utf8_lossy(&bytes).to_string();
        self.cache.set(raw.clone(), raw.clone()).await;
        Ok(raw)
    }

    /// Marks the cached config stale after a mutating command. Higher
    /// layers call this, not the cache directly, to keep the "when is
    /// the device considered changed" policy in one place.
    pub async fn mark_config_dirty(&self) {
        self.cache.mark_dirty().await;
    }

    /// Runs the model-discovery command once and caches its first line.
    pub async fn discover_model(&self) -> Result<String, ClientError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }
        let (model, _bytes) = self.fetch_system_info().await?;
        Ok(model)
    }

    /// Returns the cached model (discovering it if necessary) plus raw
    /// system-info bytes, for resource wrappers that need both. Unlike
    /// `discover_model`, this always re-runs the command: system info
    /// (uptime, load) is live, only the model string is stable enough to
    /// cache.
    pub async fn get_system_info(&self) -> Result<(String, Vec<u8>), ClientError> {
        self.fetch_system_info().await
    }

    async fn fetch_system_info(&self) -> Result<(String, Vec<u8>), ClientError> {
        let bytes = self.run(MODEL_DISCOVERY_COMMAND).await?;
        let text = String::from_utf8_lossy(&bytes);
        let first_line = text.lines().next().unwrap_or("").trim().to_string();
        let _ = self.model.set(first_line.clone());
        Ok((first_line, bytes))
    }

    /// Uploads an authorized-keys file via the optional SFTP collaborator
    /// hook. Falls back to a text-import shell dialog when no installer
    /// is configured.
    pub async fn import_authorized_keys(
        &self,
        remote_path: &str,
        contents: &[u8],
        link_command: &str,
    ) -> Result<(), ClientError> {
        if let Some(installer) = &self.sftp_installer {
            let factory = RealSessionFactory { config: self.config.clone() };
            // SFTP runs on its own short-lived handle; it does not
            // consume a pool slot since it bypasses the shell-session
            // framing entirely.
            let mut dial_handle = transport::dial(&factory.config).await?;
            installer
                .install_authorized_keys(&mut dial_handle, remote_path, contents)
                .await?;
            self.run(link_command).await?;
            return Ok(());
        }

        // Fallback: text-import shell dialog, one line at a time.
        let text = String::from_utf8_lossy(contents);
        let mut cmds: Vec<&str> = text.lines().collect();
        cmds.push(link_command);
        self.run_batch(&cmds).await?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
