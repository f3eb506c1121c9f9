//! Executor (C5): a retry-aware, privilege-aware command runner.
//!
//! Acquires a pooled connection, escalates to administrator mode through
//! a second interactive password dialog when required, dispatches single
//! or batched commands, scans output for device-side error markers, and
//! sanitizes sensitive fragments before logging. Retry/backoff shape is
//! original to this core (none of the five teacher repos hand-roll a
//! retry loop); admin-mode escalation is grounded in the teacher's
//! `EnablePassword`/`Old_Password:`/`New_Password:` prompt handling.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::ClientError;
use crate::pool::{Pool, PoolHandle, SessionTransport};
use crate::prompt::PromptKind;
use crate::retry::RetryStrategy;
use crate::sanitize::sanitize_for_log;

/// Device-side error markers scanned for in command output. Both are
/// case-sensitive per the device's fixed casing.
const ERROR_MARKERS: &[&str] = &["Error:", "エラー"];

/// Substrings that indicate a password-change dialog was rejected.
const AUTH_REJECTION_MARKERS: &[&str] = &["incorrect", "failed", "Invalid"];

/// Result of a batch run: whatever output was produced before a failure,
/// plus the error and the zero-based index of the command that failed.
#[derive(Debug)]
pub struct BatchFailure {
    pub partial_output: Vec<u8>,
    pub failed_index: usize,
    pub source: ClientError,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch command {} failed: {}", self.failed_index, self.source)
    }
}

impl std::error::Error for BatchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Runs one or many commands via a [`Pool`] with retries, admin-mode
/// escalation, and device-side error classification.
pub struct Executor<S: SessionTransport> {
    pool: Arc<Pool<S>>,
    retry: Arc<dyn RetryStrategy>,
    admin_password: Option<String>,
    read_deadline: Duration,
}

impl<S: SessionTransport> Executor<S> {
    pub fn new(
        pool: Arc<Pool<S>>,
        retry: Arc<dyn RetryStrategy>,
        admin_password: Option<String>,
        read_deadline: Duration,
    ) -> Self {
        Self { pool, retry, admin_password, read_deadline }
    }

    /// Whether every acquired handle must be escalated to admin mode
    /// before running a command: required whenever an administrator
    /// password is configured, because privileged output is richer.
    fn admin_escalation_required(&self) -> bool {
        self.admin_password.is_some()
    }

    /// Runs `cmd` with retry, honoring the retry strategy's `(delay,
    /// give_up)` decisions. Device-side `CommandFailed` is never retried.
    pub async fn run(&self, cmd: &str) -> Result<Vec<u8>, ClientError> {
        let mut attempt = 0u32;
        loop {
            match self.run_once(cmd).await {
                Ok(bytes) => return Ok(bytes),
                Err(ClientError::CommandFailed(line)) => {
                    return Err(ClientError::CommandFailed(line));
                }
                Err(e) if crate::retry::is_retryable(&e) => {
                    let decision = self.retry.next(attempt);
                    if decision.give_up {
                        return Err(e.context(format!("gave up after {} attempts", attempt + 1)));
                    }
                    tokio::time::sleep(decision.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_once(&self, cmd: &str) -> Result<Vec<u8>, ClientError> {
        let started = std::time::Instant::now();
        debug!(cmd = %sanitize_for_log(cmd), "executor run");
        let handle = self.pool.acquire().await?;
        if let Err(e) = self.prepare(&handle).await {
            self.pool.discard(handle).await;
            return Err(e);
        }

        let result = match handle.session().send(cmd, self.read_deadline).await {
            Ok(outcome) => {
                if let Some(line) = scan_for_error_marker(&outcome.bytes) {
                    self.pool.release(handle).await;
                    Err(ClientError::CommandFailed(line))
                } else {
                    self.pool.release(handle).await;
                    Ok(outcome.bytes)
                }
            }
            Err(e) => {
                self.pool.discard(handle).await;
                Err(e)
            }
        };
        debug!(cmd = %sanitize_for_log(cmd), elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "executor run finished");
        result
    }

    /// Escalates to administrator mode if required and not already in
    /// that state: writes `administrator`, waits for `Password:`, writes
    /// the admin password, waits for the next prompt.
    async fn prepare(&self, handle: &PoolHandle<S>) -> Result<(), ClientError> {
        if !self.admin_escalation_required() || handle.is_admin_mode() {
            return Ok(());
        }
        let admin_password = self.admin_password.as_deref().unwrap_or_default();
        let _ = handle.session().send("administrator", self.read_deadline).await?;
        let response = handle.session().send(admin_password, self.read_deadline).await?;
        let response_text = String::from_utf8_lossy(&response.bytes);
        if contains_rejection(&response_text) || response.prompt_kind != PromptKind::Privileged {
            return Err(ClientError::AuthFailed("administrator escalation rejected".into()));
        }
        handle.set_admin_mode(true);
        Ok(())
    }

    /// Acquires once, prepares once, sends every command in sequence on
    /// the same session, concatenating outputs. On first failure the
    /// session is discarded and partial output is returned alongside the
    /// error. Order within a batch is preserved and externally
    /// observable.
    pub async fn run_batch(&self, cmds: &[&str]) -> Result<Vec<u8>, BatchFailure> {
        let handle = self.pool.acquire().await.map_err(|e| BatchFailure {
            partial_output: Vec::new(),
            failed_index: 0,
            source: e,
        })?;
        if let Err(e) = self.prepare(&handle).await {
            self.pool.discard(handle).await;
            return Err(BatchFailure { partial_output: Vec::new(), failed_index: 0, source: e });
        }

        let mut out = Vec::new();
        for (idx, cmd) in cmds.iter().enumerate() {
            match handle.session().send(cmd, self.read_deadline).await {
                Ok(outcome) => {
                    if let Some(line) = scan_for_error_marker(&outcome.bytes) {
                        out.extend_from_slice(&outcome.bytes);
                        self.pool.discard(handle).await;
                        return Err(BatchFailure {
                            partial_output: out,
                            failed_index: idx,
                            source: ClientError::CommandFailed(line),
                        });
                    }
                    out.extend_from_slice(&outcome.bytes);
                }
                Err(e) => {
                    self.pool.discard(handle).await;
                    return Err(BatchFailure { partial_output: out, failed_index: idx, source: e });
                }
            }
        }
        self.pool.release(handle).await;
        Ok(out)
    }

    /// Like [`Executor::run`], but a device-side error marker containing
    /// "not found" is demoted to [`ClientError::NotFound`] instead of
    /// propagating as [`ClientError::CommandFailed`]. The Executor itself
    /// always classifies strictly; only this wrapper demotes.
    pub async fn run_ignoring_not_found(&self, cmd: &str) -> Result<Vec<u8>, ClientError> {
        match self.run(cmd).await {
            Err(ClientError::CommandFailed(line)) if line.to_lowercase().contains("not found") => {
                Err(ClientError::NotFound(line))
            }
            other => other,
        }
    }

    /// Walks the `Old_Password:` / `New_Password:` / `New_Password:`
    /// dialog for changing the administrator password, then reads until
    /// the next prompt and checks for rejection markers.
    pub async fn set_administrator_password(&self, old: &str, new: &str) -> Result<(), ClientError> {
        let handle = self.pool.acquire().await?;
        if let Err(e) = self.prepare(&handle).await {
            self.pool.discard(handle).await;
            return Err(e);
        }
        let result = self
            .password_change_dialog(&handle, "administrator password", old, new)
            .await;
        match result {
            Ok(()) => {
                self.pool.release(handle).await;
                Ok(())
            }
            Err(e) => {
                self.pool.discard(handle).await;
                Err(e)
            }
        }
    }

    /// Same dialog shape but for the login password, which has no "old"
    /// prompt variant in this device family's dialog.
    pub async fn set_login_password(&self, new: &str) -> Result<(), ClientError> {
        let handle = self.pool.acquire().await?;
        let response = handle.session().send("password", self.read_deadline).await;
        let response = match response {
            Ok(outcome) => outcome,
            Err(e) => {
                self.pool.discard(handle).await;
                return Err(e);
            }
        };
        let _ = response;
        let response = handle.session().send(new, self.read_deadline).await;
        match response {
            Ok(outcome) => {
                let text = String::from_utf8_lossy(&outcome.bytes);
                if contains_rejection(&text) {
                    self.pool.discard(handle).await;
                    return Err(ClientError::AuthFailed("login password change rejected".into()));
                }
                self.pool.release(handle).await;
                Ok(())
            }
            Err(e) => {
                self.pool.discard(handle).await;
                Err(e)
            }
        }
    }

    async fn password_change_dialog(
        &self,
        handle: &PoolHandle<S>,
        change_command: &str,
        old: &str,
        new: &str,
    ) -> Result<(), ClientError> {
        let _ = handle.session().send(change_command, self.read_deadline).await?;
        let _ = handle.session().send(old, self.read_deadline).await?;
        let response = handle.session().send(new, self.read_deadline).await?;
        let text = String::from_utf8_lossy(&response.bytes);
        if contains_rejection(&text) {
            return Err(ClientError::AuthFailed(format!("{change_command} rejected")));
        }
        Ok(())
    }
}

fn scan_for_error_marker(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .find(|line| ERROR_MARKERS.iter().any(|marker| line.contains(marker)))
        .map(|line| line.to_string())
}

fn contains_rejection(text: &str) -> bool {
    AUTH_REJECTION_MARKERS.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, SendOutcome, SessionFactory};
    use crate::retry::{ExponentialBackoff, NoRetry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedSession {
        responses: StdMutex<std::collections::VecDeque<Result<SendOutcome, ClientError>>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl SessionTransport for ScriptedSession {
        async fn send(&self, _cmd: &str, _deadline: Duration) -> Result<SendOutcome, ClientError> {
            self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(SendOutcome { bytes: Vec::new(), prompt_kind: PromptKind::Unprivileged })
            })
        }
        async fn read_until_prompt(&self, _deadline: Duration) -> Result<(), ClientError> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct ScriptedFactory {
        scripts: StdMutex<std::collections::VecDeque<Vec<Result<SendOutcome, ClientError>>>>,
    }

    #[async_trait]
    impl SessionFactory<ScriptedSession> for ScriptedFactory {
        async fn create(&self) -> Result<ScriptedSession, ClientError> {
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(ScriptedSession {
                responses: StdMutex::new(script.into()),
                closed: AtomicBool::new(false),
            })
        }
    }

    /// Scripts a response with an explicit prompt kind — the shape a real
    /// stripped [`crate::session::InteractiveSession::send`] returns.
    fn with_kind(s: &str, kind: PromptKind) -> Result<SendOutcome, ClientError> {
        Ok(SendOutcome { bytes: s.as_bytes().to_vec(), prompt_kind: kind })
    }

    /// Scripts a response at the unprivileged prompt, the common case for
    /// plain command output in these tests.
    fn ok(s: &str) -> Result<SendOutcome, ClientError> {
        with_kind(s, PromptKind::Unprivileged)
    }

    #[tokio::test]
    async fn cold_run_returns_device_output() {
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![vec![ok(
                "show version\r\nRevision X\r\n",
            )]])),
        });
        let pool = Pool::new(factory, 2, Duration::from_secs(300), Duration::from_secs(1));
        let executor = Executor::new(pool.clone(), Arc::new(NoRetry), None, Duration::from_secs(1));
        let out = executor.run("show version").await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "show version\r\nRevision X\r\n");
        let stats = pool.stats().await;
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);
    }

    #[tokio::test]
    async fn admin_escalation_runs_once_then_skips() {
        // A real session strips the trailing prompt line before returning
        // bytes, so "administrator" and the password both come back with
        // empty bodies — only `prompt_kind` tells the escalation dialog
        // that the password was accepted (reaching the `#` prompt).
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![vec![
                with_kind("", PromptKind::PasswordChallenge),
                with_kind("", PromptKind::Privileged),
                ok("done\r\n"),
                ok("done again\r\n"),
            ]])),
        });
        let pool = Pool::new(factory, 1, Duration::from_secs(300), Duration::from_secs(1));
        let executor = Executor::new(
            pool.clone(),
            Arc::new(NoRetry),
            Some("A".into()),
            Duration::from_secs(1),
        );
        let out1 = executor.run("show running").await.unwrap();
        assert_eq!(String::from_utf8(out1).unwrap(), "done\r\n");
        let out2 = executor.run("show running").await.unwrap();
        assert_eq!(String::from_utf8(out2).unwrap(), "done again\r\n");
    }

    #[tokio::test]
    async fn admin_escalation_fails_when_password_does_not_reach_hash_prompt() {
        // The device can reject a bad admin password by silently dropping
        // back to the unprivileged prompt with no rejection keyword in the
        // body at all — only the prompt kind distinguishes this from a
        // successful escalation.
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![vec![
                with_kind("", PromptKind::PasswordChallenge),
                with_kind("", PromptKind::Unprivileged),
            ]])),
        });
        let pool = Pool::new(factory, 1, Duration::from_secs(300), Duration::from_secs(1));
        let executor = Executor::new(
            pool.clone(),
            Arc::new(NoRetry),
            Some("wrong".into()),
            Duration::from_secs(1),
        );
        let err = executor.run("show running").await.unwrap_err();
        assert!(matches!(err, ClientError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn device_error_marker_is_not_retried() {
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![vec![ok(
                "Error: unknown command\r\n",
            )]])),
        });
        let pool = Pool::new(factory, 1, Duration::from_secs(300), Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingStrategy(Arc<AtomicUsize>);
        impl RetryStrategy for CountingStrategy {
            fn next(&self, _attempt: u32) -> crate::retry::RetryDecision {
                self.0.fetch_add(1, Ordering::SeqCst);
                crate::retry::RetryDecision { delay: Duration::ZERO, give_up: true }
            }
        }
        let executor = Executor::new(
            pool,
            Arc::new(CountingStrategy(calls.clone())),
            None,
            Duration::from_secs(1),
        );
        let err = executor.run("bogus").await.unwrap_err();
        assert!(matches!(err, ClientError::CommandFailed(ref line) if line.contains("Error:")));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "device error must not consult retry strategy");
    }

    #[tokio::test]
    async fn batch_partial_output_on_mid_batch_failure() {
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![vec![
                ok("a-out\r\n"),
                ok("Error: b failed\r\n"),
            ]])),
        });
        let pool = Pool::new(factory, 1, Duration::from_secs(300), Duration::from_secs(1));
        let executor = Executor::new(pool, Arc::new(NoRetry), None, Duration::from_secs(1));
        let err = executor.run_batch(&["a", "b", "c"]).await.unwrap_err();
        assert_eq!(err.failed_index, 1);
        let partial = String::from_utf8(err.partial_output).unwrap();
        assert!(partial.contains("a-out"));
        assert!(partial.contains("Error: b failed"));
        assert!(matches!(err.source, ClientError::CommandFailed(_)));
    }

    #[tokio::test]
    async fn retryable_timeout_is_retried_up_to_bound() {
        // Each retryable failure discards its session, so the next
        // attempt dials a fresh one — script per session, in order.
        let factory = Arc::new(ScriptedFactory {
            scripts: StdMutex::new(std::collections::VecDeque::from(vec![
                vec![Err(ClientError::Timeout("t1".into()))],
                vec![Err(ClientError::Timeout("t2".into()))],
                vec![ok("finally\r\n")],
            ])),
        });
        let pool = Pool::new(factory, 1, Duration::from_secs(300), Duration::from_secs(1));
        let executor = Executor::new(
            pool,
            Arc::new(ExponentialBackoff {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(5),
                max_retries: 3,
            }),
            None,
            Duration::from_secs(1),
        );
        let out = executor.run("show version").await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "finally\r\n");
    }
}
