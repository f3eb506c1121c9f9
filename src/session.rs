//! Interactive Session (C2): owns exactly one interactive shell channel
//! and presents a synchronous `send(cmd) -> bytes` over it.
//!
//! Grounded in the teacher's `SharedSshClient::new` / `write_with_timeout`
//! (`src/session/client.rs`): a PTY+shell channel read in a loop,
//! accumulating bytes until the Prompt Detector reports a prompt at the
//! tail or the deadline expires.

use std::time::{Duration, Instant};

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::pool::{SendOutcome, SessionTransport};
use crate::prompt::{detect_prompt, PromptKind};
use crate::sanitize::sanitize_for_log;
use crate::transport::DialHandler;

/// Result of one `send`: the accumulated bytes before the final prompt,
/// and the prompt string that ended the read. [`SendOutcome`] (defined on
/// the [`SessionTransport`] trait) carries only the `prompt_kind` the
/// Executor needs; this richer local type keeps the literal prompt text
/// around for the echo-free framing this module does internally.
#[derive(Debug, Clone)]
pub struct RawSendOutcome {
    pub bytes: Vec<u8>,
    pub prompt_kind: PromptKind,
    pub prompt: String,
}

/// One interactive SSH shell channel, with session-local serialization.
pub struct InteractiveSession {
    // Held to keep the underlying connection alive; the channel is what
    // actually carries I/O.
    _handle: Handle<DialHandler>,
    io: AsyncMutex<ChannelIo>,
    closed: std::sync::atomic::AtomicBool,
    pager_disable_command: String,
}

struct ChannelIo {
    channel: Channel<Msg>,
    buf: Vec<u8>,
}

impl InteractiveSession {
    /// Opens a new session: requests PTY+shell on `channel`, reads the
    /// banner until the first prompt, and optionally disables paging.
    pub async fn open(
        handle: Handle<DialHandler>,
        channel: Channel<Msg>,
        pager_disable_command: String,
        deadline: Duration,
    ) -> Result<Self, ClientError> {
        let mut io = ChannelIo {
            channel,
            buf: Vec::new(),
        };
        // Discard the banner: read until the first prompt and drop it,
        // per spec.md 4.2.1 ("the core does not expose it").
        read_until_prompt(&mut io, deadline).await?;

        let session = Self {
            _handle: handle,
            io: AsyncMutex::new(io),
            closed: std::sync::atomic::AtomicBool::new(false),
            pager_disable_command,
        };

        if !session.pager_disable_command.is_empty() {
            session.send(&session.pager_disable_command, deadline).await?;
        }
        Ok(session)
    }

    /// Writes `cmd + "\r"` and reads until the Prompt Detector reports a
    /// prompt at the tail, or `deadline` expires. Returns bytes excluding
    /// the final prompt line; command echo is NOT stripped (spec.md 4.2.2).
    pub async fn send(&self, cmd: &str, deadline: Duration) -> Result<RawSendOutcome, ClientError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ClientError::Internal("session is closed".into()));
        }
        debug!(cmd = %sanitize_for_log(cmd), "session send");

        let mut io = self.io.lock().await;
        io.channel
            .data(format!("{cmd}\r").as_bytes())
            .await
            .map_err(ClientError::Ssh)?;

        let (prompt_kind, prompt) = read_until_prompt(&mut io, deadline).await?;
        let bytes = strip_trailing_prompt(&io.buf, &prompt);
        io.buf.clear();
        Ok(RawSendOutcome {
            bytes,
            prompt_kind,
            prompt,
        })
    }

    /// Reads until `needle` appears anywhere in the accumulated buffer,
    /// or `deadline` expires.
    pub async fn read_until_string(&self, needle: &str, deadline: Duration) -> Result<Vec<u8>, ClientError> {
        let mut io = self.io.lock().await;
        let start = Instant::now();
        loop {
            if String::from_utf8_lossy(&io.buf).contains(needle) {
                let out = io.buf.clone();
                io.buf.clear();
                return Ok(out);
            }
            let remaining = deadline.checked_sub(start.elapsed()).unwrap_or_default();
            if remaining.is_zero() {
                return Err(ClientError::Prompt(format!("needle {needle:?} not seen")));
            }
            read_one_chunk(&mut io, remaining).await?;
        }
    }

    /// Reads until the Prompt Detector reports a prompt at the tail, or
    /// `deadline` expires.
    pub async fn read_until_prompt(&self, deadline: Duration) -> Result<(PromptKind, String), ClientError> {
        let mut io = self.io.lock().await;
        read_until_prompt(&mut io, deadline).await
    }

    /// Signals the reader to stop and marks the session unusable. Further
    /// `send` calls return an error.
    pub async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        let io = self.io.lock().await;
        let _ = io.channel.eof().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

async fn read_until_prompt(io: &mut ChannelIo, deadline: Duration) -> Result<(PromptKind, String), ClientError> {
    let start = Instant::now();
    loop {
        if let Some((kind, prompt)) = detect_prompt(&io.buf) {
            if matches!(kind, PromptKind::Pager) {
                // Defensive fallback: auto-advance past a pager marker
                // even though paging is disabled at open. Only the
                // marker line is dropped — the rest of the accumulated
                // output (prior pages) must survive so the eventual
                // return value still holds the full command output.
                io.channel.data(b" ").await.map_err(ClientError::Ssh)?;
                io.buf = strip_trailing_prompt(&io.buf, &prompt);
                continue;
            }
            return Ok((kind, prompt));
        }
        let remaining = deadline.checked_sub(start.elapsed()).unwrap_or_default();
        if remaining.is_zero() {
            return Err(ClientError::Prompt("no prompt within read deadline".into()));
        }
        read_one_chunk(io, remaining).await?;
    }
}

async fn read_one_chunk(io: &mut ChannelIo, timeout: Duration) -> Result<(), ClientError> {
    match tokio::time::timeout(timeout, io.channel.wait()).await {
        Ok(Some(ChannelMsg::Data { data })) => {
            trace!(len = data.len(), "session recv data");
            io.buf.extend_from_slice(&data);
            Ok(())
        }
        Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
            io.buf.extend_from_slice(&data);
            Ok(())
        }
        Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) => {
            Err(ClientError::Internal("channel disconnected while waiting for prompt".into()))
        }
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(ClientError::Internal("connection closed".into())),
        Err(_) => Err(ClientError::Timeout("read deadline elapsed".into())),
    }
}

/// Strips the trailing prompt line (and its leading newline) from the
/// accumulated buffer, returning everything before it.
fn strip_trailing_prompt(buf: &[u8], prompt: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(buf);
    if let Some(idx) = text.rfind(prompt) {
        text[..idx].trim_end_matches(['\r', '\n']).as_bytes().to_vec()
    } else {
        buf.to_vec()
    }
}

#[async_trait::async_trait]
impl SessionTransport for InteractiveSession {
    async fn send(&self, cmd: &str, deadline: Duration) -> Result<SendOutcome, ClientError> {
        InteractiveSession::send(self, cmd, deadline).await.map(|outcome| SendOutcome {
            bytes: outcome.bytes,
            prompt_kind: outcome.prompt_kind,
        })
    }

    async fn read_until_prompt(&self, deadline: Duration) -> Result<(), ClientError> {
        InteractiveSession::read_until_prompt(self, deadline).await.map(|_| ())
    }

    async fn close(&self) {
        InteractiveSession::close(self).await
    }

    fn is_closed(&self) -> bool {
        InteractiveSession::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_trailing_prompt_removes_final_line() {
        let buf = b"show version\r\nRevision X\r\nR1>";
        let stripped = strip_trailing_prompt(buf, "R1>");
        assert_eq!(String::from_utf8_lossy(&stripped), "show version\r\nRevision X");
    }

    #[test]
    fn strip_trailing_prompt_is_noop_when_prompt_absent() {
        let buf = b"no prompt here";
        let stripped = strip_trailing_prompt(buf, "R1>");
        assert_eq!(stripped, buf.to_vec());
    }
}
