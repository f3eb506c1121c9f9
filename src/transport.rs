//! Transport Dialer (C1): builds the auth method list, verifies the host
//! key, opens the TCP+SSH connection, and hands back a connected client.
//!
//! Grounded directly in `russh::client` usage (not a higher-level
//! wrapper) because host-key verification and the RSA legacy-signature
//! quirk both require hooking `client::Handler::check_server_key` and
//! controlling the signature hash algorithm passed to
//! `authenticate_publickey` — both sit below any convenience wrapper.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg};
use russh::client::{self, Handle};
use tracing::{debug, warn};

use crate::config::{Config, HostKeyVerification};
use crate::error::ClientError;

/// `russh::client::Handler` that verifies the server's host key against
/// this crate's three verification strategies.
pub(crate) struct DialHandler {
    verification: HostKeyVerification,
    host: String,
    port: u16,
}

impl client::Handler for DialHandler {
    type Error = ClientError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.verification {
            HostKeyVerification::Skip => {
                warn!(host = %self.host, "host key verification skipped");
                Ok(true)
            }
            HostKeyVerification::Fixed(pinned) => {
                let presented = server_public_key.to_bytes().map_err(ClientError::SshKeys)?;
                if presented == *pinned {
                    Ok(true)
                } else {
                    Err(ClientError::HostKeyMismatch(format!(
                        "presented key does not match pinned key for {}:{}",
                        self.host, self.port
                    )))
                }
            }
            HostKeyVerification::KnownHosts(path) => {
                match russh::keys::known_hosts::check_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    path,
                ) {
                    Ok(true) => Ok(true),
                    Ok(false) => Err(ClientError::HostKeyMismatch(format!(
                        "unknown host key for {}:{}",
                        self.host, self.port
                    ))),
                    Err(_) => Err(ClientError::HostKeyMismatch(format!(
                        "host key changed for {}:{}",
                        self.host, self.port
                    ))),
                }
            }
        }
    }
}

/// Decodes a base64 fixed host-key pin into its raw wire-encoded bytes.
pub fn decode_fixed_host_key(base64_key: &str) -> Result<Vec<u8>, ClientError> {
    base64::engine::general_purpose::STANDARD
        .decode(base64_key)
        .map_err(|e| ClientError::Dial(format!("invalid base64 host key: {e}")))
}

/// For RSA keys, forces the legacy `ssh-rsa` signature algorithm instead
/// of `rsa-sha2-256`/`rsa-sha2-512` by passing `None` as the signature
/// hash algorithm; other key types are unaffected by the quirk and keep
/// SHA-256 signatures where applicable.
fn signature_hash_alg_for(key: &PrivateKey) -> Option<HashAlg> {
    match key.algorithm() {
        russh::keys::Algorithm::Rsa { .. } => None,
        _ => Some(HashAlg::Sha256),
    }
}

fn classify_dial_error(err: russh::Error) -> ClientError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("auth") || lower.contains("permission denied") {
        ClientError::AuthFailed(msg)
    } else {
        ClientError::Dial(msg)
    }
}

/// Produces a connected, authenticated SSH client handle bound to `config`.
pub async fn dial(config: &Config) -> Result<Handle<DialHandler>, ClientError> {
    let verification = config
        .host_key_verification
        .clone()
        .unwrap_or(HostKeyVerification::Skip);

    let ssh_config = Arc::new(client::Config {
        preferred: config.security_level.preferred(),
        inactivity_timeout: Some(config.timeout),
        ..client::Config::default()
    });

    let handler = DialHandler {
        verification,
        host: config.host.clone(),
        port: config.port,
    };

    let addr = (config.host.as_str(), config.port);
    debug!(host = %config.host, port = config.port, "dialing SSH transport");

    let mut handle = match tokio::time::timeout(config.timeout, client::connect(ssh_config, addr, handler)).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => return Err(classify_dial_error(e)),
        Err(_) => return Err(ClientError::Timeout(format!("dial to {}:{}", config.host, config.port))),
    };

    authenticate(&mut handle, config).await?;
    Ok(handle)
}

/// Offers authentication methods in priority order: explicit key, then
/// agent (left to the caller's environment — russh has no built-in agent
/// probe here so this is a no-op slot), then password, then
/// keyboard-interactive answering every prompt with the password.
async fn authenticate(handle: &mut Handle<DialHandler>, config: &Config) -> Result<(), ClientError> {
    if let Some(key_src) = &config.private_key {
        let key = load_private_key(key_src, config.private_key_passphrase.as_deref())?;
        let hash_alg = signature_hash_alg_for(&key);
        let keyed = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
        let result = handle
            .authenticate_publickey(&config.username, keyed)
            .await
            .map_err(classify_dial_error)?;
        if result.success() {
            return Ok(());
        }
        debug!("public-key authentication rejected, falling back to password");
    }

    let result = handle
        .authenticate_password(&config.username, &config.password)
        .await
        .map_err(classify_dial_error)?;
    if result.success() {
        return Ok(());
    }

    let result = handle
        .authenticate_keyboard_interactive_respond_all(&config.username, &config.password)
        .await
        .map_err(classify_dial_error)?;
    if result.success() {
        return Ok(());
    }

    Err(ClientError::AuthFailed(format!(
        "all authentication methods exhausted for {}",
        config.username
    )))
}

fn load_private_key(
    src: &crate::config::PrivateKeySource,
    passphrase: Option<&str>,
) -> Result<PrivateKey, ClientError> {
    match src {
        crate::config::PrivateKeySource::File(path) => {
            russh::keys::load_secret_key(path, passphrase).map_err(ClientError::SshKeys)
        }
        crate::config::PrivateKeySource::Inline(pem) => {
            russh::keys::decode_secret_key(pem, passphrase).map_err(ClientError::SshKeys)
        }
    }
}

/// Opens a PTY+shell channel on an already-authenticated handle. Split
/// out of `dial` so the Pool's session factory can reuse the same
/// `Handle` for one session, matching the Interactive Session's
/// single-channel-per-session contract.
pub async fn open_shell_channel(
    handle: &mut Handle<DialHandler>,
    read_timeout: Duration,
) -> Result<russh::Channel<client::Msg>, ClientError> {
    let channel = tokio::time::timeout(read_timeout, handle.channel_open_session())
        .await
        .map_err(|_| ClientError::Timeout("channel_open_session".into()))?
        .map_err(ClientError::Ssh)?;

    channel
        .request_pty(false, "vt100", 200, 50, 0, 0, &[])
        .await
        .map_err(ClientError::Ssh)?;
    channel.request_shell(false).await.map_err(ClientError::Ssh)?;
    Ok(channel)
}
