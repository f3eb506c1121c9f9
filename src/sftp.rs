//! Optional SFTP authorized-keys upload hook (narrow collaborator).
//!
//! Grounded in `YuehaiTeam-kachina-installer`'s `SftpMiddleware`: open a
//! session channel on an already-authenticated handle, request the
//! `"sftp"` subsystem, and hand the resulting stream to
//! `russh_sftp::client::SftpSession`. When no installer is configured the
//! Client Facade falls back to a text-import shell dialog instead.

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ClientError;
use crate::transport::DialHandler;

/// Uploads an authorized-keys file to the device over SFTP.
#[async_trait]
pub trait SftpKeyInstaller: Send + Sync {
    async fn install_authorized_keys(
        &self,
        handle: &mut Handle<DialHandler>,
        remote_path: &str,
        contents: &[u8],
    ) -> Result<(), ClientError>;
}

/// Default [`SftpKeyInstaller`] backed by `russh-sftp`.
pub struct RusshSftpInstaller;

#[async_trait]
impl SftpKeyInstaller for RusshSftpInstaller {
    async fn install_authorized_keys(
        &self,
        handle: &mut Handle<DialHandler>,
        remote_path: &str,
        contents: &[u8],
    ) -> Result<(), ClientError> {
        let channel = handle.channel_open_session().await.map_err(ClientError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(ClientError::Ssh)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(ClientError::Sftp)?;

        debug!(remote_path, len = contents.len(), "uploading authorized_keys over sftp");
        let mut file = sftp
            .open_with_flags(
                remote_path,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await
            .map_err(ClientError::Sftp)?;
        file.write_all(contents).await.map_err(ClientError::Io)?;
        file.shutdown().await.map_err(ClientError::Io)?;
        Ok(())
    }
}
