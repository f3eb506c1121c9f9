//! # rtx-client-core
//!
//! Core of a network-device management client for a family of
//! small-business routers that expose only an interactive SSH
//! command-line interface. This crate owns the hard engineering —
//! reliably driving an interactive text protocol concurrently — and
//! leaves the hundred-plus resource wrappers, command builders, and text
//! parsers to an external collaborator (an infrastructure-as-code
//! provider) that talks to this core through `Run`/`RunBatch` plus the
//! sanitize/classify helpers.
//!
//! ## Layering
//!
//! - [`transport`] dials the SSH transport and authenticates (C1).
//! - [`session`] owns one interactive shell channel (C2).
//! - [`prompt`] classifies buffer tails as prompts or challenges (C3).
//! - [`pool`] bounds and reuses live sessions (C4).
//! - [`executor`] runs commands through the pool with retries and
//!   privilege escalation (C5).
//! - [`cache`] is a TTL + dirty-flag store for the device's text config (C6).
//! - [`retry`] supplies pluggable backoff strategies (C7).
//! - [`error`] and [`sanitize`] hold the error taxonomy and log
//!   redaction vocabulary (C8).
//! - [`client`] is the facade external callers construct (C9).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rtx_client_core::client::Client;
//! use rtx_client_core::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("192.168.1.1", 22, "admin", "password")?;
//!     let client = Client::new(config);
//!     client.dial().await?;
//!     let output = client.run("show version").await?;
//!     println!("{}", String::from_utf8_lossy(&output));
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod pool;
pub mod prompt;
pub mod retry;
pub mod sanitize;
pub mod session;
pub mod sftp;
pub mod transport;

pub use client::Client;
pub use config::Config;
pub use error::ClientError;
