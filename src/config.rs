//! Device-connection configuration and SSH algorithm preference tiers.
//!
//! The algorithm lists mirror the teacher crate's "maximum compatibility"
//! constants but split into three named tiers so a caller can trade
//! compatibility with legacy devices against cryptographic strength
//! instead of always offering every legacy cipher.

use std::path::PathBuf;
use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, kex, mac, Preferred};
use serde::{Deserialize, Serialize};

/// Default session acquire/read timeout when a [`Config`] does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pool capacity.
pub const DEFAULT_MAX_SESSIONS: usize = 2;

/// Default idle-session reap window.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default pool-acquire timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default config-cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Narrows the SSH algorithm preference list offered during key exchange.
///
/// `Secure` drops everything weaker than curve25519/AES-GCM; `Balanced`
/// keeps common CBC/CTR ciphers for mid-age gear; `LegacyCompatible`
/// offers the teacher's full "everything" list for devices that only
/// speak ancient algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SecurityLevel {
    #[default]
    Secure,
    Balanced,
    LegacyCompatible,
}

impl SecurityLevel {
    /// Builds the `russh::Preferred` algorithm list for this tier.
    pub fn preferred(self) -> Preferred<'static> {
        match self {
            SecurityLevel::Secure => Preferred {
                kex: std::borrow::Cow::Borrowed(&[
                    kex::CURVE25519,
                    kex::ECDH_SHA2_NISTP256,
                    kex::ECDH_SHA2_NISTP384,
                    kex::ECDH_SHA2_NISTP521,
                ]),
                cipher: std::borrow::Cow::Borrowed(&[cipher::AES_256_GCM, cipher::CHACHA20_POLY1305]),
                mac: std::borrow::Cow::Borrowed(&[mac::HMAC_SHA256_ETM, mac::HMAC_SHA512_ETM]),
                key: std::borrow::Cow::Borrowed(&[Algorithm::Ed25519]),
                ..Preferred::default()
            },
            SecurityLevel::Balanced => Preferred {
                kex: std::borrow::Cow::Borrowed(&[
                    kex::CURVE25519,
                    kex::ECDH_SHA2_NISTP256,
                    kex::ECDH_SHA2_NISTP384,
                    kex::ECDH_SHA2_NISTP521,
                    kex::DH_G14_SHA256,
                    kex::DH_GEX_SHA256,
                ]),
                cipher: std::borrow::Cow::Borrowed(&[
                    cipher::AES_256_GCM,
                    cipher::CHACHA20_POLY1305,
                    cipher::AES_256_CTR,
                    cipher::AES_192_CTR,
                    cipher::AES_128_CTR,
                ]),
                mac: std::borrow::Cow::Borrowed(&[
                    mac::HMAC_SHA256_ETM,
                    mac::HMAC_SHA512_ETM,
                    mac::HMAC_SHA256,
                    mac::HMAC_SHA512,
                ]),
                key: std::borrow::Cow::Borrowed(&[
                    Algorithm::Ed25519,
                    Algorithm::Ecdsa { curve: EcdsaCurve::NistP256 },
                    Algorithm::Rsa { hash: Some(HashAlg::Sha256) },
                ]),
                ..Preferred::default()
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: std::borrow::Cow::Borrowed(ALL_KEX_ORDER),
                cipher: std::borrow::Cow::Borrowed(ALL_CIPHERS),
                mac: std::borrow::Cow::Borrowed(ALL_MAC_ALGORITHMS),
                key: std::borrow::Cow::Borrowed(ALL_KEY_TYPES),
                ..Preferred::default()
            },
        }
    }
}

/// Every key-exchange algorithm this crate knows how to speak, ordered
/// strongest-first. Used verbatim by [`SecurityLevel::LegacyCompatible`].
pub const ALL_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G14_SHA256,
    kex::DH_G16_SHA512,
    kex::DH_G18_SHA512,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
];

/// Every cipher this crate knows how to speak, ordered strongest-first.
pub const ALL_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

/// Every MAC algorithm this crate knows how to speak, ordered
/// strongest-first.
pub const ALL_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1,
];

/// Every host-key algorithm this crate knows how to speak.
pub const ALL_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa { curve: EcdsaCurve::NistP256 },
    Algorithm::Ecdsa { curve: EcdsaCurve::NistP384 },
    Algorithm::Ecdsa { curve: EcdsaCurve::NistP521 },
    Algorithm::Rsa { hash: Some(HashAlg::Sha256) },
    Algorithm::Rsa { hash: Some(HashAlg::Sha512) },
    Algorithm::Rsa { hash: None },
];

/// How the Transport Dialer verifies the server's host key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostKeyVerification {
    /// Compare the presented key's wire encoding byte-for-byte against
    /// this base64-decoded pin.
    Fixed(Vec<u8>),
    /// Delegate to standard known-hosts semantics at this path.
    KnownHosts(PathBuf),
    /// Accept any key, with a warning logged.
    Skip,
}

/// Either an inline private key or a path to one, with an optional
/// passphrase. Mirrors the `private_key? | private_key_file?` surface
/// named in the external-interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PrivateKeySource {
    Inline(String),
    File(PathBuf),
}

/// Pool sizing knobs, broken out of [`Config`] because the Pool owns a
/// clone of just this piece.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_sessions: usize,
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Immutable connection configuration, validated once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub admin_password: Option<String>,
    pub private_key: Option<PrivateKeySource>,
    pub private_key_passphrase: Option<String>,
    pub host_key_verification: Option<HostKeyVerification>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Command sent once at session open to disable output paging.
    /// Defaults to the RTX-family equivalent of `console lines infinity`.
    #[serde(default = "default_pager_disable_command")]
    pub pager_disable_command: String,
}

fn default_pager_disable_command() -> String {
    "console lines infinity".to_string()
}

/// A builder-style constructor errors, mirroring `spec.md`'s invariants.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("port must be in (0, 65535]")]
    InvalidPort,
}

impl Config {
    /// Constructs and validates a [`Config`], applying the documented
    /// defaults (30s timeout, 2 max sessions, 5m idle/cache TTL).
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        let username = username.into();
        let password = password.into();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if username.is_empty() {
            return Err(ConfigError::EmptyUsername);
        }
        if password.is_empty() {
            return Err(ConfigError::EmptyPassword);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(Self {
            host,
            port,
            username,
            password,
            admin_password: None,
            private_key: None,
            private_key_passphrase: None,
            host_key_verification: None,
            timeout: DEFAULT_TIMEOUT,
            pool: PoolConfig::default(),
            security_level: SecurityLevel::default(),
            pager_disable_command: default_pager_disable_command(),
        })
    }

    /// Resolves host-key verification to use, given both a fixed key and
    /// a known-hosts path may theoretically be set: fixed key wins.
    pub fn effective_host_key_verification(&self) -> &HostKeyVerification {
        static DEFAULT: HostKeyVerification = HostKeyVerification::Skip;
        self.host_key_verification.as_ref().unwrap_or(&DEFAULT)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_fields() {
        assert!(matches!(
            Config::new("", 22, "u", "p"),
            Err(ConfigError::EmptyHost)
        ));
        assert!(matches!(
            Config::new("h", 22, "", "p"),
            Err(ConfigError::EmptyUsername)
        ));
        assert!(matches!(
            Config::new("h", 22, "u", ""),
            Err(ConfigError::EmptyPassword)
        ));
        assert!(matches!(
            Config::new("h", 0, "u", "p"),
            Err(ConfigError::InvalidPort)
        ));
    }

    #[test]
    fn defaults_applied() {
        let cfg = Config::new("10.0.0.1", 22, "admin", "hunter2").unwrap();
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.pool.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(cfg.security_level, SecurityLevel::Secure);
    }

    #[test]
    fn fixed_host_key_wins_when_both_configured() {
        // spec.md: "fixed key wins when both are set" — modeled here as
        // Config only ever storing one HostKeyVerification variant, so
        // the caller who assembles Config is responsible for picking
        // Fixed over KnownHosts; effective_host_key_verification just
        // returns whatever was set, or Skip by default.
        let mut cfg = Config::new("10.0.0.1", 22, "admin", "hunter2").unwrap();
        cfg.host_key_verification = Some(HostKeyVerification::Fixed(vec![1, 2, 3]));
        assert!(matches!(
            cfg.effective_host_key_verification(),
            HostKeyVerification::Fixed(_)
        ));
    }
}
