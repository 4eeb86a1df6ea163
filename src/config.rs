//! Signing service configuration.
//!
//! Loading these values from the environment or a file is left to the
//! embedding application; every field has a default so a partial JSON
//! document deserializes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How revocation information is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RevocationMode {
    /// Use embedded CRLs and fetch missing ones from distribution points.
    #[default]
    Fetch,
    /// Use embedded CRLs only.
    Offline,
}

impl RevocationMode {
    /// Whether live fetching is permitted.
    pub fn allows_fetching(&self) -> bool {
        matches!(self, RevocationMode::Fetch)
    }
}

/// Signing service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignerConfig {
    /// Raw digest signing endpoint.
    pub signing_url: String,

    /// Certificate chain endpoint.
    pub chain_url: String,

    /// Certificate chain endpoint for stamp-duty profiles.
    pub stamp_duty_chain_url: String,

    /// RFC 3161 time stamp authority.
    pub tsa_url: String,

    /// Directory holding uploaded documents (`<id>.pdf`).
    pub unsigned_dir: PathBuf,

    /// Directory receiving signed documents (`signed_<id>.pdf`).
    pub signed_dir: PathBuf,

    /// Directory holding specimen images.
    pub specimen_dir: PathBuf,

    /// Directory of extra trust roots (PEM or DER).
    pub keystore_dir: PathBuf,

    /// Application name written to the signature build properties.
    pub app_name: String,

    /// Application version written to the signature build properties.
    pub app_version: String,

    /// Timeout applied to every upstream HTTP call, in seconds.
    pub timeout_secs: u64,

    /// Raw signature size used when it cannot be derived from the certificate.
    pub signature_size: usize,

    /// Revocation policy.
    pub revocation: RevocationMode,

    /// Case-insensitive subject fragment identifying stamp-duty signers.
    pub stamp_duty_marker: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SignerConfig {
    /// Create configuration with defaults.
    pub fn new() -> Self {
        Self {
            signing_url: "http://localhost:9044/signingHash/v1".to_string(),
            chain_url: "http://localhost:9044/getCertificateChain/v1".to_string(),
            stamp_duty_chain_url: "http://localhost:9044/getCertificateChainTerra/v1".to_string(),
            tsa_url: "http://localhost:8080/tsa".to_string(),
            unsigned_dir: PathBuf::from("/sharefolder/UNSIGNED"),
            signed_dir: PathBuf::from("/sharefolder/SIGNED"),
            specimen_dir: PathBuf::from("/sharefolder/SPECIMEN"),
            keystore_dir: PathBuf::from("/sharefolder/KEYSTORE"),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout_secs: 240,
            signature_size: 256,
            revocation: RevocationMode::Fetch,
            stamp_duty_marker: "meterai".to_string(),
        }
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Set the signing endpoint.
    pub fn with_signing_url(mut self, url: impl Into<String>) -> Self {
        self.signing_url = url.into();
        self
    }

    /// Set the certificate chain endpoint.
    pub fn with_chain_url(mut self, url: impl Into<String>) -> Self {
        self.chain_url = url.into();
        self
    }

    /// Set the stamp-duty certificate chain endpoint.
    pub fn with_stamp_duty_chain_url(mut self, url: impl Into<String>) -> Self {
        self.stamp_duty_chain_url = url.into();
        self
    }

    /// Set the time stamp authority.
    pub fn with_tsa_url(mut self, url: impl Into<String>) -> Self {
        self.tsa_url = url.into();
        self
    }

    /// Place all four stores under one base directory.
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        self.unsigned_dir = base.join("UNSIGNED");
        self.signed_dir = base.join("SIGNED");
        self.specimen_dir = base.join("SPECIMEN");
        self.keystore_dir = base.join("KEYSTORE");
        self
    }

    /// Set the unsigned document store.
    pub fn with_unsigned_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unsigned_dir = dir.into();
        self
    }

    /// Set the signed document store.
    pub fn with_signed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.signed_dir = dir.into();
        self
    }

    /// Set the specimen store.
    pub fn with_specimen_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.specimen_dir = dir.into();
        self
    }

    /// Set the extra trust root directory.
    pub fn with_keystore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keystore_dir = dir.into();
        self
    }

    /// Set the build properties.
    pub fn with_app(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.app_version = version.into();
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the fallback raw signature size.
    pub fn with_signature_size(mut self, size: usize) -> Self {
        self.signature_size = size;
        self
    }

    /// Set the revocation policy.
    pub fn with_revocation(mut self, mode: RevocationMode) -> Self {
        self.revocation = mode;
        self
    }

    /// Set the stamp-duty subject marker.
    pub fn with_stamp_duty_marker(mut self, marker: impl Into<String>) -> Self {
        self.stamp_duty_marker = marker.into();
        self
    }
}
