//! Clients for the upstream PKI gateway.
//!
//! The private key never leaves the remote signing service. The signing
//! engine only sees the capabilities defined here:
//!
//! - [`CertificateChainSource`] resolves a profile's certificate chain,
//! - [`SignerProvider`] binds a [`DigestSigner`] to one profile for one
//!   signing operation.
//!
//! HTTP implementations live in [`client`]; tests substitute local ones.

pub mod client;
pub mod protocol;

pub use client::{CertificateChainClient, HttpSignerProvider, RemoteSigningClient};

use crate::config::SignerConfig;
use crate::error::{Error, Result};
use crate::signatures::{CertificateChain, DigestAlgorithm, SigningKind};
use async_trait::async_trait;

/// Credentials forwarded to the gateway.
#[derive(Clone, Default)]
pub struct UpstreamAuth {
    /// JWT sent as `Authorization: Bearer`
    pub bearer: String,
    /// Value of the `x-Gateway-APIKey` header
    pub api_key: String,
}

impl UpstreamAuth {
    /// Credentials from a bearer token and an API key.
    pub fn new(bearer: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            bearer: bearer.into(),
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamAuth").finish_non_exhaustive()
    }
}

/// Whose key signs, and through which flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    /// Profile identity (e-mail address)
    pub profile_name: String,
    /// Calling system
    pub system_id: String,
    /// Ordinary or stamp-duty flow
    pub kind: SigningKind,
}

/// Resolves certificate chains.
#[async_trait]
pub trait CertificateChainSource: Send + Sync {
    /// Fetch the chain of `identity`, leaf first.
    async fn fetch(&self, identity: &SignerIdentity, auth: &UpstreamAuth) -> Result<CertificateChain>;
}

/// Whether a signing call is real or only sizes the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Return a zero-filled signature of the expected size without any remote call
    Estimate,
    /// Produce the real signature
    Sign,
}

/// A signing key held elsewhere, bound to one profile.
#[async_trait]
pub trait DigestSigner: Send + Sync {
    /// Size in bytes of the raw signatures this key produces.
    fn signature_size(&self) -> usize;

    /// Sign `digest` remotely.
    async fn sign_raw(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;

    /// Sign `digest`, or return a zero-filled placeholder in
    /// [`SignMode::Estimate`]. A real signature of the wrong length is a
    /// [`Error::SigningProtocol`].
    async fn sign_digest(&self, digest: &[u8], algorithm: DigestAlgorithm, mode: SignMode) -> Result<Vec<u8>> {
        let expected = self.signature_size();
        if mode == SignMode::Estimate {
            return Ok(vec![0u8; expected]);
        }
        let signature = self.sign_raw(digest, algorithm).await?;
        if signature.len() != expected {
            return Err(Error::SigningProtocol(format!(
                "remote signature is {} bytes, expected {}",
                signature.len(),
                expected
            )));
        }
        Ok(signature)
    }
}

/// Creates bound signers.
pub trait SignerProvider: Send + Sync {
    /// Signer for `identity` producing `signature_size`-byte signatures.
    fn bind(&self, identity: &SignerIdentity, auth: &UpstreamAuth, signature_size: usize) -> Box<dyn DigestSigner>;
}

/// HTTP client shared by the upstream clients, with the configured timeout.
pub fn http_client(config: &SignerConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))
}
