//! HTTP clients for the certificate chain and raw signing endpoints.

use super::protocol::{
    decode_body, ChainData, ChainRequest, SignHashData, SignHashEnvelope, SignHashRequest, UpstreamResponse,
    API_KEY_HEADER,
};
use super::{CertificateChainSource, DigestSigner, SignerIdentity, SignerProvider, UpstreamAuth};
use crate::error::{Error, Result};
use crate::signatures::{decode_base64, CertificateChain, DigestAlgorithm, SigningKind};
use async_trait::async_trait;
use base64::Engine;

/// POST `body` with the gateway headers and decode the envelope.
///
/// Anything but 200 is mapped by status alone; the body is not inspected.
async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    auth: &UpstreamAuth,
    body: &B,
) -> Result<UpstreamResponse<T>> {
    let response = http
        .post(url)
        .header(API_KEY_HEADER, &auth.api_key)
        .bearer_auth(&auth.bearer)
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        log::error!("{} answered {}", url, status);
        return Err(Error::from_status(status));
    }
    let bytes = response.bytes().await?;
    decode_body(status.as_u16(), &bytes)
}

/// Fetches certificate chains from the gateway.
pub struct CertificateChainClient {
    http: reqwest::Client,
    chain_url: String,
    stamp_duty_chain_url: String,
}

impl CertificateChainClient {
    /// Client using `chain_url` for ordinary profiles and
    /// `stamp_duty_chain_url` for stamp-duty ones.
    pub fn new(http: reqwest::Client, chain_url: impl Into<String>, stamp_duty_chain_url: impl Into<String>) -> Self {
        Self {
            http,
            chain_url: chain_url.into(),
            stamp_duty_chain_url: stamp_duty_chain_url.into(),
        }
    }

    fn url_for(&self, kind: SigningKind) -> &str {
        match kind {
            SigningKind::Ordinary => &self.chain_url,
            SigningKind::StampDuty => &self.stamp_duty_chain_url,
        }
    }
}

#[async_trait]
impl CertificateChainSource for CertificateChainClient {
    async fn fetch(&self, identity: &SignerIdentity, auth: &UpstreamAuth) -> Result<CertificateChain> {
        let url = self.url_for(identity.kind);
        log::info!("fetching certificate chain of {} ({})", identity.profile_name, identity.system_id);
        let request = ChainRequest {
            email: &identity.profile_name,
            system_id: &identity.system_id,
        };
        let response: UpstreamResponse<ChainData> = post_json(&self.http, url, auth, &request).await?;
        let data = response
            .into_data()?
            .ok_or_else(|| Error::CertificateDecode("response carries no certificate chain".to_string()))?;
        let chain = CertificateChain::from_base64_list(&data.signer_cert_chain)?;
        log::debug!("certificate chain of {}: {} certificate(s)", identity.profile_name, chain.len());
        Ok(chain)
    }
}

/// Raw signing client bound to one profile.
pub struct RemoteSigningClient {
    http: reqwest::Client,
    url: String,
    identity: SignerIdentity,
    auth: UpstreamAuth,
    signature_size: usize,
}

impl RemoteSigningClient {
    /// Client posting to `url` on behalf of `identity`.
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        identity: SignerIdentity,
        auth: UpstreamAuth,
        signature_size: usize,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            identity,
            auth,
            signature_size,
        }
    }
}

#[async_trait]
impl DigestSigner for RemoteSigningClient {
    fn signature_size(&self) -> usize {
        self.signature_size
    }

    async fn sign_raw(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let body = SignHashEnvelope {
            request_signing: SignHashRequest {
                data: base64::engine::general_purpose::STANDARD.encode(digest),
                email: &self.identity.profile_name,
                system_id: &self.identity.system_id,
                operation: self.identity.kind.wire_type(),
            },
        };
        log::debug!(
            "requesting {} signature of {}-byte digest for {}",
            algorithm.name(),
            digest.len(),
            self.identity.profile_name
        );
        let response: UpstreamResponse<SignHashData> = post_json(&self.http, &self.url, &self.auth, &body).await?;
        let data = response
            .into_data()?
            .ok_or_else(|| Error::SigningProtocol("response carries no signature".to_string()))?;
        log::info!("remote signature order {}", data.order_id);
        decode_base64(&data.signed_hash)
            .map_err(|e| Error::SigningProtocol(format!("signature is not valid base64: {}", e)))
    }
}

/// Binds [`RemoteSigningClient`]s to the configured signing endpoint.
pub struct HttpSignerProvider {
    http: reqwest::Client,
    url: String,
}

impl HttpSignerProvider {
    /// Provider for the endpoint at `url`.
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }
}

impl SignerProvider for HttpSignerProvider {
    fn bind(&self, identity: &SignerIdentity, auth: &UpstreamAuth, signature_size: usize) -> Box<dyn DigestSigner> {
        Box::new(RemoteSigningClient::new(
            self.http.clone(),
            self.url.clone(),
            identity.clone(),
            auth.clone(),
            signature_size,
        ))
    }
}
