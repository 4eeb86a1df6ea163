//! Certificate revocation lists.
//!
//! Revocation status is established from CRLs only. CRLs come from the
//! document's DSS or are fetched from the distribution points named in the
//! certificates, through a [`RevocationFetcher`].

use super::certificate::Certificate;
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

/// A decoded CRL.
#[derive(Debug, Clone)]
pub struct Crl {
    der: Vec<u8>,
    issuer_raw: Vec<u8>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: Vec<(Vec<u8>, DateTime<Utc>)>,
    tbs: Vec<u8>,
    signature_oid: String,
    signature_value: Vec<u8>,
}

impl Crl {
    /// Decode a DER CRL.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, crl) =
            CertificateRevocationList::from_der(der).map_err(|e| Error::Asn1(format!("invalid CRL: {}", e)))?;
        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| {
                (
                    strip_zeros(entry.raw_serial()).to_vec(),
                    timestamp(entry.revocation_date.timestamp()),
                )
            })
            .collect();
        Ok(Self {
            der: der.to_vec(),
            issuer_raw: crl.issuer().as_raw().to_vec(),
            this_update: timestamp(crl.last_update().timestamp()),
            next_update: crl.next_update().map(|t| timestamp(t.timestamp())),
            revoked,
            tbs: crl.tbs_cert_list.as_ref().to_vec(),
            signature_oid: crl.signature_algorithm.algorithm.to_id_string(),
            signature_value: crl.signature_value.data.to_vec(),
        })
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Whether this CRL was issued by `issuer`'s subject name.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_raw == issuer.subject_raw()
    }

    /// Whether `at` lies between thisUpdate and nextUpdate.
    pub fn is_current_at(&self, at: DateTime<Utc>) -> bool {
        self.this_update <= at && self.next_update.map(|next| at <= next).unwrap_or(true)
    }

    /// Revocation date of `cert`, if listed.
    pub fn revocation_of(&self, cert: &Certificate) -> Option<DateTime<Utc>> {
        let serial = strip_zeros(cert.serial());
        self.revoked
            .iter()
            .find(|(revoked, _)| revoked.as_slice() == serial)
            .map(|(_, date)| *date)
    }

    /// Check the CRL signature with `issuer`'s key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        let digest = DigestAlgorithm::from_rsa_signature_oid(&self.signature_oid)
            .ok_or_else(|| Error::Unsupported(format!("CRL signature algorithm {}", self.signature_oid)))?;
        issuer
            .rsa_public_key()?
            .verify(digest.pkcs1v15(), &digest.digest(&self.tbs), &self.signature_value)
            .map_err(|e| Error::Crypto(format!("CRL signature does not verify: {}", e)))
    }
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Retrieves CRLs by distribution point URL.
#[async_trait]
pub trait RevocationFetcher: Send + Sync {
    /// Fetch and decode the CRL published at `url`.
    async fn fetch_crl(&self, url: &str) -> Result<Crl>;
}

/// CRL retrieval over HTTP GET.
pub struct HttpRevocationFetcher {
    http: reqwest::Client,
}

impl HttpRevocationFetcher {
    /// Fetcher sharing `http`.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RevocationFetcher for HttpRevocationFetcher {
    async fn fetch_crl(&self, url: &str) -> Result<Crl> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Unsupported(format!("CRL distribution point {}", url)));
        }
        log::debug!("fetching CRL {}", url);
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::from_status(response.status()));
        }
        let body = response.bytes().await?;
        Crl::from_der(&body)
    }
}

/// Fetcher for offline operation; every fetch fails.
pub struct NoFetch;

#[async_trait]
impl RevocationFetcher for NoFetch {
    async fn fetch_crl(&self, url: &str) -> Result<Crl> {
        Err(Error::Unsupported(format!("revocation fetching disabled ({})", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_crl() {
        assert!(Crl::from_der(b"\x30\x03\x02\x01\x00").is_err());
    }

    #[test]
    fn test_strip_zeros() {
        assert_eq!(strip_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert_eq!(strip_zeros(&[0]), &[] as &[u8]);
    }

    #[tokio::test]
    async fn test_no_fetch() {
        assert!(NoFetch.fetch_crl("http://crl.test/a.crl").await.is_err());
    }
}
