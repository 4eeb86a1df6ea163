//! Certificate path validation.
//!
//! A [`ValidationContext`] holds trust roots, a pool of candidate
//! intermediates, known CRLs and the revocation policy. The same context
//! type is used when signing (to collect the evidence embedded in the DSS)
//! and when verifying.

use super::certificate::{Certificate, CertificateChain};
use super::revocation::{Crl, RevocationFetcher};
use crate::config::RevocationMode;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Maximum certificates in a built path.
const MAX_PATH_LENGTH: usize = 10;

/// Outcome of validating one certificate.
#[derive(Debug, Clone, Default)]
pub struct PathValidation {
    /// Certificates from the validated one up to the anchor (or as far as the path could be built)
    pub path: Vec<Certificate>,
    /// Path reaches a trust root, every check passed and nothing is revoked
    pub trusted: bool,
    /// CRLs consulted, embedded or fetched
    pub crls: Vec<Crl>,
    /// Reasons the path is not trusted, and non-fatal warnings
    pub messages: Vec<String>,
}

/// Trust roots plus revocation policy.
#[derive(Clone)]
pub struct ValidationContext {
    trust_roots: Vec<Certificate>,
    intermediates: Vec<Certificate>,
    crls: Vec<Crl>,
    mode: RevocationMode,
    fetcher: Arc<dyn RevocationFetcher>,
}

impl std::fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("trust_roots", &self.trust_roots.len())
            .field("intermediates", &self.intermediates.len())
            .field("crls", &self.crls.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl ValidationContext {
    /// Context with the given roots and no other material.
    pub fn new(trust_roots: Vec<Certificate>, mode: RevocationMode, fetcher: Arc<dyn RevocationFetcher>) -> Self {
        Self {
            trust_roots,
            intermediates: Vec::new(),
            crls: Vec::new(),
            mode,
            fetcher,
        }
    }

    /// Context for signing with `chain`: its top certificate and `extra_roots` are trusted,
    /// the rest of the chain is available as intermediates.
    pub fn for_signing(
        chain: &CertificateChain,
        extra_roots: &[Certificate],
        mode: RevocationMode,
        fetcher: Arc<dyn RevocationFetcher>,
    ) -> Self {
        let mut roots = vec![chain.top().clone()];
        roots.extend(extra_roots.iter().filter(|r| *r != chain.top()).cloned());
        Self::new(roots, mode, fetcher).with_intermediates(chain.certificates())
    }

    /// Self-contained context for verifying a signature from its own embedded
    /// certificates. Self-issued certificates are the roots; when none is
    /// embedded the last certificate is.
    pub fn from_embedded(
        certificates: &[Certificate],
        mode: RevocationMode,
        fetcher: Arc<dyn RevocationFetcher>,
    ) -> Self {
        let mut roots: Vec<Certificate> = certificates.iter().filter(|c| c.is_self_issued()).cloned().collect();
        if roots.is_empty() {
            roots.extend(certificates.last().cloned());
        }
        Self::new(roots, mode, fetcher).with_intermediates(certificates)
    }

    /// Add candidate intermediates.
    pub fn with_intermediates(mut self, certs: &[Certificate]) -> Self {
        for cert in certs {
            if !self.intermediates.contains(cert) {
                self.intermediates.push(cert.clone());
            }
        }
        self
    }

    /// Add already known CRLs (for example from a DSS).
    pub fn with_crls(mut self, crls: Vec<Crl>) -> Self {
        self.crls.extend(crls);
        self
    }

    /// Trust roots.
    pub fn trust_roots(&self) -> &[Certificate] {
        &self.trust_roots
    }

    /// Revocation policy.
    pub fn mode(&self) -> RevocationMode {
        self.mode
    }

    fn is_root(&self, cert: &Certificate) -> bool {
        self.trust_roots.contains(cert)
    }

    fn find_issuer(&self, cert: &Certificate) -> Option<&Certificate> {
        self.trust_roots
            .iter()
            .chain(self.intermediates.iter())
            .filter(|candidate| *candidate != cert && cert.is_issued_by(candidate))
            .find(|candidate| cert.verify_signed_by(candidate).is_ok())
    }

    /// Build and check the path from `cert` to a trust root at time `at`.
    pub async fn validate(&self, cert: &Certificate, at: DateTime<Utc>) -> PathValidation {
        let mut outcome = PathValidation::default();
        let mut current = cert.clone();
        let mut anchored = false;
        let mut sound = true;

        for _ in 0..MAX_PATH_LENGTH {
            outcome.path.push(current.clone());
            if !current.is_valid_at(at) {
                sound = false;
                outcome
                    .messages
                    .push(format!("certificate {} is not valid at {}", current.subject(), at.to_rfc3339()));
            }
            if self.is_root(&current) {
                anchored = true;
                break;
            }
            let Some(issuer) = self.find_issuer(&current).cloned() else {
                let reason = if current.is_self_issued() {
                    format!("self-signed certificate {} is not a trust root", current.subject())
                } else {
                    format!("no issuer found for {}", current.subject())
                };
                outcome.messages.push(reason);
                break;
            };
            if !issuer.is_ca() {
                sound = false;
                outcome
                    .messages
                    .push(format!("issuer {} is not a certificate authority", issuer.subject()));
            }
            if !self.check_revocation(&current, &issuer, at, &mut outcome).await {
                sound = false;
            }
            current = issuer;
        }

        if !anchored && outcome.path.len() >= MAX_PATH_LENGTH {
            outcome.messages.push("certificate path too long".to_string());
        }
        outcome.trusted = anchored && sound;
        outcome
    }

    /// Returns false when `cert` is revoked or its status cannot be established.
    async fn check_revocation(
        &self,
        cert: &Certificate,
        issuer: &Certificate,
        at: DateTime<Utc>,
        outcome: &mut PathValidation,
    ) -> bool {
        let mut crls: Vec<Crl> = self
            .crls
            .iter()
            .filter(|crl| crl.is_issued_by(issuer) && crl.verify_signed_by(issuer).is_ok())
            .cloned()
            .collect();

        if crls.is_empty() {
            if cert.crl_urls().is_empty() {
                return true;
            }
            if !self.mode.allows_fetching() {
                outcome
                    .messages
                    .push(format!("no revocation information for {}", cert.subject()));
                return false;
            }
            for url in cert.crl_urls() {
                match self.fetcher.fetch_crl(url).await {
                    Ok(crl) if crl.is_issued_by(issuer) && crl.verify_signed_by(issuer).is_ok() => {
                        crls.push(crl);
                        break;
                    },
                    Ok(_) => {
                        log::warn!("CRL at {} is not signed by {}", url, issuer.subject());
                    },
                    Err(e) => {
                        log::warn!("revocation fetch from {} failed: {}", url, e);
                    },
                }
            }
            if crls.is_empty() {
                outcome
                    .messages
                    .push(format!("revocation status of {} could not be retrieved", cert.subject()));
                return false;
            }
        }

        let mut good = true;
        for crl in &crls {
            if !crl.is_current_at(Utc::now()) {
                outcome.messages.push(format!("CRL of {} is outdated", issuer.subject()));
            }
            if let Some(date) = crl.revocation_of(cert) {
                if date <= at {
                    good = false;
                    outcome
                        .messages
                        .push(format!("certificate {} was revoked at {}", cert.subject(), date.to_rfc3339()));
                }
            }
            if !outcome.crls.iter().any(|known| known.der() == crl.der()) {
                outcome.crls.push(crl.clone());
            }
        }
        good
    }
}

/// Load every PEM or DER certificate in `dir`.
///
/// A missing directory yields no roots; unreadable files are skipped.
pub fn load_trust_roots(dir: &Path) -> Result<Vec<Certificate>> {
    if !dir.is_dir() {
        log::debug!("no key store at {}", dir.display());
        return Ok(Vec::new());
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();

    let mut roots = Vec::new();
    for path in entries {
        let is_cert = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "pem" | "crt" | "cer" | "der"))
            .unwrap_or(false);
        if !is_cert {
            continue;
        }
        match std::fs::read(&path).map_err(Error::from).and_then(|data| Certificate::from_pem_or_der(&data)) {
            Ok(certs) => {
                log::debug!("loaded {} trust root(s) from {}", certs.len(), path.display());
                roots.extend(certs);
            },
            Err(e) => log::warn!("skipping key store entry {}: {}", path.display(), e),
        }
    }
    Ok(roots)
}
