//! X.509 certificates and chains.
//!
//! Certificates are parsed once with `x509-parser` and the fields the
//! signing and validation code needs are copied out, so a [`Certificate`]
//! owns its data and can be shared freely between tasks.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// A decoded X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    common_name: Option<String>,
    serial: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key_der: Vec<u8>,
    modulus_len: Option<usize>,
    tbs: Vec<u8>,
    signature_oid: String,
    signature_value: Vec<u8>,
    is_ca: bool,
    crl_urls: Vec<String>,
}

impl Certificate {
    /// Decode a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) =
            X509Certificate::from_der(der).map_err(|e| Error::CertificateDecode(format!("invalid certificate: {}", e)))?;
        if !rest.is_empty() {
            return Err(Error::CertificateDecode("trailing data after certificate".to_string()));
        }

        let validity = cert.validity();
        let modulus_len = match cert.public_key().parsed() {
            Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => {
                Some(rsa.modulus.iter().skip_while(|b| **b == 0).count())
            },
            _ => None,
        };

        let mut crl_urls = Vec::new();
        for ext in cert.extensions() {
            if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
                for point in points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_urls.push(uri.to_string());
                            }
                        }
                    }
                }
            }
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let certificate = Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            common_name,
            serial: cert.raw_serial().to_vec(),
            not_before: timestamp(validity.not_before.timestamp()),
            not_after: timestamp(validity.not_after.timestamp()),
            public_key_der: cert.public_key().raw.to_vec(),
            modulus_len,
            tbs: cert.tbs_certificate.as_ref().to_vec(),
            signature_oid: cert.signature_algorithm.algorithm.to_id_string(),
            signature_value: cert.signature_value.data.to_vec(),
            is_ca: cert.is_ca(),
            crl_urls,
        };
        Ok(certificate)
    }

    /// Decode a base64 DER certificate; padding is optional.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let der = decode_base64(encoded)
            .map_err(|e| Error::CertificateDecode(format!("invalid base64 certificate: {}", e)))?;
        Self::from_der(&der)
    }

    /// Decode a PEM or DER file's contents; PEM files may hold several certificates.
    pub fn from_pem_or_der(data: &[u8]) -> Result<Vec<Self>> {
        if !data.starts_with(b"-----BEGIN") && !data.windows(11).any(|w| w == b"-----BEGIN ") {
            return Ok(vec![Self::from_der(data)?]);
        }
        let mut certs = Vec::new();
        for pem in x509_parser::pem::Pem::iter_from_buffer(data) {
            let pem = pem.map_err(|e| Error::CertificateDecode(format!("invalid PEM: {}", e)))?;
            if pem.label == "CERTIFICATE" {
                certs.push(Self::from_der(&pem.contents)?);
            }
        }
        if certs.is_empty() {
            return Err(Error::CertificateDecode("no certificate in PEM data".to_string()));
        }
        Ok(certs)
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, RFC 4514 style.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name, RFC 4514 style.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Subject common name.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Serial number as big-endian bytes.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as lower-case hex.
    pub fn serial_hex(&self) -> String {
        self.serial.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Start of validity.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of validity.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `at` falls inside the validity period.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// CA basic constraint.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Issuer and subject are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Whether `issuer`'s subject is this certificate's issuer name.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_raw == issuer.subject_raw
    }

    /// DER of the subject name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// DER of the issuer name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// DER SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// RSA public key, if the certificate holds one.
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_der(&self.public_key_der)
            .map_err(|e| Error::Crypto(format!("unsupported public key: {}", e)))
    }

    /// Size in bytes of a raw RSA signature made with this certificate's key.
    pub fn signature_size(&self) -> Option<usize> {
        self.modulus_len
    }

    /// CRL distribution point URLs.
    pub fn crl_urls(&self) -> &[String] {
        &self.crl_urls
    }

    /// Check this certificate's signature with `issuer`'s public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        let digest = DigestAlgorithm::from_rsa_signature_oid(&self.signature_oid)
            .ok_or_else(|| Error::Unsupported(format!("certificate signature algorithm {}", self.signature_oid)))?;
        let key = issuer.rsa_public_key()?;
        key.verify(digest.pkcs1v15(), &digest.digest(&self.tbs), &self.signature_value)
            .map_err(|e| Error::Crypto(format!("certificate signature of {} does not verify: {}", self.subject, e)))
    }

    /// SHA-256 (or other) hash of the DER encoding.
    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.der)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Decode standard base64 with or without trailing padding.
pub fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD_NO_PAD.decode(cleaned.trim_end_matches('='))
}

/// Ordered certificate chain, leaf first.
#[derive(Debug, Clone)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// Build a chain; an empty list is rejected.
    pub fn new(certs: Vec<Certificate>) -> Result<Self> {
        if certs.is_empty() {
            return Err(Error::CertificateDecode("certificate chain is empty".to_string()));
        }
        Ok(Self { certs })
    }

    /// Decode a list of base64 DER certificates; any failure rejects the whole chain.
    pub fn from_base64_list<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let certs = entries
            .iter()
            .map(|e| Certificate::from_base64(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(certs)
    }

    /// The signing certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    /// The last certificate, used as trust anchor.
    pub fn top(&self) -> &Certificate {
        &self.certs[self.certs.len() - 1]
    }

    /// Every certificate, leaf first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false; chains are never empty.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}
