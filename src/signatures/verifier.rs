//! PDF signature verification.
//!
//! Every signature field of a document is checked on its own: integrity of
//! the signed byte ranges, the CMS signature, the embedded timestamp and
//! the signer's certificate path. Trust is self-contained: the roots are
//! the self-issued certificates embedded with each signature, and CRLs
//! come from the document's DSS or, when allowed, from the network.
//!
//! A failure inside one signature is recorded in its result and never
//! stops the others from being checked.

use super::byterange::ByteRangeCalculator;
use super::certificate::Certificate;
use super::cms::ParsedSignedData;
use super::dss::{read_dss, ValidationMaterial};
use super::revocation::{HttpRevocationFetcher, RevocationFetcher};
use super::timestamp::TimestampToken;
use super::types::{CertificateSummary, SignatureSubFilter, VerificationReport, VerificationResult};
use super::validation::ValidationContext;
use crate::config::{RevocationMode, SignerConfig};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, DictExt, Object};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

/// Verifies the signatures embedded in PDF documents.
#[derive(Clone)]
pub struct SignatureVerificationEngine {
    mode: RevocationMode,
    fetcher: Arc<dyn RevocationFetcher>,
    stamp_duty_marker: String,
}

impl SignatureVerificationEngine {
    /// Engine using `config`'s revocation mode and stamp-duty marker.
    pub fn new(config: &SignerConfig, fetcher: Arc<dyn RevocationFetcher>) -> Self {
        Self {
            mode: config.revocation,
            fetcher,
            stamp_duty_marker: config.stamp_duty_marker.clone(),
        }
    }

    /// Engine fetching CRLs over HTTP.
    pub fn from_config(config: &SignerConfig) -> Result<Self> {
        let http = crate::remote::http_client(config)?;
        Ok(Self::new(config, Arc::new(HttpRevocationFetcher::new(http))))
    }

    /// Whether a signer subject carries the stamp-duty marker.
    pub fn is_stamp_duty_subject(&self, subject: &str) -> bool {
        !self.stamp_duty_marker.is_empty()
            && subject
                .to_lowercase()
                .contains(&self.stamp_duty_marker.to_lowercase())
    }

    /// Verify a file.
    pub async fn verify_file(&self, path: impl AsRef<Path>, password: Option<&[u8]>) -> Result<VerificationReport> {
        let data = tokio::fs::read(path.as_ref()).await?;
        self.verify_bytes(data, password).await
    }

    /// Verify a document held in memory.
    ///
    /// Only document-level problems (unparseable file, wrong password) are
    /// errors; everything about an individual signature lands in its result.
    pub async fn verify_bytes(&self, data: Vec<u8>, password: Option<&[u8]>) -> Result<VerificationReport> {
        let mut doc = PdfDocument::from_bytes(data)?;
        if doc.is_encrypted() && !doc.authenticate(password.unwrap_or_default())? {
            return Err(Error::DecryptionFailed);
        }

        let material = read_dss(&doc).unwrap_or_else(|e| {
            log::warn!("ignoring unreadable DSS: {}", e);
            ValidationMaterial::default()
        });

        let mut results = Vec::new();
        for field in doc.form_fields()? {
            if field.field_type.as_deref() != Some("Sig") {
                continue;
            }
            let Some(value) = field.dict.get("V") else {
                log::debug!("signature field {} is not signed", field.full_name);
                continue;
            };
            let result = match doc.resolve_dict(value) {
                Ok(Some(sig)) => self.verify_signature(doc.data(), &field.full_name, &sig, &material).await,
                Ok(None) => failed(&field.full_name, "signature value is not a dictionary".to_string()),
                Err(e) => failed(&field.full_name, e.to_string()),
            };
            log::info!("signature {}: {:?}", result.field_name, result.status);
            results.push(result);
        }

        let stamp_duty = results
            .iter()
            .filter_map(|r| r.signer_subject.as_deref())
            .any(|subject| self.is_stamp_duty_subject(subject));
        Ok(VerificationReport::from_results(results, stamp_duty))
    }

    async fn verify_signature(
        &self,
        data: &[u8],
        field_name: &str,
        sig: &Dict,
        material: &ValidationMaterial,
    ) -> VerificationResult {
        let mut result = VerificationResult::new(field_name);
        describe(sig, &mut result);
        if let Err(e) = self.check(data, sig, material, &mut result).await {
            result.messages.push(e.to_string());
        }
        result.finish();
        result
    }

    async fn check(
        &self,
        data: &[u8],
        sig: &Dict,
        material: &ValidationMaterial,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let byte_range = sig
            .get("ByteRange")
            .and_then(ByteRangeCalculator::parse)
            .ok_or_else(|| Error::InvalidPdf("signature has no valid /ByteRange".to_string()))?;
        result.byte_range = byte_range.to_vec();
        ByteRangeCalculator::validate_byte_range(&byte_range, data.len())?;
        if !ByteRangeCalculator::gap_is_contents(data, &byte_range) {
            return Err(Error::InvalidPdf("byte range gap does not hold the signature value".to_string()));
        }
        result.covers_whole_document = (byte_range[2] + byte_range[3]) as usize == data.len();

        let contents = sig
            .get("Contents")
            .and_then(Object::as_string)
            .ok_or_else(|| Error::InvalidPdf("signature has no /Contents".to_string()))?;
        let signed = ByteRangeCalculator::extract_signed_bytes(data, &byte_range)?;

        let sub_filter = sig.get_name("SubFilter").and_then(SignatureSubFilter::from_pdf_name);
        let (signer, certificates, trusted_at) = if sub_filter == Some(SignatureSubFilter::Rfc3161) {
            check_document_timestamp(contents, &signed, result)?
        } else {
            check_cms(contents, &signed, result)?
        };

        result.signer_subject = Some(signer.subject().to_string());
        result.signer_issuer = Some(signer.issuer().to_string());
        result.signer_name = signer.common_name().map(str::to_string);
        result.issuers = certificates.iter().filter(|c| **c != signer).map(summarize).collect();

        let context = ValidationContext::from_embedded(&certificates, self.mode, self.fetcher.clone())
            .with_intermediates(&material.certificates)
            .with_crls(material.crls.clone());
        let path = context.validate(&signer, trusted_at.unwrap_or_else(Utc::now)).await;
        result.trusted = path.trusted;
        result.messages.extend(path.messages);
        Ok(())
    }
}

/// Result for a signature that could not be examined at all.
fn failed(field_name: &str, message: String) -> VerificationResult {
    let mut result = VerificationResult::new(field_name);
    result.messages.push(message);
    result.finish();
    result
}

/// Copy the descriptive entries of the signature dictionary.
fn describe(sig: &Dict, result: &mut VerificationResult) {
    result.sub_filter = sig.get_name("SubFilter").map(str::to_string);
    result.reason = sig.get("Reason").and_then(Object::as_text);
    result.location = sig.get("Location").and_then(Object::as_text);
    result.signing_time = sig.get("M").and_then(Object::as_text).map(|m| match parse_pdf_date(&m) {
        Some(at) => at.to_rfc3339(),
        None => m,
    });
    result.certification_level = sig
        .get("Reference")
        .and_then(Object::as_array)
        .into_iter()
        .flatten()
        .filter_map(Object::as_dict)
        .find(|r| r.get_name("TransformMethod") == Some("DocMDP"))
        .map(|r| {
            r.get("TransformParams")
                .and_then(Object::as_dict)
                .and_then(|p| p.get_int("P"))
                .unwrap_or(2)
        });
}

/// CAdES / PKCS#7 signature: digest, signature, signing certificate and
/// the optional signature timestamp.
fn check_cms(
    contents: &[u8],
    signed: &[u8],
    result: &mut VerificationResult,
) -> Result<(Certificate, Vec<Certificate>, Option<DateTime<Utc>>)> {
    let parsed = ParsedSignedData::parse(contents)?;
    result.algorithm = Some(parsed.algorithm_label());

    let digest_ok = parsed.message_digest_matches(signed)?;
    if !digest_ok {
        result.messages.push("message digest does not match the signed bytes".to_string());
    }
    let signature_ok = match parsed.verify_signature(signed) {
        Ok(()) => true,
        Err(e) => {
            result.messages.push(e.to_string());
            false
        },
    };
    let certificate_ok = parsed.signing_certificate_matches();
    if !certificate_ok {
        result.messages.push("signing certificate attribute does not match the signer".to_string());
    }
    result.intact = digest_ok && signature_ok && certificate_ok;

    let mut trusted_at = None;
    if let Some(token) = &parsed.timestamp_token {
        match TimestampToken::parse(token) {
            Ok(token) => {
                result.timestamp_time = Some(token.info.gen_time.to_rfc3339());
                match token.verify(&parsed.signature) {
                    Ok(()) => {
                        result.timestamp_valid = Some(true);
                        trusted_at = Some(token.info.gen_time);
                    },
                    Err(e) => {
                        result.timestamp_valid = Some(false);
                        result.messages.push(format!("timestamp: {}", e));
                    },
                }
            },
            Err(e) => {
                result.timestamp_valid = Some(false);
                result.messages.push(format!("timestamp: {}", e));
            },
        }
    }

    let signer = parsed
        .signer
        .clone()
        .ok_or_else(|| Error::Crypto("signer certificate not embedded".to_string()))?;
    Ok((signer, parsed.certificates, trusted_at))
}

/// Document timestamp: the token's imprint covers the signed bytes.
fn check_document_timestamp(
    contents: &[u8],
    signed: &[u8],
    result: &mut VerificationResult,
) -> Result<(Certificate, Vec<Certificate>, Option<DateTime<Utc>>)> {
    let token = TimestampToken::parse(contents)?;
    result.algorithm = Some(token.signed_data.algorithm_label());
    result.timestamp_time = Some(token.info.gen_time.to_rfc3339());
    match token.verify(signed) {
        Ok(()) => result.intact = true,
        Err(e) => result.messages.push(e.to_string()),
    }
    result.timestamp_valid = Some(result.intact);

    let signer = token
        .signer()
        .cloned()
        .ok_or_else(|| Error::Crypto("timestamp authority certificate not embedded".to_string()))?;
    Ok((signer, token.certificates().to_vec(), Some(token.info.gen_time)))
}

fn summarize(cert: &Certificate) -> CertificateSummary {
    CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial_number: cert.serial_hex(),
        valid_from: cert.not_before().to_rfc3339(),
        valid_to: cert.not_after().to_rfc3339(),
    }
}

/// Parse a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`). Missing trailing fields
/// default to their minimum; a missing offset means UTC.
pub fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = value.strip_prefix("D:").unwrap_or(value);
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(s) => s.parse().ok(),
            None => Some(default),
        }
    };
    let year = digits.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 2, 1)?, field(6, 2, 1)?)?;
    let local = date.and_hms_opt(field(8, 2, 0)?, field(10, 2, 0)?, field(12, 2, 0)?)?;

    let rest = &value[digits.len()..];
    let offset_seconds = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let parts: Vec<i32> = rest[1..]
                .split('\'')
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect();
            let hours = parts.first().copied().unwrap_or(0).checked_mul(3600)?;
            let seconds = hours.checked_add(parts.get(1).copied().unwrap_or(0).checked_mul(60)?)?;
            if sign == '-' {
                -seconds
            } else {
                seconds
            }
        },
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_seconds)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|at| at.with_timezone(&Utc))
}
