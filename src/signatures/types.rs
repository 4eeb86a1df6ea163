//! Digital signature types and data structures.
//!
//! This module defines the core types used for PDF digital signatures.

use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// OID of rsaEncryption.
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => ObjectIdentifier::new_unwrap("1.3.14.3.2.26"),
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        }
    }

    /// OID of RSA PKCS#1 v1.5 with this digest.
    pub fn rsa_signature_oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5"),
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11"),
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12"),
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13"),
        }
    }

    /// Look up a digest algorithm by its OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
    }

    /// Digest implied by an RSA signature algorithm OID.
    pub fn from_rsa_signature_oid(oid: &str) -> Option<Self> {
        match oid {
            "1.2.840.113549.1.1.5" => Some(DigestAlgorithm::Sha1),
            "1.2.840.113549.1.1.11" => Some(DigestAlgorithm::Sha256),
            "1.2.840.113549.1.1.12" => Some(DigestAlgorithm::Sha384),
            "1.2.840.113549.1.1.13" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Hash `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// PKCS#1 v1.5 signature scheme for this digest.
    pub fn pkcs1v15(&self) -> rsa::Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha1 => rsa::Pkcs1v15Sign::new::<Sha1>(),
            DigestAlgorithm::Sha256 => rsa::Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => rsa::Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => rsa::Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 with SHA-1 digest
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    #[default]
    CadesDetached,
    /// ETSI.RFC3161 - Timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }
}

/// DocMDP access permissions (ISO 32000-1, Table 254).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MdpPermission {
    /// No changes permitted
    NoChanges = 1,
    /// Form filling and signing permitted
    FillForms = 2,
    /// Form filling, signing and annotation permitted
    Annotate = 3,
}

impl MdpPermission {
    /// The `/P` value.
    pub fn level(&self) -> i64 {
        *self as i64
    }

    /// Parse a `/P` value; anything out of range is treated as 2.
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => MdpPermission::NoChanges,
            3 => MdpPermission::Annotate,
            _ => MdpPermission::FillForms,
        }
    }
}

/// Which upstream flow a signing request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SigningKind {
    /// Approval signature
    #[default]
    Ordinary,
    /// Certifying stamp-duty signature
    StampDuty,
}

impl SigningKind {
    /// Operation tag sent to the remote signer.
    pub fn wire_type(&self) -> &'static str {
        match self {
            SigningKind::Ordinary => "SIGNING",
            SigningKind::StampDuty => "TERRA",
        }
    }

    /// Certification level, or `None` for an approval signature.
    pub fn certification(&self) -> Option<MdpPermission> {
        match self {
            SigningKind::Ordinary => None,
            SigningKind::StampDuty => Some(MdpPermission::NoChanges),
        }
    }
}

/// Descriptive entries of a new signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureMetadata {
    /// Signature field name
    pub field_name: String,
    /// Signature format
    pub sub_filter: SignatureSubFilter,
    /// Digest used for the message digest and the signed attributes
    pub digest_algorithm: DigestAlgorithm,
    /// Certification level; `None` signs as an approval signature
    pub certify: Option<MdpPermission>,
    /// Permission recorded for approval signatures
    pub permission: MdpPermission,
    /// Whether to add a DSS revision with certificates and CRLs
    pub embed_validation_info: bool,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Name of the signer (certificate common name)
    pub name: Option<String>,
    /// Application name for `/Prop_Build`
    pub app_name: String,
    /// Application version for `/Prop_Build`
    pub app_version: String,
}

impl SignatureMetadata {
    /// PAdES metadata for the named field.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            sub_filter: SignatureSubFilter::CadesDetached,
            digest_algorithm: DigestAlgorithm::Sha256,
            certify: None,
            permission: MdpPermission::FillForms,
            embed_validation_info: true,
            reason: None,
            location: None,
            name: None,
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Certify the document at the given level.
    pub fn with_certify(mut self, level: Option<MdpPermission>) -> Self {
        self.certify = level;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location.filter(|l| !l.is_empty());
        self
    }

    /// Set the build properties.
    pub fn with_app(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.app_version = version.into();
        self
    }

    /// Whether this is a certification signature.
    pub fn is_certification(&self) -> bool {
        self.certify.is_some()
    }
}

/// Certificate details reported for a signer or an embedded issuer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, hex
    pub serial_number: String,
    /// Start of validity, RFC 3339
    pub valid_from: String,
    /// End of validity, RFC 3339
    pub valid_to: String,
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationStatus {
    /// Signature is valid
    Valid,
    /// Signature is invalid (cryptographically)
    Invalid,
    /// Signature validity is unknown (e.g., untrusted certificate)
    Unknown,
    /// Signature is valid but the document was modified
    ValidWithWarnings,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }

    /// Check if the status indicates any form of validity (including warnings).
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Valid | VerificationStatus::ValidWithWarnings)
    }
}

/// Result of verifying one embedded signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Overall verification status
    pub status: VerificationStatus,
    /// Signature field name
    pub field_name: String,
    /// Signature sub-filter
    pub sub_filter: Option<String>,
    /// Byte-range digest matches and the CMS signature verifies
    pub intact: bool,
    /// Chain builds to a trust root without revocation problems
    pub trusted: bool,
    /// Signing time claimed in the signature dictionary (`/M`)
    pub signing_time: Option<String>,
    /// Time asserted by the embedded timestamp token
    pub timestamp_time: Option<String>,
    /// Whether the timestamp token matches the signature it covers
    pub timestamp_valid: Option<bool>,
    /// Signer subject distinguished name
    pub signer_subject: Option<String>,
    /// Signer issuer distinguished name
    pub signer_issuer: Option<String>,
    /// Signer common name
    pub signer_name: Option<String>,
    /// Signature algorithm, e.g. `sha256_rsa`
    pub algorithm: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
    /// Whether the signature covers the whole file
    pub covers_whole_document: bool,
    /// DocMDP level for certification signatures
    pub certification_level: Option<i64>,
    /// Embedded certificates other than the signer's
    pub issuers: Vec<CertificateSummary>,
    /// Errors and warnings collected while verifying
    pub messages: Vec<String>,
}

impl VerificationResult {
    /// Empty, not yet verified result for a field.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Unknown,
            field_name: field_name.into(),
            sub_filter: None,
            intact: false,
            trusted: false,
            signing_time: None,
            timestamp_time: None,
            timestamp_valid: None,
            signer_subject: None,
            signer_issuer: None,
            signer_name: None,
            algorithm: None,
            reason: None,
            location: None,
            byte_range: Vec::new(),
            covers_whole_document: false,
            certification_level: None,
            issuers: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Derive `status` from integrity and trust.
    pub fn finish(&mut self) {
        self.status = match (self.intact, self.trusted) {
            (false, _) => VerificationStatus::Invalid,
            (true, false) => VerificationStatus::Unknown,
            (true, true) if self.timestamp_valid == Some(false) => VerificationStatus::ValidWithWarnings,
            (true, true) => VerificationStatus::Valid,
        };
    }

    /// Intact and trusted.
    pub fn is_valid(&self) -> bool {
        self.status.is_ok()
    }
}

/// Summary classification of a document.
pub const SUMMARY_NO_SIGNATURES: &str = "no signatures";
/// Every signature verified.
pub const SUMMARY_ALL_VALID: &str = "all valid";
/// At least one signature failed.
pub const SUMMARY_SOME_INVALID: &str = "one or more invalid";

/// Document-level verification report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Number of embedded signatures, document timestamps included
    pub total_signature: usize,
    /// Signatures that are intact and trusted
    pub valid_signature: usize,
    /// Signatures that are not
    pub invalid_signature: usize,
    /// Whether any signer matches the stamp-duty marker
    pub stamp_duty: bool,
    /// Human-readable classification
    pub summary: String,
    /// Per-signature results in document order
    pub signatures: Vec<VerificationResult>,
}

impl VerificationReport {
    /// Aggregate per-signature results.
    pub fn from_results(signatures: Vec<VerificationResult>, stamp_duty: bool) -> Self {
        let valid = signatures.iter().filter(|s| s.is_valid()).count();
        let invalid = signatures.len() - valid;
        let summary = if signatures.is_empty() {
            SUMMARY_NO_SIGNATURES
        } else if invalid == 0 {
            SUMMARY_ALL_VALID
        } else {
            SUMMARY_SOME_INVALID
        };
        Self {
            total_signature: signatures.len(),
            valid_signature: valid,
            invalid_signature: invalid,
            stamp_duty,
            summary: summary.to_string(),
            signatures,
        }
    }
}
