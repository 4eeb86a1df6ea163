//! PDF digital signatures.
//!
//! Creation and verification of PAdES signatures whose private key is held
//! by a remote signing service.
//!
//! ## Signing
//!
//! [`IncrementalSigningEngine`] appends a signature revision to a stored
//! document: a `/Sig` field with fixed-width `/ByteRange` and `/Contents`
//! placeholders, a CMS container around the remotely produced RSA
//! signature, an RFC 3161 timestamp and a DSS revision with the
//! certificates and CRLs needed for long-term validation.
//!
//! ## Verification
//!
//! [`SignatureVerificationEngine`] checks every signature of a document
//! independently and aggregates a [`VerificationReport`].
//!
//! ## Signature Types Supported
//!
//! - PAdES signatures (ETSI.CAdES.detached), created and verified
//! - PKCS#7 detached signatures (adbe.pkcs7.detached), verified
//! - Document timestamps (ETSI.RFC3161), verified
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142 - PAdES

mod appearance;
mod byterange;
mod certificate;
pub mod cms;
mod dss;
mod revocation;
mod signer;
pub mod timestamp;
mod types;
mod validation;
mod verifier;

pub use appearance::{interpolate, AppearanceStyle, CaptionParams, SignatureAppearance};
pub use byterange::{to_hex, ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
pub use certificate::{decode_base64, Certificate, CertificateChain};
pub use dss::{append_dss, read_dss, ValidationMaterial};
pub use revocation::{Crl, HttpRevocationFetcher, NoFetch, RevocationFetcher};
pub use signer::{
    format_pdf_date, IncrementalSigningEngine, LogObserver, SigningObserver, SigningOutcome, SigningServices,
    SigningStage,
};
pub use timestamp::{HttpTimeStamper, TimeStamper, TimestampToken, TstInfo};
pub use types::{
    CertificateSummary, DigestAlgorithm, MdpPermission, SignatureMetadata, SignatureSubFilter, SigningKind,
    VerificationReport, VerificationResult, VerificationStatus, SUMMARY_ALL_VALID, SUMMARY_NO_SIGNATURES,
    SUMMARY_SOME_INVALID,
};
pub use validation::{load_trust_roots, PathValidation, ValidationContext};
pub use verifier::{parse_pdf_date, SignatureVerificationEngine};
