//! Error types for signing and verification.
//!
//! Every failure in the crate is an [`Error`]. Errors raised by upstream
//! services (chain gateway, remote signer, timestamp authority) are kept
//! distinct from local failures so callers can surface them unchanged.
//! [`Error::code`] maps every variant to the stable code reported to
//! clients.

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while signing or verifying a document.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Upstream service answered with a non-zero business result code
    #[error("{message}")]
    RemoteService {
        /// Result code reported by the upstream service
        code: String,
        /// Human-readable description from the upstream service
        message: String,
    },

    /// Upstream returned HTTP 503
    #[error("service unavailable")]
    ServiceUnavailable,

    /// Upstream returned HTTP 504
    #[error("gateway timed out")]
    GatewayTimeout,

    /// Any other transport-level failure; `status` is 0 when no response arrived
    #[error("{reason}")]
    UnexpectedTransport {
        /// HTTP status code
        status: u16,
        /// Reason phrase or transport error description
        reason: String,
    },

    /// A certificate returned by the chain gateway could not be decoded
    #[error("exception while processing certificate chain: {0}")]
    CertificateDecode(String),

    /// Source document does not exist in the unsigned store
    #[error("source pdf file not found: {0}")]
    DocumentNotFound(String),

    /// Document is encrypted and the supplied password was rejected
    #[error("cannot decrypt file with supplied password")]
    DecryptionFailed,

    /// Specimen image referenced by the request does not exist
    #[error("specimen image file not found: {0}")]
    SpecimenNotFound(String),

    /// Signed output requested from the store does not exist
    #[error("signed pdf file not found: {0}")]
    SignedDocumentNotFound(String),

    /// Remote signer returned something that cannot be used as a signature
    #[error("signing protocol error: {0}")]
    SigningProtocol(String),

    /// Request failed validation before any document mutation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal failure with no more specific kind
    #[error("internal server error: {0}")]
    Internal(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header")]
    InvalidHeader,

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Invalid PDF structure
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Encryption handler failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Image error
    #[error("Image error: {0}")]
    Image(String),

    /// ASN.1 / CMS structure error
    #[error("ASN.1 error: {0}")]
    Asn1(String),

    /// Cryptographic primitive failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),
}

impl Error {
    /// Stable code reported to clients.
    ///
    /// Upstream business errors keep the upstream code; transport errors
    /// carry the HTTP status; local failures use fixed codes.
    pub fn code(&self) -> String {
        match self {
            Error::RemoteService { code, .. } => code.clone(),
            Error::ServiceUnavailable => "503".to_string(),
            Error::GatewayTimeout => "504".to_string(),
            Error::UnexpectedTransport { status, .. } => status.to_string(),
            Error::InvalidRequest(_) => "80".to_string(),
            Error::Io(_) => "81".to_string(),
            Error::DocumentNotFound(_) => "82".to_string(),
            Error::DecryptionFailed => "83".to_string(),
            Error::SpecimenNotFound(_) => "84".to_string(),
            Error::SignedDocumentNotFound(_) => "85".to_string(),
            Error::CertificateDecode(_) => "86".to_string(),
            Error::SigningProtocol(_) => "87".to_string(),
            _ => "99".to_string(),
        }
    }

    /// Whether the error was reported by (or while talking to) an upstream service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::RemoteService { .. }
                | Error::ServiceUnavailable
                | Error::GatewayTimeout
                | Error::UnexpectedTransport { .. }
                | Error::CertificateDecode(_)
                | Error::SigningProtocol(_)
        )
    }

    /// Map an HTTP status that is not a success into the matching error kind.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            503 => Error::ServiceUnavailable,
            504 => Error::GatewayTimeout,
            code => Error::UnexpectedTransport {
                status: code,
                reason: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::from_status(status),
            None => Error::UnexpectedTransport {
                status: 0,
                reason: err.to_string(),
            },
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Asn1(err.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::Crypto(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}
