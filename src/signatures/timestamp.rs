//! RFC 3161 timestamping.
//!
//! The signature value of every new signature is timestamped by a time
//! stamp authority (TSA); the returned token is embedded as an unsigned
//! attribute of the signer. [`HttpTimeStamper`] talks to a TSA over HTTP
//! (`application/timestamp-query`); anything else implementing
//! [`TimeStamper`] can stand in for it.

use super::certificate::Certificate;
use super::cms::{algorithm, decode_any, ParsedSignedData, ID_TST_INFO};
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use cms::content_info::ContentInfo;
use der::asn1::{Any, BitString, GeneralizedTime, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;

/// PKIStatus values that carry a token.
const GRANTED: u8 = 0;
const GRANTED_WITH_MODS: u8 = 1;

/// MessageImprint (RFC 3161 §2.4.1).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Hash algorithm of `hashed_message`
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the timestamped data
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Imprint of `data` hashed with `algorithm`.
    pub fn of(algorithm_id: DigestAlgorithm, data: &[u8]) -> Result<Self> {
        Ok(Self {
            hash_algorithm: algorithm(algorithm_id.oid()),
            hashed_message: OctetString::new(algorithm_id.digest(data))?,
        })
    }

    /// Whether this imprint is the hash of `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        DigestAlgorithm::from_oid(&self.hash_algorithm.oid)
            .map(|alg| alg.digest(data) == self.hashed_message.as_bytes())
            .unwrap_or(false)
    }
}

/// TimeStampReq (RFC 3161 §2.4.1).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Always 1
    pub version: u8,
    /// What is being timestamped
    pub message_imprint: MessageImprint,
    /// Requested policy
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    /// Replay protection
    #[asn1(optional = "true")]
    pub nonce: Option<u64>,
    /// Ask the TSA to include its certificate
    pub cert_req: bool,
}

/// PKIStatusInfo (RFC 3161 §2.4.2).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    /// PKIStatus
    pub status: u8,
    /// Free text from the TSA
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    /// PKIFailureInfo bits
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

/// TimeStampResp (RFC 3161 §2.4.2).
#[derive(Clone, Debug, Sequence)]
pub struct TimeStampResp {
    /// Outcome
    pub status: PkiStatusInfo,
    /// Token when granted
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<ContentInfo>,
}

/// The encodable prefix of TSTInfo (RFC 3161 §2.4.2).
///
/// Accuracy, ordering, TSA name and extensions are never produced here.
/// Decoding goes through [`TstInfo::from_der`], which tolerates them.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TstInfoFields {
    version: u8,
    policy: ObjectIdentifier,
    message_imprint: MessageImprint,
    serial_number: u64,
    gen_time: GeneralizedTime,
    #[asn1(optional = "true")]
    nonce: Option<u64>,
}

/// Decoded TSTInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    /// TSA policy
    pub policy: ObjectIdentifier,
    /// Imprint of the timestamped data
    pub message_imprint: MessageImprint,
    /// Serial number assigned by the TSA
    pub serial_number: u64,
    /// Time asserted by the TSA
    pub gen_time: DateTime<Utc>,
    /// Nonce echoed from the request
    pub nonce: Option<u64>,
}

impl TstInfo {
    /// Encode as DER.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let secs = self.gen_time.timestamp().max(0) as u64;
        let fields = TstInfoFields {
            version: 1,
            policy: self.policy,
            message_imprint: self.message_imprint.clone(),
            serial_number: self.serial_number,
            gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(secs))?,
            nonce: self.nonce,
        };
        Ok(fields.to_der()?)
    }

    /// Decode, skipping the optional fields that are not reported.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let fields: Vec<Any> = Vec::from_der(der)?;
        if fields.len() < 5 {
            return Err(Error::Asn1("TSTInfo is truncated".to_string()));
        }
        let version: u8 = decode_any(&fields[0])?;
        if version != 1 {
            return Err(Error::Asn1(format!("unsupported TSTInfo version {}", version)));
        }
        let gen_time = parse_gen_time(&fields[4])?;
        let nonce = match fields[5..].iter().find(|f| f.tag() == Tag::Integer) {
            Some(field) => Some(decode_any(field)?),
            None => None,
        };
        Ok(Self {
            policy: decode_any(&fields[1])?,
            message_imprint: decode_any(&fields[2])?,
            // serial numbers wider than 64 bits are reported as 0
            serial_number: decode_any(&fields[3]).unwrap_or(0),
            gen_time,
            nonce,
        })
    }
}

/// Decode `genTime`, which may carry fractional seconds (`YYYYMMDDHHMMSS[.f]Z`).
fn parse_gen_time(field: &Any) -> Result<DateTime<Utc>> {
    if field.tag() != Tag::GeneralizedTime {
        return Err(Error::Asn1(format!("TSTInfo genTime has tag {}", field.tag())));
    }
    let malformed = || Error::Asn1("malformed TSTInfo genTime".to_string());
    let text = std::str::from_utf8(field.value()).map_err(|_| malformed())?;
    let text = text.strip_suffix('Z').ok_or_else(malformed)?;
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if !fraction.bytes().all(|b| b.is_ascii_digit()) || (text.contains('.') && fraction.is_empty()) {
        return Err(malformed());
    }
    let nanos = format!("{:0<9}", &fraction[..fraction.len().min(9)])
        .parse::<u32>()
        .map_err(|_| malformed())?;
    let at = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").map_err(|_| malformed())?;
    let at = at.with_nanosecond(nanos).ok_or_else(malformed)?;
    Ok(Utc.from_utc_datetime(&at))
}

/// A parsed timestamp token.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// Token DER (ContentInfo)
    pub der: Vec<u8>,
    /// The token's SignedData
    pub signed_data: ParsedSignedData,
    /// The encapsulated TSTInfo
    pub info: TstInfo,
}

impl TimestampToken {
    /// Parse a token (ContentInfo holding SignedData over TSTInfo).
    pub fn parse(der: &[u8]) -> Result<Self> {
        let signed_data = ParsedSignedData::parse(der)?;
        if signed_data.content_type != ID_TST_INFO {
            return Err(Error::Asn1(format!(
                "timestamp token encapsulates {}, expected TSTInfo",
                signed_data.content_type
            )));
        }
        let content = signed_data
            .content
            .as_deref()
            .ok_or_else(|| Error::Asn1("timestamp token has no TSTInfo".to_string()))?;
        let info = TstInfo::from_der(content)?;
        Ok(Self {
            der: der.to_vec(),
            signed_data,
            info,
        })
    }

    /// Check that the token covers `data` and that the TSA signature verifies.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        if !self.info.message_imprint.matches(data) {
            return Err(Error::Crypto("timestamp imprint does not match the signature".to_string()));
        }
        let content = self.signed_data.content.as_deref().unwrap_or_default();
        if !self.signed_data.message_digest_matches(content)? {
            return Err(Error::Crypto("timestamp token digest does not match TSTInfo".to_string()));
        }
        self.signed_data.verify_signature(content)
    }

    /// Certificate of the TSA, when embedded.
    pub fn signer(&self) -> Option<&Certificate> {
        self.signed_data.signer.as_ref()
    }

    /// Every certificate embedded in the token.
    pub fn certificates(&self) -> &[Certificate] {
        &self.signed_data.certificates
    }
}

/// Obtains RFC 3161 timestamp tokens.
#[async_trait]
pub trait TimeStamper: Send + Sync {
    /// Timestamp `data`; returns the token DER.
    async fn timestamp(&self, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// Build a DER `TimeStampReq` for `data`.
pub fn build_request(data: &[u8], algorithm: DigestAlgorithm, nonce: u64) -> Result<Vec<u8>> {
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint::of(algorithm, data)?,
        req_policy: None,
        nonce: Some(nonce),
        cert_req: true,
    };
    Ok(request.to_der()?)
}

/// Extract and check the token from a DER `TimeStampResp`.
pub fn parse_response(body: &[u8], data: &[u8], nonce: Option<u64>) -> Result<Vec<u8>> {
    let response = TimeStampResp::from_der(body)?;
    let status = response.status.status;
    if status != GRANTED && status != GRANTED_WITH_MODS {
        let text = response.status.status_string.unwrap_or_default().join("; ");
        return Err(Error::SigningProtocol(format!("timestamp request rejected (status {}): {}", status, text)));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::SigningProtocol("timestamp response carries no token".to_string()))?
        .to_der()?;

    let parsed = TimestampToken::parse(&token)?;
    if !parsed.info.message_imprint.matches(data) {
        return Err(Error::SigningProtocol("timestamp token imprint does not match the request".to_string()));
    }
    if nonce.is_some() && parsed.info.nonce != nonce {
        return Err(Error::SigningProtocol("timestamp nonce mismatch".to_string()));
    }
    Ok(token)
}

/// TSA client over HTTP.
pub struct HttpTimeStamper {
    url: String,
    http: reqwest::Client,
}

impl HttpTimeStamper {
    /// Client for the TSA at `url`.
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl TimeStamper for HttpTimeStamper {
    async fn timestamp(&self, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let nonce = rand::random::<u64>() >> 1;
        let request = build_request(data, algorithm, nonce)?;
        log::debug!("timestamp request to {}", self.url);

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/timestamp-query")
            .header("Accept", "application/timestamp-reply")
            .body(request)
            .send()
            .await?;
        if !response.status().is_success() {
            log::error!("timestamp authority {} answered {}", self.url, response.status());
            return Err(Error::from_status(response.status()));
        }
        let body = response.bytes().await?;
        parse_response(&body, data, Some(nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding() {
        let der = build_request(b"signature", DigestAlgorithm::Sha256, 42).unwrap();
        let request = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(request.version, 1);
        assert_eq!(request.nonce, Some(42));
        assert!(request.cert_req);
        assert!(request.message_imprint.matches(b"signature"));
        assert!(!request.message_imprint.matches(b"other"));
    }

    #[test]
    fn test_tst_info_round_trip() {
        let info = TstInfo {
            policy: ObjectIdentifier::new_unwrap("1.2.3.4"),
            message_imprint: MessageImprint::of(DigestAlgorithm::Sha256, b"x").unwrap(),
            serial_number: 7,
            gen_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            nonce: Some(9),
        };
        let decoded = TstInfo::from_der(&info.to_der().unwrap()).unwrap();
        assert_eq!(decoded, info);
    }

    fn tst_info_with_time(gen_time: &[u8]) -> Vec<u8> {
        let imprint = MessageImprint::of(DigestAlgorithm::Sha256, b"x").unwrap();
        let fields = vec![
            Any::from_der(&1u8.to_der().unwrap()).unwrap(),
            Any::from_der(&ObjectIdentifier::new_unwrap("1.2.3.4").to_der().unwrap()).unwrap(),
            Any::from_der(&imprint.to_der().unwrap()).unwrap(),
            Any::from_der(&7u64.to_der().unwrap()).unwrap(),
            Any::new(Tag::GeneralizedTime, gen_time.to_vec()).unwrap(),
        ];
        fields.to_der().unwrap()
    }

    #[test]
    fn test_gen_time_with_fractional_seconds() {
        let info = TstInfo::from_der(&tst_info_with_time(b"20240101120000.123Z")).unwrap();
        assert_eq!(info.gen_time.to_rfc3339(), "2024-01-01T12:00:00.123+00:00");
        assert_eq!(info.serial_number, 7);

        let info = TstInfo::from_der(&tst_info_with_time(b"20240101120000Z")).unwrap();
        assert_eq!(info.gen_time.to_rfc3339(), "2024-01-01T12:00:00+00:00");

        assert!(TstInfo::from_der(&tst_info_with_time(b"20240101120000.Z")).is_err());
        assert!(TstInfo::from_der(&tst_info_with_time(b"20240101120000")).is_err());
    }

    #[test]
    fn test_rejected_response() {
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 2,
                status_string: Some(vec!["bad alg".to_string()]),
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let err = parse_response(&response.to_der().unwrap(), b"x", None).unwrap_err();
        assert!(err.to_string().contains("bad alg"));
    }
}
