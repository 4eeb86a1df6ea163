//! JSON messages exchanged with the upstream PKI gateway.
//!
//! Every response is wrapped in the same envelope: a `resultCode` that is
//! `"0"` on success (some deployments send it as a number), a
//! human-readable `resultDesc` and an operation specific `data` object.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Result code of a successful upstream call.
pub const RESULT_OK: &str = "0";

/// Header carrying the gateway API key.
pub const API_KEY_HEADER: &str = "x-Gateway-APIKey";

/// Request for a subscriber's certificate chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest<'a> {
    /// Profile identity (e-mail address)
    pub email: &'a str,
    /// Calling system
    pub system_id: &'a str,
}

/// `data` of a certificate chain response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainData {
    /// Base64 DER certificates, leaf first
    #[serde(default)]
    pub signer_cert_chain: Vec<String>,
}

/// Raw signing request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignHashRequest<'a> {
    /// Base64 digest to sign
    pub data: String,
    /// Profile identity (e-mail address)
    pub email: &'a str,
    /// Calling system
    pub system_id: &'a str,
    /// `SIGNING` or `TERRA`
    #[serde(rename = "type")]
    pub operation: &'static str,
}

/// Envelope of the raw signing request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignHashEnvelope<'a> {
    /// The request
    pub request_signing: SignHashRequest<'a>,
}

/// `data` of a raw signing response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignHashData {
    /// Base64 raw signature
    #[serde(default)]
    pub signed_hash: String,
    /// Upstream order number, logged for tracing
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_id: String,
}

/// Common response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse<T> {
    /// `"0"` on success
    #[serde(deserialize_with = "lenient_string")]
    pub result_code: String,
    /// Description of the result
    #[serde(default)]
    pub result_desc: String,
    /// Operation specific payload
    pub data: Option<T>,
}

impl<T> UpstreamResponse<T> {
    /// The payload of a successful response; a non-zero result code becomes
    /// [`Error::RemoteService`].
    pub fn into_data(self) -> Result<Option<T>> {
        if self.result_code != RESULT_OK {
            return Err(Error::RemoteService {
                code: self.result_code,
                message: self.result_desc,
            });
        }
        Ok(self.data)
    }
}

/// Accept a string, a number or null as a string.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    })
}

/// Decode a JSON body received with HTTP `status`.
pub fn decode_body<T: serde::de::DeserializeOwned>(status: u16, body: &[u8]) -> Result<UpstreamResponse<T>> {
    serde_json::from_slice(body).map_err(|e| Error::UnexpectedTransport {
        status,
        reason: format!("malformed upstream response: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_envelope_shape() {
        let body = SignHashEnvelope {
            request_signing: SignHashRequest {
                data: "AAEC".to_string(),
                email: "jane@example.com",
                system_id: "DMS",
                operation: "SIGNING",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requestSigning"]["data"], "AAEC");
        assert_eq!(json["requestSigning"]["systemId"], "DMS");
        assert_eq!(json["requestSigning"]["type"], "SIGNING");
    }

    #[test]
    fn test_numeric_result_code() {
        let response: UpstreamResponse<ChainData> =
            decode_body(200, br#"{"resultCode": 0, "resultDesc": "ok", "data": {"signerCertChain": ["AA"]}}"#)
                .unwrap();
        assert_eq!(response.result_code, "0");
        let data = response.into_data().unwrap().unwrap();
        assert_eq!(data.signer_cert_chain, vec!["AA"]);
    }

    #[test]
    fn test_business_error() {
        let response: UpstreamResponse<ChainData> =
            decode_body(200, br#"{"resultCode": "14", "resultDesc": "user not found"}"#).unwrap();
        match response.into_data() {
            Err(Error::RemoteService { code, message }) => {
                assert_eq!(code, "14");
                assert_eq!(message, "user not found");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_order_id_as_number() {
        let response: UpstreamResponse<SignHashData> = decode_body(
            200,
            br#"{"resultCode": "0", "data": {"signedHash": "AAAA", "orderId": 991}}"#,
        )
        .unwrap();
        let data = response.into_data().unwrap().unwrap();
        assert_eq!(data.order_id, "991");
    }

    #[test]
    fn test_malformed_body() {
        let err = decode_body::<ChainData>(200, b"<html>").unwrap_err();
        assert_eq!(err.code(), "200");
    }
}
