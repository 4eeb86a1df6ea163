//! CMS SignedData for PAdES signatures.
//!
//! PAdES (ETSI EN 319 142-1) signatures are detached CMS containers whose
//! signed attributes hold the content type, the message digest of the
//! signed byte ranges and an ESS signing-certificate-v2 reference to the
//! signer's certificate. The signing time is carried by the signature
//! dictionary (`/M`) and the timestamp token travels as an unsigned
//! attribute.
//!
//! The same builder assembles RFC 3161 timestamp tokens, which are
//! SignedData with an encapsulated `TSTInfo`.

use super::certificate::Certificate;
use super::types::{DigestAlgorithm, RSA_ENCRYPTION};
use crate::error::{Error, Result};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
    UnsignedAttributes,
};
use der::asn1::{Any, Null, ObjectIdentifier, OctetString, SetOfVec};
use der::{Decode, DecodeOwned, Encode, Sequence, SliceReader};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;

/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-contentType
pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-aa-signingCertificateV2
pub const ID_SIGNING_CERTIFICATE_V2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
/// id-aa-timeStampToken
pub const ID_TIMESTAMP_TOKEN: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
/// id-ct-TSTInfo
pub const ID_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

/// ESSCertIDv2 (RFC 5035). `hash_algorithm` is omitted for SHA-256.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertIdV2 {
    /// Hash algorithm; absent means SHA-256
    #[asn1(optional = "true")]
    pub hash_algorithm: Option<AlgorithmIdentifierOwned>,
    /// Hash of the certificate DER
    pub cert_hash: OctetString,
    /// IssuerSerial, kept undecoded
    #[asn1(optional = "true")]
    pub issuer_serial: Option<Any>,
}

/// SigningCertificateV2 (RFC 5035).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificateV2 {
    /// Referenced certificates, signer first
    pub certs: Vec<EssCertIdV2>,
    /// Policy information, kept undecoded
    #[asn1(optional = "true")]
    pub policies: Option<Any>,
}

/// Algorithm identifier with absent parameters, as used for digests.
pub fn algorithm(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned { oid, parameters: None }
}

fn rsa_algorithm() -> Result<AlgorithmIdentifierOwned> {
    Ok(AlgorithmIdentifierOwned {
        oid: RSA_ENCRYPTION,
        parameters: Some(Any::encode_from(&Null)?),
    })
}

/// Attribute with a single value.
pub fn attribute(oid: ObjectIdentifier, value: &impl Encode) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![Any::from_der(&value.to_der()?)?])?,
    })
}

/// Re-decode an `Any` as a concrete type.
pub(crate) fn decode_any<T: DecodeOwned>(any: &Any) -> Result<T> {
    Ok(T::from_der(&any.to_der()?)?)
}

/// Decode the first DER value in `data`, ignoring trailing bytes.
///
/// Signature `/Contents` are zero-padded to the reserved size.
pub fn decode_prefix<T: DecodeOwned>(data: &[u8]) -> Result<T> {
    let mut reader = SliceReader::new(data)?;
    Ok(T::decode(&mut reader)?)
}

/// PAdES signed attributes for `message_digest` signed by `signer`.
pub fn signed_attributes(
    content_type: ObjectIdentifier,
    message_digest: &[u8],
    signer: &Certificate,
) -> Result<SignedAttributes> {
    let cert_hash_algorithm = DigestAlgorithm::Sha256;
    let ess = SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm: None,
            cert_hash: OctetString::new(signer.fingerprint(cert_hash_algorithm))?,
            issuer_serial: None,
        }],
        policies: None,
    };
    Ok(SetOfVec::try_from(vec![
        attribute(ID_CONTENT_TYPE, &content_type)?,
        attribute(ID_MESSAGE_DIGEST, &OctetString::new(message_digest.to_vec())?)?,
        attribute(ID_SIGNING_CERTIFICATE_V2, &ess)?,
    ])?)
}

/// DER encoding of the signed attributes as the SET OF that gets signed.
pub fn encode_signed_attributes(attrs: &SignedAttributes) -> Result<Vec<u8>> {
    Ok(attrs.to_der()?)
}

/// Assembles SignedData around an externally produced RSA signature.
#[derive(Debug, Clone)]
pub struct SignedDataBuilder {
    digest_algorithm: DigestAlgorithm,
    signer: Certificate,
    certificates: Vec<Certificate>,
    content_type: ObjectIdentifier,
    content: Option<Vec<u8>>,
}

impl SignedDataBuilder {
    /// Detached `id-data` signature by `signer`.
    pub fn new(digest_algorithm: DigestAlgorithm, signer: Certificate) -> Self {
        Self {
            digest_algorithm,
            certificates: vec![signer.clone()],
            signer,
            content_type: ID_DATA,
            content: None,
        }
    }

    /// Certificates embedded in the container; the signer is always included.
    pub fn with_certificates(mut self, certs: &[Certificate]) -> Self {
        for cert in certs {
            if !self.certificates.contains(cert) {
                self.certificates.push(cert.clone());
            }
        }
        self
    }

    /// Encapsulate `content` of the given type instead of signing detached data.
    pub fn with_content(mut self, content_type: ObjectIdentifier, content: Vec<u8>) -> Self {
        self.content_type = content_type;
        self.content = Some(content);
        self
    }

    /// Content type recorded in the signed attributes.
    pub fn content_type(&self) -> ObjectIdentifier {
        self.content_type
    }

    /// Signed attributes for the encapsulated or detached content digest.
    pub fn signed_attributes(&self, message_digest: &[u8]) -> Result<SignedAttributes> {
        signed_attributes(self.content_type, message_digest, &self.signer)
    }

    /// Encode the ContentInfo.
    ///
    /// `signature` is the raw PKCS#1 v1.5 signature over the DER of
    /// `signed_attrs`; `timestamp_token` is added as an unsigned attribute.
    pub fn build(
        &self,
        signed_attrs: SignedAttributes,
        signature: &[u8],
        timestamp_token: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let signer = x509_cert::Certificate::from_der(self.signer.der())?;
        let unsigned_attrs: Option<UnsignedAttributes> = match timestamp_token {
            Some(token) => {
                let token = decode_prefix::<ContentInfo>(token)?;
                Some(SetOfVec::try_from(vec![attribute(ID_TIMESTAMP_TOKEN, &token)?])?)
            },
            None => None,
        };

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: signer.tbs_certificate.issuer.clone(),
                serial_number: signer.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: algorithm(self.digest_algorithm.oid()),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: rsa_algorithm()?,
            signature: OctetString::new(signature.to_vec())?,
            unsigned_attrs,
        };

        let certificates = self
            .certificates
            .iter()
            .map(|c| Ok(CertificateChoices::Certificate(x509_cert::Certificate::from_der(c.der())?)))
            .collect::<Result<Vec<_>>>()?;

        let econtent = match &self.content {
            Some(content) => Some(Any::encode_from(&OctetString::new(content.clone())?)?),
            None => None,
        };
        let version = if self.content_type == ID_DATA { CmsVersion::V1 } else { CmsVersion::V3 };

        let signed_data = SignedData {
            version,
            digest_algorithms: SetOfVec::try_from(vec![algorithm(self.digest_algorithm.oid())])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };

        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        Ok(content_info.to_der()?)
    }
}

/// The parts of a SignedData needed for verification.
#[derive(Debug, Clone)]
pub struct ParsedSignedData {
    /// Embedded certificates in container order
    pub certificates: Vec<Certificate>,
    /// The certificate matching the signer identifier
    pub signer: Option<Certificate>,
    /// Digest algorithm of the (single) signer
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Digest algorithm OID as found, for reporting unsupported ones
    pub digest_oid: ObjectIdentifier,
    /// Signature algorithm OID
    pub signature_oid: ObjectIdentifier,
    /// DER of the signed attributes SET, if present
    pub signed_attrs: Option<Vec<u8>>,
    /// Value of the message-digest attribute
    pub message_digest: Option<Vec<u8>>,
    /// Hash of the signer certificate from signing-certificate-v2
    pub signing_certificate_hash: Option<Vec<u8>>,
    /// Raw signature value
    pub signature: Vec<u8>,
    /// Encapsulated content type
    pub content_type: ObjectIdentifier,
    /// Encapsulated content (OCTET STRING value)
    pub content: Option<Vec<u8>>,
    /// Timestamp token (ContentInfo DER) from the unsigned attributes
    pub timestamp_token: Option<Vec<u8>>,
}

impl ParsedSignedData {
    /// Parse a (possibly zero-padded) ContentInfo holding SignedData.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let content_info: ContentInfo = decode_prefix(data)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::Asn1(format!("unexpected content type {}", content_info.content_type)));
        }
        let signed_data: SignedData = decode_any(&content_info.content)?;

        let mut certificates = Vec::new();
        if let Some(set) = &signed_data.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(Certificate::from_der(&cert.to_der()?)?);
                }
            }
        }

        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::Asn1("SignedData has no SignerInfo".to_string()))?;

        let signer = match &signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => {
                let issuer = id.issuer.to_der()?;
                let serial = id.serial_number.as_bytes();
                certificates
                    .iter()
                    .find(|c| c.issuer_raw() == issuer.as_slice() && strip_zeros(c.serial()) == strip_zeros(serial))
                    .cloned()
            },
            SignerIdentifier::SubjectKeyIdentifier(_) => certificates.first().cloned(),
        };

        let mut message_digest = None;
        let mut signing_certificate_hash = None;
        let signed_attrs = match &signer_info.signed_attrs {
            Some(attrs) => {
                for attr in attrs.iter() {
                    let Some(value) = attr.values.iter().next() else {
                        continue;
                    };
                    if attr.oid == ID_MESSAGE_DIGEST {
                        message_digest = Some(decode_any::<OctetString>(value)?.as_bytes().to_vec());
                    } else if attr.oid == ID_SIGNING_CERTIFICATE_V2 {
                        let ess: SigningCertificateV2 = decode_any(value)?;
                        signing_certificate_hash = ess.certs.first().map(|id| id.cert_hash.as_bytes().to_vec());
                    }
                }
                Some(attrs.to_der()?)
            },
            None => None,
        };

        let mut timestamp_token = None;
        if let Some(attrs) = &signer_info.unsigned_attrs {
            for attr in attrs.iter().filter(|a| a.oid == ID_TIMESTAMP_TOKEN) {
                if let Some(value) = attr.values.iter().next() {
                    timestamp_token = Some(value.to_der()?);
                }
            }
        }

        let content = match &signed_data.encap_content_info.econtent {
            Some(any) => Some(decode_any::<OctetString>(any)?.as_bytes().to_vec()),
            None => None,
        };

        Ok(Self {
            certificates,
            signer,
            digest_algorithm: DigestAlgorithm::from_oid(&signer_info.digest_alg.oid),
            digest_oid: signer_info.digest_alg.oid,
            signature_oid: signer_info.signature_algorithm.oid,
            signed_attrs,
            message_digest,
            signing_certificate_hash,
            signature: signer_info.signature.as_bytes().to_vec(),
            content_type: signed_data.encap_content_info.econtent_type,
            content,
            timestamp_token,
        })
    }

    /// Digest algorithm, or an error naming the unsupported OID.
    pub fn require_digest_algorithm(&self) -> Result<DigestAlgorithm> {
        self.digest_algorithm
            .ok_or_else(|| Error::Unsupported(format!("digest algorithm {}", self.digest_oid)))
    }

    /// Whether the message-digest attribute matches `data`.
    ///
    /// Without signed attributes the signature covers the digest directly,
    /// which [`verify_signature`](Self::verify_signature) checks.
    pub fn message_digest_matches(&self, data: &[u8]) -> Result<bool> {
        let algorithm = self.require_digest_algorithm()?;
        Ok(match &self.message_digest {
            Some(expected) => *expected == algorithm.digest(data),
            None => self.signed_attrs.is_none(),
        })
    }

    /// Check the RSA signature of the signer over the signed attributes
    /// (or, without them, over `content`).
    pub fn verify_signature(&self, content: &[u8]) -> Result<()> {
        let algorithm = self.require_digest_algorithm()?;
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::Crypto("signer certificate not embedded".to_string()))?;
        let key = signer.rsa_public_key()?;
        let signed = match &self.signed_attrs {
            Some(attrs) => attrs.as_slice(),
            None => content,
        };
        key.verify(algorithm.pkcs1v15(), &algorithm.digest(signed), &self.signature)
            .map_err(|e| Error::Crypto(format!("signature does not verify: {}", e)))
    }

    /// Whether signing-certificate-v2, when present, references the signer.
    pub fn signing_certificate_matches(&self) -> bool {
        match (&self.signing_certificate_hash, &self.signer) {
            (Some(hash), Some(signer)) => *hash == signer.fingerprint(DigestAlgorithm::Sha256),
            _ => true,
        }
    }

    /// Algorithm label such as `sha256_rsa`.
    pub fn algorithm_label(&self) -> String {
        let digest = match self.digest_algorithm {
            Some(DigestAlgorithm::Sha1) => "sha1",
            Some(DigestAlgorithm::Sha256) => "sha256",
            Some(DigestAlgorithm::Sha384) => "sha384",
            Some(DigestAlgorithm::Sha512) => "sha512",
            None => "unknown",
        };
        format!("{}_rsa", digest)
    }
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_single_value() {
        let attr = attribute(ID_CONTENT_TYPE, &ID_DATA).unwrap();
        assert_eq!(attr.values.len(), 1);
        let oid: ObjectIdentifier = decode_any(attr.values.iter().next().unwrap()).unwrap();
        assert_eq!(oid, ID_DATA);
    }

    #[test]
    fn test_decode_prefix_ignores_padding() {
        let mut der = OctetString::new(vec![1, 2, 3]).unwrap().to_der().unwrap();
        der.extend_from_slice(&[0u8; 16]);
        let value: OctetString = decode_prefix(&der).unwrap();
        assert_eq!(value.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_ess_cert_id_omits_default_algorithm() {
        let ess = SigningCertificateV2 {
            certs: vec![EssCertIdV2 {
                hash_algorithm: None,
                cert_hash: OctetString::new(vec![0xAA; 32]).unwrap(),
                issuer_serial: None,
            }],
            policies: None,
        };
        let der = ess.to_der().unwrap();
        // SEQUENCE { SEQUENCE { SEQUENCE { OCTET STRING } } }
        assert_eq!(&der[..6], &[0x30, 0x26, 0x30, 0x24, 0x30, 0x22]);
        assert_eq!(der[6], 0x04);
        assert_eq!(SigningCertificateV2::from_der(&der).unwrap(), ess);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ParsedSignedData::parse(&[0u8; 64]).is_err());
    }
}
