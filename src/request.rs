//! Signing requests.
//!
//! A [`SigningRequest`] is what the embedding service receives as JSON.
//! [`SigningRequest::validate`] checks it completely and produces a
//! [`ValidatedRequest`] before any document is touched or any upstream
//! service is called.

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::remote::SignerIdentity;
use crate::signatures::{decode_base64, AppearanceStyle, SigningKind};
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};

/// Placement and stamp content of a visible signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// One-based page number
    #[serde(default = "first_page")]
    pub page: u32,
    /// Lower-left x
    #[serde(default)]
    pub llx: f32,
    /// Lower-left y
    #[serde(default)]
    pub lly: f32,
    /// Upper-right x
    #[serde(default)]
    pub urx: f32,
    /// Upper-right y
    #[serde(default)]
    pub ury: f32,
    /// `specimenImage` holds base64 image data rather than a specimen file name
    #[serde(default)]
    pub is_base64: bool,
    /// Background image, base64 or file name
    #[serde(default)]
    pub specimen_image: Option<String>,
    /// QR payload
    #[serde(default)]
    pub specimen_qr_data: Option<String>,
    /// Caption
    #[serde(default)]
    pub specimen_text_data: Option<String>,
}

fn first_page() -> u32 {
    1
}

/// A request to sign a stored document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    /// Source document id, with or without `.pdf`
    pub src: String,
    /// Profile identity of the signer
    pub profile_name: String,
    /// Calling system
    pub system_id: String,
    /// Password of an encrypted source
    #[serde(default)]
    pub doc_pass: Option<String>,
    /// Reason for signing
    #[serde(default)]
    pub reason: Option<String>,
    /// Signing location
    #[serde(default)]
    pub location: Option<String>,
    /// Visible stamp; absent for an invisible signature
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    /// Ordinary or stamp-duty signing
    #[serde(default)]
    pub kind: SigningKind,
}

/// Where the stamp background comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecimenSource {
    /// No background
    None,
    /// Decoded image bytes from the request
    Inline(Vec<u8>),
    /// Specimen file name in the specimen store
    Named(String),
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// Store id of the source document
    pub document_id: String,
    /// Signer identity
    pub identity: SignerIdentity,
    /// Document password (empty when none was given)
    pub password: Vec<u8>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Zero-based page index
    pub page_index: usize,
    /// Widget rectangle in page space
    pub rect: Rect,
    /// Layout family
    pub style: AppearanceStyle,
    /// Background image
    pub specimen: SpecimenSource,
    /// QR payload
    pub qr_data: Option<String>,
    /// Caption template
    pub caption: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

impl SigningRequest {
    /// Check every field and resolve the appearance style.
    ///
    /// The page number is only checked for being one-based here; whether it
    /// exists is known once the document is open.
    pub fn validate(&self) -> Result<ValidatedRequest> {
        let document_id = DocumentStore::document_id(&self.src)?;
        if self.profile_name.trim().is_empty() {
            return Err(Error::InvalidRequest("profileName is required".to_string()));
        }
        if self.system_id.trim().is_empty() {
            return Err(Error::InvalidRequest("systemId is required".to_string()));
        }

        let mut validated = ValidatedRequest {
            document_id,
            identity: SignerIdentity {
                profile_name: self.profile_name.trim().to_string(),
                system_id: self.system_id.trim().to_string(),
                kind: self.kind,
            },
            password: self.doc_pass.clone().unwrap_or_default().into_bytes(),
            reason: non_empty(self.reason.as_ref()),
            location: non_empty(self.location.as_ref()),
            page_index: 0,
            rect: Rect::new(0.0, 0.0, 0.0, 0.0),
            style: AppearanceStyle::Invisible,
            specimen: SpecimenSource::None,
            qr_data: None,
            caption: None,
        };

        let Some(coord) = &self.coordinate else {
            return Ok(validated);
        };
        if coord.page == 0 {
            return Err(Error::InvalidRequest("page numbers start at 1".to_string()));
        }
        if ![coord.llx, coord.lly, coord.urx, coord.ury].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidRequest("coordinates must be finite numbers".to_string()));
        }
        validated.page_index = (coord.page - 1) as usize;
        validated.rect = Rect::from_points(coord.llx, coord.lly, coord.urx, coord.ury);

        validated.specimen = match non_empty(coord.specimen_image.as_ref()) {
            None => SpecimenSource::None,
            Some(data) if coord.is_base64 => SpecimenSource::Inline(
                decode_base64(&data)
                    .map_err(|e| Error::InvalidRequest(format!("specimenImage is not valid base64: {}", e)))?,
            ),
            Some(name) => {
                DocumentStore::check_file_name(&name)?;
                SpecimenSource::Named(name)
            },
        };
        validated.qr_data = non_empty(coord.specimen_qr_data.as_ref());
        validated.caption = non_empty(coord.specimen_text_data.as_ref());
        validated.style = if validated.rect.is_empty() {
            AppearanceStyle::Invisible
        } else if validated.qr_data.is_some() {
            AppearanceStyle::Qr
        } else {
            AppearanceStyle::Text
        };
        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SigningRequest {
        SigningRequest {
            src: "abc.pdf".to_string(),
            profile_name: "jane@example.com".to_string(),
            system_id: "DMS".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_json_shape() {
        let req: SigningRequest = serde_json::from_str(
            r#"{"src": "abc.pdf", "profileName": "jane@example.com", "systemId": "DMS",
                "docPass": "pw", "kind": "stampDuty",
                "coordinate": {"page": 2, "llx": 10, "lly": 20, "urx": 110, "ury": 70,
                               "isBase64": false, "specimenImage": "sig.png",
                               "specimenQrData": "https://verify.test"}}"#,
        )
        .unwrap();
        let v = req.validate().unwrap();
        assert_eq!(v.document_id, "abc");
        assert_eq!(v.password, b"pw");
        assert_eq!(v.identity.kind, SigningKind::StampDuty);
        assert_eq!(v.page_index, 1);
        assert_eq!(v.rect, Rect::new(10.0, 20.0, 100.0, 50.0));
        assert_eq!(v.style, AppearanceStyle::Qr);
        assert_eq!(v.specimen, SpecimenSource::Named("sig.png".into()));
    }

    #[test]
    fn test_no_coordinate_is_invisible() {
        let v = request().validate().unwrap();
        assert_eq!(v.style, AppearanceStyle::Invisible);
        assert!(v.password.is_empty());
    }

    #[test]
    fn test_zero_area_box_is_invisible() {
        let mut req = request();
        req.coordinate = Some(Coordinate {
            page: 1,
            specimen_text_data: Some("hello".into()),
            ..Default::default()
        });
        assert_eq!(req.validate().unwrap().style, AppearanceStyle::Invisible);
    }

    #[test]
    fn test_rejections() {
        let mut req = request();
        req.src = "../etc/passwd".into();
        assert_eq!(req.validate().unwrap_err().code(), "80");

        let mut req = request();
        req.profile_name = " ".into();
        assert_eq!(req.validate().unwrap_err().code(), "80");

        let mut req = request();
        req.coordinate = Some(Coordinate {
            page: 0,
            ..Default::default()
        });
        assert_eq!(req.validate().unwrap_err().code(), "80");

        let mut req = request();
        req.coordinate = Some(Coordinate {
            page: 1,
            urx: 10.0,
            ury: 10.0,
            is_base64: true,
            specimen_image: Some("***".into()),
            ..Default::default()
        });
        assert_eq!(req.validate().unwrap_err().code(), "80");

        let mut req = request();
        req.coordinate = Some(Coordinate {
            page: 1,
            specimen_image: Some("a/b.png".into()),
            ..Default::default()
        });
        assert_eq!(req.validate().unwrap_err().code(), "80");
    }
}
