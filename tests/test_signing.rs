//! End-to-end signing against local upstream stand-ins.

mod common;

use common::{auth, encrypted_pdf, minimal_pdf, png_image, Harness, MockRevocationFetcher, CRL_URL};
use pades_oxide::object::DictExt;
use pades_oxide::request::{Coordinate, SigningRequest};
use pades_oxide::error::Error;
use pades_oxide::signatures::{
    SigningKind, SigningObserver, SigningStage, VerificationStatus, SUMMARY_ALL_VALID, SUMMARY_SOME_INVALID,
};
use pades_oxide::PdfDocument;
use std::sync::{Arc, Mutex};

fn request(src: &str) -> SigningRequest {
    SigningRequest {
        src: src.to_string(),
        profile_name: "jane@example.com".to_string(),
        system_id: "DMS".to_string(),
        reason: Some("Approved".to_string()),
        location: Some("Jakarta".to_string()),
        ..Default::default()
    }
}

fn visible(page: u32) -> Coordinate {
    Coordinate {
        page,
        llx: 50.0,
        lly: 50.0,
        urx: 250.0,
        ury: 130.0,
        ..Default::default()
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[tokio::test]
async fn test_sign_invisible_round_trip() {
    let h = Harness::new("signer");
    let original = minimal_pdf(1);
    let id = h.upload(&original).await;

    let outcome = h.engine().sign(&request(&id), &auth()).await.unwrap();
    assert_eq!(outcome.document_id, id);
    assert!(outcome.output_name.starts_with("signed_"));
    assert!(outcome.field_name.starts_with("sig"));
    assert!(outcome.signer_subject.contains("Jane Signer"));
    assert!(outcome.trusted);
    assert_eq!(h.signed_files().len(), 1);

    let signed = std::fs::read(&outcome.path).unwrap();
    assert_eq!(signed.len(), outcome.size);
    // incremental: the original bytes are untouched
    assert_eq!(&signed[..original.len()], &original[..]);

    assert_eq!(h.chains.calls(), 1);
    assert_eq!(h.signers.calls(), 1);
    assert_eq!(h.timestamper.calls(), 1);

    let report = h.verifier().verify_bytes(signed, None).await.unwrap();
    assert_eq!(report.total_signature, 1);
    assert_eq!(report.valid_signature, 1);
    assert_eq!(report.summary, SUMMARY_ALL_VALID);
    assert!(!report.stamp_duty);

    let sig = &report.signatures[0];
    assert_eq!(sig.field_name, outcome.field_name);
    assert!(sig.intact, "{:?}", sig.messages);
    assert!(sig.trusted, "{:?}", sig.messages);
    assert_eq!(sig.status, VerificationStatus::Valid);
    assert_eq!(sig.sub_filter.as_deref(), Some("ETSI.CAdES.detached"));
    assert_eq!(sig.timestamp_valid, Some(true));
    assert!(sig.timestamp_time.is_some());
    assert_eq!(sig.signer_name.as_deref(), Some("Jane Signer"));
    assert_eq!(sig.reason.as_deref(), Some("Approved"));
    assert_eq!(sig.location.as_deref(), Some("Jakarta"));
    assert_eq!(sig.certification_level, None);
    // the DSS revision follows the signature revision
    assert!(!sig.covers_whole_document);
}

#[tokio::test]
async fn test_signed_document_has_dss_and_widget() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(2)).await;
    let outcome = h.engine().sign(&request(&id), &auth()).await.unwrap();

    let doc = PdfDocument::open(&outcome.path).unwrap();
    let catalog = doc.catalog().unwrap();
    assert!(catalog.contains_key("DSS"));
    assert!(catalog.contains_key("AcroForm"));

    let acroform = doc.acroform().unwrap().unwrap();
    assert_eq!(acroform.get_int("SigFlags"), Some(3));

    let fields = doc.form_fields().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].full_name, outcome.field_name);
}

#[tokio::test]
async fn test_sign_encrypted_source() {
    let h = Harness::new("signer");
    let id = h.upload(&encrypted_pdf(b"user-secret")).await;

    let req = SigningRequest {
        doc_pass: Some("user-secret".to_string()),
        ..request(&id)
    };
    let outcome = h.engine().sign(&req, &auth()).await.unwrap();
    let signed = std::fs::read(&outcome.path).unwrap();

    let mut doc = PdfDocument::from_bytes(signed.clone()).unwrap();
    assert!(doc.is_encrypted());
    assert!(doc.authenticate(b"user-secret").unwrap());

    let report = h.verifier().verify_bytes(signed.clone(), Some(b"user-secret")).await.unwrap();
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
    assert_eq!(report.signatures[0].reason.as_deref(), Some("Approved"));

    let err = h.verifier().verify_bytes(signed, Some(b"wrong")).await.unwrap_err();
    assert_eq!(err.code(), "83");
}

#[tokio::test]
async fn test_wrong_password_stops_before_upstream() {
    let h = Harness::new("signer");
    let id = h.upload(&encrypted_pdf(b"user-secret")).await;

    let req = SigningRequest {
        doc_pass: Some("guess".to_string()),
        ..request(&id)
    };
    let err = h.engine().sign(&req, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "83");
    assert_eq!(h.chains.calls(), 0);
    assert_eq!(h.signers.calls(), 0);
    assert!(h.signed_files().is_empty());
}

#[tokio::test]
async fn test_missing_source() {
    let h = Harness::new("signer");
    let err = h.engine().sign(&request("nope.pdf"), &auth()).await.unwrap_err();
    assert_eq!(err.code(), "82");
    assert_eq!(h.chains.calls(), 0);
    assert!(h.signed_files().is_empty());
}

#[tokio::test]
async fn test_invalid_request_rejected_first() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let req = SigningRequest {
        profile_name: " ".to_string(),
        ..request(&id)
    };
    let err = h.engine().sign(&req, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "80");
    assert_eq!(h.chains.calls(), 0);
}

#[tokio::test]
async fn test_page_out_of_range() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let req = SigningRequest {
        coordinate: Some(visible(3)),
        ..request(&id)
    };
    let err = h.engine().sign(&req, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "80");
    assert_eq!(h.signers.calls(), 0);
    assert!(h.signed_files().is_empty());
}

#[tokio::test]
async fn test_visible_text_stamp_with_specimen() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(2)).await;
    let specimen = h.store().save_specimen("jane@example.com", &png_image()).await.unwrap();

    let req = SigningRequest {
        coordinate: Some(Coordinate {
            specimen_image: Some(specimen),
            specimen_text_data: Some("Signed by %(signer)s at %(ts)s".to_string()),
            ..visible(2)
        }),
        ..request(&id)
    };
    let outcome = h.engine().sign(&req, &auth()).await.unwrap();
    let doc = PdfDocument::open(&outcome.path).unwrap();
    let widget = &doc.form_fields().unwrap()[0].dict;
    assert!(widget.contains_key("AP"));

    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
}

#[tokio::test]
async fn test_visible_qr_stamp_inline_image() {
    use base64::Engine;

    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let req = SigningRequest {
        coordinate: Some(Coordinate {
            is_base64: true,
            specimen_image: Some(base64::engine::general_purpose::STANDARD.encode(png_image())),
            specimen_qr_data: Some("https://verify.example.com/doc/42".to_string()),
            ..visible(1)
        }),
        ..request(&id)
    };
    let outcome = h.engine().sign(&req, &auth()).await.unwrap();
    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
}

#[tokio::test]
async fn test_missing_specimen_file() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let req = SigningRequest {
        coordinate: Some(Coordinate {
            specimen_image: Some("absent.png".to_string()),
            ..visible(1)
        }),
        ..request(&id)
    };
    let err = h.engine().sign(&req, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "84");
    assert_eq!(h.signers.calls(), 0);
    assert!(h.signed_files().is_empty());
}

#[tokio::test]
async fn test_stamp_duty_certifies() {
    let h = Harness::new("meterai");
    let id = h.upload(&minimal_pdf(1)).await;
    let req = SigningRequest {
        kind: SigningKind::StampDuty,
        ..request(&id)
    };
    let outcome = h.engine().sign(&req, &auth()).await.unwrap();

    let doc = PdfDocument::open(&outcome.path).unwrap();
    assert!(doc.catalog().unwrap().contains_key("Perms"));

    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    assert!(report.stamp_duty);
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
    assert_eq!(report.signatures[0].certification_level, Some(1));
}

#[tokio::test]
async fn test_second_signature_and_tampering() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let first = h.engine().sign(&request(&id), &auth()).await.unwrap();

    let once = std::fs::read(&first.path).unwrap();
    let again = h.upload(&once).await;
    let req = SigningRequest {
        reason: Some("Second approval".to_string()),
        ..request(&again)
    };
    let second = h.engine().sign(&req, &auth()).await.unwrap();
    assert_ne!(first.field_name, second.field_name);

    let twice = std::fs::read(&second.path).unwrap();
    assert_eq!(&twice[..once.len()], &once[..]);

    let report = h.verifier().verify_bytes(twice.clone(), None).await.unwrap();
    assert_eq!(report.total_signature, 2);
    assert_eq!(report.valid_signature, 2, "{:?}", report.signatures);

    let mut tampered = twice;
    let at = rfind(&tampered, b"Second approval").unwrap();
    tampered[at] = b'Z';
    let report = h.verifier().verify_bytes(tampered, None).await.unwrap();
    assert_eq!(report.total_signature, 2);
    assert_eq!(report.valid_signature, 1);
    assert_eq!(report.summary, SUMMARY_SOME_INVALID);
    assert!(report.signatures[0].intact);
    assert!(!report.signatures[1].intact);
    assert_eq!(report.signatures[1].status, VerificationStatus::Invalid);
}

#[tokio::test]
async fn test_revoked_signer_is_untrusted() {
    let h = Harness::new("revocable").with_revocation(MockRevocationFetcher::serving(CRL_URL, "root_revoked.crl"));
    let id = h.upload(&minimal_pdf(1)).await;

    // validation problems at signing time are only logged
    let outcome = h.engine().sign(&request(&id), &auth()).await.unwrap();
    assert!(!outcome.trusted);
    assert!(h.revocation.calls() >= 1);

    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    let sig = &report.signatures[0];
    assert!(sig.intact, "{:?}", sig.messages);
    assert!(!sig.trusted);
    assert_eq!(report.valid_signature, 0);
    assert!(sig.messages.iter().any(|m| m.contains("revoked")), "{:?}", sig.messages);
}

#[tokio::test]
async fn test_revocable_signer_with_clean_crl() {
    let h = Harness::new("revocable");
    let id = h.upload(&minimal_pdf(1)).await;
    let outcome = h.engine().sign(&request(&id), &auth()).await.unwrap();
    assert!(outcome.trusted);

    // the CRL travels in the DSS, so verification needs no fetch
    let before = h.revocation.calls();
    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
    assert_eq!(h.revocation.calls(), before);
}

/// Records every stage and failure it is told about.
#[derive(Default)]
struct RecordingObserver {
    stages: Mutex<Vec<(String, SigningStage)>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl SigningObserver for RecordingObserver {
    fn stage(&self, document_id: &str, stage: SigningStage) {
        self.stages.lock().unwrap().push((document_id.to_string(), stage));
    }

    fn failed(&self, document_id: &str, error: &Error) {
        self.failures.lock().unwrap().push((document_id.to_string(), error.code()));
    }
}

#[tokio::test]
async fn test_observer_sees_every_stage_in_order() {
    let h = Harness::new("signer");
    let id = h.upload(&minimal_pdf(1)).await;
    let observer = Arc::new(RecordingObserver::default());
    h.engine()
        .with_observer(observer.clone())
        .sign(&request(&id), &auth())
        .await
        .unwrap();

    let stages = observer.stages.lock().unwrap().clone();
    assert!(stages.iter().all(|(doc, _)| *doc == id));
    let stages: Vec<SigningStage> = stages.into_iter().map(|(_, stage)| stage).collect();
    assert_eq!(
        stages,
        [
            SigningStage::DocumentOpened,
            SigningStage::FieldAllocated,
            SigningStage::ChainResolved,
            SigningStage::AppearanceBuilt,
            SigningStage::ContainerReserved,
            SigningStage::Signed,
            SigningStage::Timestamped,
            SigningStage::ValidationInfoEmbedded,
            SigningStage::Written,
        ]
    );
    assert!(observer.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_observer_told_about_early_exit() {
    let h = Harness::new("signer");
    let id = h.upload(&encrypted_pdf(b"user-secret")).await;
    let observer = Arc::new(RecordingObserver::default());
    let req = SigningRequest {
        doc_pass: Some("guess".to_string()),
        ..request(&id)
    };
    let err = h.engine().with_observer(observer.clone()).sign(&req, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "83");

    assert_eq!(*observer.failures.lock().unwrap(), [(id.clone(), "83".to_string())]);
    let stages = observer.stages.lock().unwrap();
    // the password check comes before the first stage
    assert!(stages.is_empty());
}
