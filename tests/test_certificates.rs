//! Certificate, CRL and path validation against the test PKI.

mod common;

use chrono::Utc;
use common::{certificate, chain, fixture, MockRevocationFetcher, CRL_URL};
use pades_oxide::config::RevocationMode;
use pades_oxide::signatures::{load_trust_roots, Crl, DigestAlgorithm, NoFetch, ValidationContext};
use std::sync::Arc;

#[test]
fn test_fixture_certificates() {
    let root = certificate("root");
    assert!(root.is_ca());
    assert!(root.is_self_issued());
    assert_eq!(root.common_name(), Some("Test Root CA"));

    let signer = certificate("signer");
    assert!(!signer.is_ca());
    assert_eq!(signer.common_name(), Some("Jane Signer"));
    assert_eq!(signer.serial_hex(), "1001");
    assert_eq!(signer.signature_size(), Some(256));
    assert!(signer.is_issued_by(&root));
    assert!(signer.verify_signed_by(&root).is_ok());
    assert!(signer.verify_signed_by(&signer).is_err());
    assert!(signer.crl_urls().is_empty());

    assert_eq!(certificate("revocable").crl_urls(), [CRL_URL.to_string()]);
    assert_eq!(signer.fingerprint(DigestAlgorithm::Sha256).len(), 32);
}

#[test]
fn test_crl_entries() {
    let root = certificate("root");
    let revoked = Crl::from_der(&fixture("root_revoked.crl")).unwrap();
    let empty = Crl::from_der(&fixture("root_empty.crl")).unwrap();

    assert!(revoked.is_issued_by(&root));
    assert!(revoked.verify_signed_by(&root).is_ok());
    assert!(revoked.revocation_of(&certificate("revocable")).is_some());
    assert!(revoked.revocation_of(&certificate("signer")).is_none());
    assert!(empty.revocation_of(&certificate("revocable")).is_none());
    assert!(revoked.verify_signed_by(&certificate("signer")).is_err());
}

#[tokio::test]
async fn test_path_to_chain_top() {
    let context = ValidationContext::for_signing(&chain("signer"), &[], RevocationMode::Offline, Arc::new(NoFetch));
    let path = context.validate(&certificate("signer"), Utc::now()).await;
    assert!(path.trusted, "{:?}", path.messages);
    assert_eq!(path.path.len(), 2);
}

#[tokio::test]
async fn test_foreign_root_not_trusted() {
    // the TSA certificate alone cannot anchor a path to the root
    let context = ValidationContext::new(vec![certificate("tsa")], RevocationMode::Offline, Arc::new(NoFetch));
    let path = context.validate(&certificate("signer"), Utc::now()).await;
    assert!(!path.trusted);
    assert!(!path.messages.is_empty());
}

#[tokio::test]
async fn test_revocation_policy() {
    let revocable = certificate("revocable");
    let chain = chain("revocable");

    // offline with a distribution point and no CRL
    let offline = ValidationContext::for_signing(&chain, &[], RevocationMode::Offline, Arc::new(NoFetch));
    let path = offline.validate(&revocable, Utc::now()).await;
    assert!(!path.trusted);

    // an embedded CRL is enough offline
    let embedded = offline
        .clone()
        .with_crls(vec![Crl::from_der(&fixture("root_empty.crl")).unwrap()]);
    let path = embedded.validate(&revocable, Utc::now()).await;
    assert!(path.trusted, "{:?}", path.messages);

    let fetcher = Arc::new(MockRevocationFetcher::serving(CRL_URL, "root_revoked.crl"));
    let fetching = ValidationContext::for_signing(&chain, &[], RevocationMode::Fetch, fetcher.clone());
    let path = fetching.validate(&revocable, Utc::now()).await;
    assert!(!path.trusted);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(path.crls.len(), 1);
    assert!(path.messages.iter().any(|m| m.contains("revoked")));
}

#[tokio::test]
async fn test_embedded_context_uses_self_issued_roots() {
    let certs = vec![certificate("signer"), certificate("root")];
    let context = ValidationContext::from_embedded(&certs, RevocationMode::Offline, Arc::new(NoFetch));
    assert_eq!(context.trust_roots(), [certificate("root")]);
    assert!(context.validate(&certs[0], Utc::now()).await.trusted);
}

#[test]
fn test_key_store_loading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("root.der"), fixture("root.der")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a certificate").unwrap();
    std::fs::write(dir.path().join("broken.pem"), b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
        .unwrap();

    let roots = load_trust_roots(dir.path()).unwrap();
    assert_eq!(roots, vec![certificate("root")]);
    assert!(load_trust_roots(&dir.path().join("missing")).unwrap().is_empty());
}
