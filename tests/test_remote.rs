//! Upstream HTTP clients against a mock gateway.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{auth, certificate, fixture, minimal_pdf, private_key, Harness, MockTimeStamper};
use pades_oxide::remote::{
    CertificateChainClient, CertificateChainSource, DigestSigner, HttpSignerProvider, SignMode, SignerIdentity,
    SignerProvider,
};
use pades_oxide::request::SigningRequest;
use pades_oxide::signatures::{
    DigestAlgorithm, HttpRevocationFetcher, IncrementalSigningEngine, RevocationFetcher, SigningKind,
    SigningServices,
};
use std::sync::Arc;

fn identity(kind: SigningKind) -> SignerIdentity {
    SignerIdentity {
        profile_name: "jane@example.com".to_string(),
        system_id: "DMS".to_string(),
        kind,
    }
}

fn chain_body() -> String {
    serde_json::json!({
        "resultCode": "0",
        "resultDesc": "success",
        "data": {
            "signerCertChain": [STANDARD.encode(fixture("signer.der")), STANDARD.encode(fixture("root.der"))]
        }
    })
    .to_string()
}

fn chain_client(server: &mockito::Server) -> CertificateChainClient {
    CertificateChainClient::new(
        reqwest::Client::new(),
        format!("{}/chain", server.url()),
        format!("{}/chain-terra", server.url()),
    )
}

#[tokio::test]
async fn test_chain_fetch_sends_credentials() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chain")
        .match_header("x-gateway-apikey", "test-api-key")
        .match_header("authorization", "Bearer test-jwt")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "email": "jane@example.com",
            "systemId": "DMS"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chain_body())
        .create_async()
        .await;

    let chain = chain_client(&server)
        .fetch(&identity(SigningKind::Ordinary), &auth())
        .await
        .unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.leaf().common_name(), Some("Jane Signer"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_stamp_duty_uses_its_own_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chain-terra")
        .with_status(200)
        .with_body(chain_body())
        .create_async()
        .await;

    chain_client(&server)
        .fetch(&identity(SigningKind::StampDuty), &auth())
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_transport_status_mapping() {
    for (status, code) in [(503, "503"), (504, "504"), (500, "500"), (401, "401"), (202, "202")] {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chain")
            .with_status(status)
            .with_body("upstream down")
            .create_async()
            .await;
        let err = chain_client(&server)
            .fetch(&identity(SigningKind::Ordinary), &auth())
            .await
            .unwrap_err();
        assert_eq!(err.code(), code);
        assert!(err.is_remote());
    }
}

#[tokio::test]
async fn test_business_error_keeps_upstream_code() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chain")
        .with_status(200)
        .with_body(r#"{"resultCode": 14, "resultDesc": "user not registered", "data": null}"#)
        .create_async()
        .await;
    let err = chain_client(&server)
        .fetch(&identity(SigningKind::Ordinary), &auth())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "14");
    assert_eq!(err.to_string(), "user not registered");
}

#[tokio::test]
async fn test_undecodable_certificate() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chain")
        .with_status(200)
        .with_body(r#"{"resultCode": "0", "data": {"signerCertChain": ["bm90IGEgY2VydA=="]}}"#)
        .create_async()
        .await;
    let err = chain_client(&server)
        .fetch(&identity(SigningKind::Ordinary), &auth())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "86");
}

#[tokio::test]
async fn test_sign_hash_request_and_decode() {
    let mut server = mockito::Server::new_async().await;
    let digest = DigestAlgorithm::Sha256.digest(b"attributes");
    let mock = server
        .mock("POST", "/sign")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "requestSigning": {
                "data": STANDARD.encode(&digest),
                "email": "jane@example.com",
                "systemId": "DMS",
                "type": "SIGNING"
            }
        })))
        .with_status(200)
        .with_body(
            serde_json::json!({
                "resultCode": "0",
                "data": {"signedHash": STANDARD.encode([7u8; 256]), "orderId": 991}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let provider = HttpSignerProvider::new(reqwest::Client::new(), format!("{}/sign", server.url()));
    let signer = provider.bind(&identity(SigningKind::Ordinary), &auth(), 256);

    // sizing never reaches the network
    let estimate = signer.sign_digest(&digest, DigestAlgorithm::Sha256, SignMode::Estimate).await.unwrap();
    assert_eq!(estimate, vec![0u8; 256]);

    let signature = signer.sign_digest(&digest, DigestAlgorithm::Sha256, SignMode::Sign).await.unwrap();
    assert_eq!(signature, vec![7u8; 256]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_short_signature_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sign")
        .with_status(200)
        .with_body(serde_json::json!({"resultCode": "0", "data": {"signedHash": STANDARD.encode([1u8; 16])}}).to_string())
        .create_async()
        .await;
    let provider = HttpSignerProvider::new(reqwest::Client::new(), format!("{}/sign", server.url()));
    let signer = provider.bind(&identity(SigningKind::StampDuty), &auth(), 256);
    let err = signer
        .sign_digest(&[0u8; 32], DigestAlgorithm::Sha256, SignMode::Sign)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "87");
}

#[tokio::test]
async fn test_crl_fetch_over_http() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/root.crl")
        .with_status(200)
        .with_header("content-type", "application/pkix-crl")
        .with_body(fixture("root_revoked.crl"))
        .create_async()
        .await;
    let crl = HttpRevocationFetcher::new(reqwest::Client::new())
        .fetch_crl(&format!("{}/root.crl", server.url()))
        .await
        .unwrap();
    assert!(crl.is_issued_by(&certificate("root")));
    assert!(crl.revocation_of(&certificate("revocable")).is_some());
}

#[tokio::test]
async fn test_engine_over_http_gateway() {
    let h = Harness::new("signer");
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chain")
        .with_status(200)
        .with_body(chain_body())
        .create_async()
        .await;
    let key = private_key("signer");
    let sign = server
        .mock("POST", "/sign")
        .with_status(200)
        .with_body_from_request(move |request| {
            let body: serde_json::Value = serde_json::from_slice(request.body().unwrap()).unwrap();
            let digest = STANDARD
                .decode(body["requestSigning"]["data"].as_str().unwrap())
                .unwrap();
            let signature = key.sign(DigestAlgorithm::Sha256.pkcs1v15(), &digest).unwrap();
            serde_json::json!({"resultCode": "0", "data": {"signedHash": STANDARD.encode(signature), "orderId": "A-1"}})
                .to_string()
                .into_bytes()
        })
        .expect(1)
        .create_async()
        .await;

    let http = reqwest::Client::new();
    let services = SigningServices {
        chains: Arc::new(chain_client(&server)),
        signers: Arc::new(HttpSignerProvider::new(http, format!("{}/sign", server.url()))),
        timestamper: Arc::new(MockTimeStamper::new()),
        revocation: h.revocation.clone(),
    };
    let engine = IncrementalSigningEngine::new(h.config.clone(), services).unwrap();

    let id = h.upload(&minimal_pdf(1)).await;
    let request = SigningRequest {
        src: id,
        profile_name: "jane@example.com".to_string(),
        system_id: "DMS".to_string(),
        ..Default::default()
    };
    let outcome = engine.sign(&request, &auth()).await.unwrap();
    sign.assert_async().await;

    let report = h.verifier().verify_file(&outcome.path, None).await.unwrap();
    assert_eq!(report.valid_signature, 1, "{:?}", report.signatures[0].messages);
}

#[tokio::test]
async fn test_engine_gateway_unavailable_writes_nothing() {
    let h = Harness::new("signer");
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/chain").with_status(503).create_async().await;

    let config = h
        .config
        .clone()
        .with_chain_url(format!("{}/chain", server.url()))
        .with_signing_url(format!("{}/sign", server.url()))
        .with_tsa_url(format!("{}/tsa", server.url()));
    let engine = IncrementalSigningEngine::from_config(config).unwrap();

    let id = h.upload(&minimal_pdf(1)).await;
    let request = SigningRequest {
        src: id,
        profile_name: "jane@example.com".to_string(),
        system_id: "DMS".to_string(),
        ..Default::default()
    };
    let err = engine.sign(&request, &auth()).await.unwrap_err();
    assert_eq!(err.code(), "503");
    assert!(h.signed_files().is_empty());
}
