//! Shared fixtures for the integration tests: certificates and keys,
//! minimal PDFs, and local stand-ins for the upstream services with call
//! counters.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use der::asn1::ObjectIdentifier;
use pades_oxide::config::{RevocationMode, SignerConfig};
use pades_oxide::encryption::algorithms::{compute_file_key, compute_owner_value, compute_user_value};
use pades_oxide::error::{Error, Result};
use pades_oxide::remote::{CertificateChainSource, DigestSigner, SignerIdentity, SignerProvider, UpstreamAuth};
use pades_oxide::signatures::cms::{encode_signed_attributes, SignedDataBuilder, ID_TST_INFO};
use pades_oxide::signatures::timestamp::MessageImprint;
use pades_oxide::signatures::{
    Certificate, CertificateChain, Crl, DigestAlgorithm, IncrementalSigningEngine, RevocationFetcher,
    SignatureVerificationEngine, SigningServices, TimeStamper, TstInfo,
};
use pades_oxide::store::DocumentStore;
use pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const CRL_URL: &str = "http://crl.test/root.crl";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path.display(), e))
}

/// `<name>.der`
pub fn certificate(name: &str) -> Certificate {
    Certificate::from_der(&fixture(&format!("{}.der", name))).unwrap()
}

/// `<name>_key.der`
pub fn private_key(name: &str) -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_der(&fixture(&format!("{}_key.der", name))).unwrap()
}

/// Leaf `name` issued by the test root.
pub fn chain(name: &str) -> CertificateChain {
    CertificateChain::new(vec![certificate(name), certificate("root")]).unwrap()
}

pub fn auth() -> UpstreamAuth {
    UpstreamAuth::new("test-jwt", "test-api-key")
}

// ---------------------------------------------------------------------------
// PDFs

/// Assemble a classic-xref PDF from object bodies numbered from 1.
pub fn build_pdf(objects: &[String], trailer_extra: &str) -> Vec<u8> {
    let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            trailer_extra,
            xref
        )
        .as_bytes(),
    );
    out
}

fn page_objects(pages: usize) -> Vec<String> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>".to_string());
    }
    objects
}

/// Unencrypted document with `pages` empty A4 pages.
pub fn minimal_pdf(pages: usize) -> Vec<u8> {
    build_pdf(&page_objects(pages), "")
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

/// One-page document encrypted with RC4-128 (R3) for `user_password`.
///
/// The document holds no strings or streams, so only the `/Encrypt`
/// dictionary has to be computed.
pub fn encrypted_pdf(user_password: &[u8]) -> Vec<u8> {
    const FILE_ID: &[u8] = b"pades-oxide-test";
    let permissions = -4;
    let owner_value = compute_owner_value(b"owner-secret", user_password, 3, 16);
    let key = compute_file_key(user_password, &owner_value, permissions, FILE_ID, 3, 16, true);
    let user_value = compute_user_value(&key, FILE_ID, 3);

    let mut objects = page_objects(1);
    objects.push(format!(
        "<< /Filter /Standard /V 2 /R 3 /Length 128 /P {} /O <{}> /U <{}> >>",
        permissions,
        hex(&owner_value),
        hex(&user_value)
    ));
    let encrypt_id = objects.len();
    build_pdf(
        &objects,
        &format!("/Encrypt {} 0 R /ID [<{}> <{}>]", encrypt_id, hex(FILE_ID), hex(FILE_ID)),
    )
}

/// Small opaque PNG, usable as a specimen.
pub fn png_image() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(8, 4, image::Rgba([20, 40, 200, 180]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

// ---------------------------------------------------------------------------
// Upstream stand-ins

/// Serves a fixed chain.
pub struct MockChainSource {
    pub chain: CertificateChain,
    pub calls: AtomicUsize,
}

impl MockChainSource {
    pub fn new(chain: CertificateChain) -> Self {
        Self {
            chain,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateChainSource for MockChainSource {
    async fn fetch(&self, _identity: &SignerIdentity, _auth: &UpstreamAuth) -> Result<CertificateChain> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.clone())
    }
}

/// Signs with a local key, counting real signing calls.
pub struct MockSignerProvider {
    pub key: RsaPrivateKey,
    pub calls: Arc<AtomicUsize>,
    pub binds: AtomicUsize,
}

impl MockSignerProvider {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self {
            key,
            calls: Arc::new(AtomicUsize::new(0)),
            binds: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

impl SignerProvider for MockSignerProvider {
    fn bind(&self, _identity: &SignerIdentity, _auth: &UpstreamAuth, signature_size: usize) -> Box<dyn DigestSigner> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Box::new(MockSigner {
            key: self.key.clone(),
            size: signature_size,
            calls: self.calls.clone(),
        })
    }
}

pub struct MockSigner {
    key: RsaPrivateKey,
    size: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DigestSigner for MockSigner {
    fn signature_size(&self) -> usize {
        self.size
    }

    async fn sign_raw(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.key.sign(algorithm.pkcs1v15(), digest)?)
    }
}

/// Issues RFC 3161 tokens with the test TSA certificate.
pub struct MockTimeStamper {
    key: RsaPrivateKey,
    cert: Certificate,
    root: Certificate,
    serial: AtomicUsize,
}

impl MockTimeStamper {
    pub fn new() -> Self {
        Self {
            key: private_key("tsa"),
            cert: certificate("tsa"),
            root: certificate("root"),
            serial: AtomicUsize::new(1),
        }
    }

    pub fn calls(&self) -> usize {
        self.serial.load(Ordering::SeqCst) - 1
    }

    /// Token over `data`.
    pub fn token(&self, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) as u64;
        let info = TstInfo {
            policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1"),
            message_imprint: MessageImprint::of(algorithm, data)?,
            serial_number: serial,
            gen_time: Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap(),
            nonce: None,
        };
        let content = info.to_der()?;
        let builder = SignedDataBuilder::new(DigestAlgorithm::Sha256, self.cert.clone())
            .with_certificates(&[self.root.clone()])
            .with_content(ID_TST_INFO, content.clone());
        let attrs = builder.signed_attributes(&DigestAlgorithm::Sha256.digest(&content))?;
        let to_sign = DigestAlgorithm::Sha256.digest(&encode_signed_attributes(&attrs)?);
        let signature = self.key.sign(DigestAlgorithm::Sha256.pkcs1v15(), &to_sign)?;
        builder.build(attrs, &signature, None)
    }
}

#[async_trait]
impl TimeStamper for MockTimeStamper {
    async fn timestamp(&self, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        self.token(data, algorithm)
    }
}

/// Serves CRLs from memory.
#[derive(Default)]
pub struct MockRevocationFetcher {
    pub crls: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl MockRevocationFetcher {
    pub fn serving(url: &str, crl: &str) -> Self {
        let mut crls = HashMap::new();
        crls.insert(url.to_string(), fixture(crl));
        Self {
            crls,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RevocationFetcher for MockRevocationFetcher {
    async fn fetch_crl(&self, url: &str) -> Result<Crl> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.crls.get(url) {
            Some(der) => Crl::from_der(der),
            None => Err(Error::UnexpectedTransport {
                status: 404,
                reason: format!("no CRL at {}", url),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness

/// Stores in a temporary directory plus mocked upstreams for one signer.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: SignerConfig,
    pub chains: Arc<MockChainSource>,
    pub signers: Arc<MockSignerProvider>,
    pub timestamper: Arc<MockTimeStamper>,
    pub revocation: Arc<MockRevocationFetcher>,
}

impl Harness {
    /// Harness signing as fixture `signer` (`signer`, `meterai`, `revocable`).
    pub fn new(signer: &str) -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = SignerConfig::new()
            .with_base_dir(dir.path())
            .with_revocation(RevocationMode::Fetch);
        Self {
            dir,
            config,
            chains: Arc::new(MockChainSource::new(chain(signer))),
            signers: Arc::new(MockSignerProvider::new(private_key(signer))),
            timestamper: Arc::new(MockTimeStamper::new()),
            revocation: Arc::new(MockRevocationFetcher::serving(CRL_URL, "root_empty.crl")),
        }
    }

    pub fn with_revocation(mut self, fetcher: MockRevocationFetcher) -> Self {
        self.revocation = Arc::new(fetcher);
        self
    }

    pub fn services(&self) -> SigningServices {
        SigningServices {
            chains: self.chains.clone(),
            signers: self.signers.clone(),
            timestamper: self.timestamper.clone(),
            revocation: self.revocation.clone(),
        }
    }

    pub fn engine(&self) -> IncrementalSigningEngine {
        IncrementalSigningEngine::new(self.config.clone(), self.services()).unwrap()
    }

    pub fn store(&self) -> DocumentStore {
        DocumentStore::from_config(&self.config)
    }

    pub fn verifier(&self) -> SignatureVerificationEngine {
        SignatureVerificationEngine::new(&self.config, self.revocation.clone())
    }

    /// Save `pdf` in the unsigned store and return its id.
    pub async fn upload(&self, pdf: &[u8]) -> String {
        self.store().save_unsigned(pdf).await.unwrap()
    }

    /// Files currently in the signed store.
    pub fn signed_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.signed_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
