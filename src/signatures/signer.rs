//! Incremental PAdES signing with a remotely held key.
//!
//! [`IncrementalSigningEngine::sign`] runs one request from the unsigned
//! store to the signed store:
//!
//! 1. validate the request and load the source document, authenticating
//!    it when encrypted,
//! 2. allocate a uniquely named signature field on the requested page,
//! 3. resolve the signer's certificate chain and bind a remote signer,
//! 4. prepare the appearance,
//! 5. reserve the `/Contents` container from a size estimate, write the
//!    signature revision and digest its byte ranges,
//! 6. have the signed attributes signed remotely, timestamp the signature
//!    and embed the CMS container,
//! 7. append a DSS revision with the validation material and write the
//!    result atomically.
//!
//! Nothing is written to the signed store unless every step succeeds.
//! Errors from the upstream services are returned unchanged.

use super::appearance::{CaptionParams, SignatureAppearance};
use super::byterange::{to_hex, ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
use super::certificate::{Certificate, CertificateChain};
use super::cms::{encode_signed_attributes, SignedDataBuilder};
use super::dss::{append_dss, ValidationMaterial};
use super::revocation::{HttpRevocationFetcher, RevocationFetcher};
use super::timestamp::{HttpTimeStamper, TimeStamper, TimestampToken};
use super::types::{DigestAlgorithm, SignatureMetadata};
use super::validation::{load_trust_roots, ValidationContext};
use crate::config::SignerConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Dict, DictExt, Object, ObjectRef};
use crate::remote::{
    http_client, CertificateChainClient, CertificateChainSource, HttpSignerProvider, SignMode, SignerProvider,
    UpstreamAuth,
};
use crate::request::{SigningRequest, SpecimenSource, ValidatedRequest};
use crate::store::DocumentStore;
use crate::writer::{dict, IncrementalWriter, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Bytes reserved in the container for the timestamp token.
const TIMESTAMP_RESERVE: usize = 10 * 1024;

/// Widget flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Progress points of a signing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    /// Source loaded and, when encrypted, authenticated
    DocumentOpened,
    /// Signature field name and page chosen
    FieldAllocated,
    /// Certificate chain received
    ChainResolved,
    /// Appearance prepared
    AppearanceBuilt,
    /// Signature revision written with its placeholders
    ContainerReserved,
    /// Remote signature received
    Signed,
    /// Timestamp token received
    Timestamped,
    /// DSS revision appended
    ValidationInfoEmbedded,
    /// Output stored
    Written,
}

/// Receives progress of signing runs.
pub trait SigningObserver: Send + Sync {
    /// `document_id` reached `stage`.
    fn stage(&self, document_id: &str, stage: SigningStage) {
        log::debug!("{}: {:?}", document_id, stage);
    }

    /// The run for `document_id` failed.
    fn failed(&self, document_id: &str, error: &Error) {
        log::error!("signing {} failed [{}]: {}", document_id, error.code(), error);
    }
}

/// Forwards progress to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl SigningObserver for LogObserver {}

/// Upstream capabilities used while signing.
#[derive(Clone)]
pub struct SigningServices {
    /// Certificate chain resolution
    pub chains: Arc<dyn CertificateChainSource>,
    /// Remote signers
    pub signers: Arc<dyn SignerProvider>,
    /// Timestamp authority
    pub timestamper: Arc<dyn TimeStamper>,
    /// CRL retrieval
    pub revocation: Arc<dyn RevocationFetcher>,
}

impl SigningServices {
    /// HTTP clients for the configured endpoints.
    pub fn http(config: &SignerConfig) -> Result<Self> {
        let http = http_client(config)?;
        Ok(Self {
            chains: Arc::new(CertificateChainClient::new(
                http.clone(),
                &config.chain_url,
                &config.stamp_duty_chain_url,
            )),
            signers: Arc::new(HttpSignerProvider::new(http.clone(), &config.signing_url)),
            timestamper: Arc::new(HttpTimeStamper::new(&config.tsa_url, http.clone())),
            revocation: Arc::new(HttpRevocationFetcher::new(http)),
        })
    }
}

/// A completed signing run.
#[derive(Debug, Clone)]
pub struct SigningOutcome {
    /// Source document id
    pub document_id: String,
    /// Name of the output in the signed store
    pub output_name: String,
    /// Path of the output
    pub path: PathBuf,
    /// Name of the new signature field
    pub field_name: String,
    /// Subject of the signing certificate
    pub signer_subject: String,
    /// Whether the signer's path validated when signing
    pub trusted: bool,
    /// Size of the output in bytes
    pub size: usize,
}

/// Signs stored documents through the upstream services.
pub struct IncrementalSigningEngine {
    config: SignerConfig,
    services: SigningServices,
    store: DocumentStore,
    extra_roots: Vec<Certificate>,
    observer: Arc<dyn SigningObserver>,
}

impl IncrementalSigningEngine {
    /// Engine over `config`'s stores. Extra trust roots are read from the
    /// key store directory.
    pub fn new(config: SignerConfig, services: SigningServices) -> Result<Self> {
        let extra_roots = load_trust_roots(&config.keystore_dir)?;
        log::debug!("{} extra trust root(s) from {}", extra_roots.len(), config.keystore_dir.display());
        Ok(Self {
            store: DocumentStore::from_config(&config),
            config,
            services,
            extra_roots,
            observer: Arc::new(LogObserver),
        })
    }

    /// Engine talking to the configured HTTP endpoints.
    pub fn from_config(config: SignerConfig) -> Result<Self> {
        let services = SigningServices::http(&config)?;
        Self::new(config, services)
    }

    /// Report progress to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn SigningObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Trust `roots` in addition to the key store.
    pub fn with_extra_roots(mut self, roots: Vec<Certificate>) -> Self {
        for root in roots {
            if !self.extra_roots.contains(&root) {
                self.extra_roots.push(root);
            }
        }
        self
    }

    /// The document stores.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Sign the document named by `request` and store the result.
    pub async fn sign(&self, request: &SigningRequest, auth: &UpstreamAuth) -> Result<SigningOutcome> {
        match self.run(request, auth).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.observer.failed(&request.src, &e);
                Err(e)
            },
        }
    }

    async fn run(&self, request: &SigningRequest, auth: &UpstreamAuth) -> Result<SigningOutcome> {
        let req = request.validate()?;
        let id = req.document_id.clone();
        let now = Utc::now();

        let data = self.store.load_unsigned(&id).await?;
        let mut doc = PdfDocument::from_bytes(data)?;
        if doc.is_encrypted() && !doc.authenticate(&req.password)? {
            return Err(Error::DecryptionFailed);
        }
        self.observer.stage(&id, SigningStage::DocumentOpened);

        let pages = doc.page_refs()?;
        let page_ref = *pages.get(req.page_index).ok_or_else(|| {
            Error::InvalidRequest(format!(
                "page {} does not exist (document has {} page(s))",
                req.page_index + 1,
                pages.len()
            ))
        })?;
        let field_name = unique_field_name(&doc, now)?;
        self.observer.stage(&id, SigningStage::FieldAllocated);

        let chain = self.services.chains.fetch(&req.identity, auth).await?;
        let leaf = chain.leaf().clone();
        let signature_size = leaf.signature_size().unwrap_or(self.config.signature_size);
        let signer = self.services.signers.bind(&req.identity, auth, signature_size);
        let context = ValidationContext::for_signing(
            &chain,
            &self.extra_roots,
            self.config.revocation,
            self.services.revocation.clone(),
        );
        self.observer.stage(&id, SigningStage::ChainResolved);

        let metadata = SignatureMetadata::new(&field_name)
            .with_certify(req.identity.kind.certification())
            .with_reason(req.reason.clone())
            .with_location(req.location.clone())
            .with_app(&self.config.app_name, &self.config.app_version);
        let metadata = SignatureMetadata {
            name: leaf.common_name().map(str::to_string),
            ..metadata
        };

        let appearance = self.appearance(&req).await?;
        self.observer.stage(&id, SigningStage::AppearanceBuilt);

        let algorithm = metadata.digest_algorithm;
        let builder = SignedDataBuilder::new(algorithm, leaf.clone()).with_certificates(chain.certificates());
        let estimate = {
            let dummy = signer.sign_digest(&algorithm.digest(b""), algorithm, SignMode::Estimate).await?;
            let attrs = builder.signed_attributes(&algorithm.digest(b""))?;
            builder.build(attrs, &dummy, None)?.len()
        };
        let calculator = ByteRangeCalculator::new(estimate + TIMESTAMP_RESERVE);

        let caption = CaptionParams {
            signer: leaf.common_name().unwrap_or_else(|| leaf.subject()).to_string(),
            timestamp: now,
            url: req.qr_data.clone(),
        };
        let placement = Placement {
            page_ref,
            rect: req.rect,
            appearance: &appearance,
            caption: &caption,
        };
        let (mut data, sig_offset) = write_signature_revision(&doc, &metadata, &placement, &calculator, now)?;
        self.observer.stage(&id, SigningStage::ContainerReserved);

        let contents_offset = ByteRangeCalculator::find_contents_offset(&data, sig_offset)
            .ok_or_else(|| Error::Internal("Contents placeholder not found".to_string()))?;
        let byte_range_offset = ByteRangeCalculator::find_byte_range_offset(&data, sig_offset)
            .ok_or_else(|| Error::Internal("ByteRange placeholder not found".to_string()))?;
        let byte_range = calculator.calculate_byte_range(data.len(), contents_offset);
        ByteRangeCalculator::write_byte_range(&mut data, byte_range_offset, &byte_range)?;

        let signed_bytes = ByteRangeCalculator::extract_signed_bytes(&data, &byte_range)?;
        let attrs = builder.signed_attributes(&algorithm.digest(&signed_bytes))?;
        let to_sign = algorithm.digest(&encode_signed_attributes(&attrs)?);
        let signature = signer.sign_digest(&to_sign, algorithm, SignMode::Sign).await?;
        self.observer.stage(&id, SigningStage::Signed);

        let token = self.services.timestamper.timestamp(&signature, DigestAlgorithm::Sha256).await?;
        self.observer.stage(&id, SigningStage::Timestamped);

        let container = builder.build(attrs, &signature, Some(&token))?;
        calculator.insert_signature(&mut data, contents_offset, &to_hex(&container))?;
        log::info!(
            "signed {} as {} ({} of {} container bytes used)",
            id,
            field_name,
            container.len(),
            calculator.capacity()
        );

        let (data, trusted) = self
            .embed_validation_info(data, &req, &chain, &token, &context, &metadata)
            .await?;
        self.observer.stage(&id, SigningStage::ValidationInfoEmbedded);

        let path = self.store.write_signed(&id, &data).await?;
        self.observer.stage(&id, SigningStage::Written);

        Ok(SigningOutcome {
            output_name: DocumentStore::signed_name(&id),
            document_id: id,
            path,
            field_name,
            signer_subject: leaf.subject().to_string(),
            trusted,
            size: data.len(),
        })
    }

    async fn appearance(&self, req: &ValidatedRequest) -> Result<SignatureAppearance> {
        if req.rect.is_empty() {
            return Ok(SignatureAppearance::invisible());
        }
        let background = match &req.specimen {
            SpecimenSource::None => None,
            SpecimenSource::Inline(bytes) => Some(bytes.clone()),
            SpecimenSource::Named(name) => Some(self.store.load_specimen_file(name).await?),
        };
        SignatureAppearance::new(background.as_deref(), req.qr_data.clone(), req.caption.clone())
    }

    /// Validate the signer and the TSA and append their material as a DSS
    /// revision. Returns the final bytes and whether the signer validated.
    async fn embed_validation_info(
        &self,
        data: Vec<u8>,
        req: &ValidatedRequest,
        chain: &CertificateChain,
        token: &[u8],
        context: &ValidationContext,
        metadata: &SignatureMetadata,
    ) -> Result<(Vec<u8>, bool)> {
        let now = Utc::now();
        let mut material = ValidationMaterial::default();
        for cert in chain.certificates() {
            material.add_certificate(cert);
        }

        let signer_path = context.validate(chain.leaf(), now).await;
        for message in &signer_path.messages {
            log::warn!("{}: {}", chain.leaf().subject(), message);
        }
        for crl in &signer_path.crls {
            material.add_crl(crl);
        }

        let token = TimestampToken::parse(token)?;
        for cert in token.certificates() {
            material.add_certificate(cert);
        }
        if let Some(tsa) = token.signer() {
            let tsa_path = context
                .clone()
                .with_intermediates(token.certificates())
                .validate(tsa, now)
                .await;
            if !tsa_path.trusted {
                log::warn!("timestamp authority {} is not trusted: {}", tsa.subject(), tsa_path.messages.join("; "));
            }
            for crl in &tsa_path.crls {
                material.add_crl(crl);
            }
        }

        let mut signed = PdfDocument::from_bytes(data)?;
        if signed.is_encrypted() && !signed.authenticate(&req.password)? {
            return Err(Error::DecryptionFailed);
        }
        if !metadata.embed_validation_info || material.is_empty() {
            return Ok((signed.into_data(), signer_path.trusted));
        }
        Ok((append_dss(&signed, &material)?, signer_path.trusted))
    }
}

/// Where and how the widget is drawn.
struct Placement<'a> {
    page_ref: ObjectRef,
    rect: Rect,
    appearance: &'a SignatureAppearance,
    caption: &'a CaptionParams,
}

/// `sig<unix time>`, with a numeric suffix when the name is taken.
fn unique_field_name(doc: &PdfDocument, now: DateTime<Utc>) -> Result<String> {
    let taken: HashSet<String> = doc.form_fields()?.into_iter().map(|f| f.full_name).collect();
    let base = format!("sig{}", now.timestamp());
    if !taken.contains(&base) {
        return Ok(base);
    }
    Ok((1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|name| !taken.contains(name))
        .unwrap_or(base))
}

/// PDF date string (`D:YYYYMMDDHHmmSS+00'00'`).
pub fn format_pdf_date(at: DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Signature dictionary entries other than `/ByteRange` and `/Contents`.
fn signature_dictionary(metadata: &SignatureMetadata, now: DateTime<Utc>) -> Dict {
    let mut sig = dict(vec![
        ("Type", Object::name("Sig")),
        ("Filter", Object::name("Adobe.PPKLite")),
        ("SubFilter", Object::name(metadata.sub_filter.as_pdf_name())),
        ("M", Object::text(&format_pdf_date(now))),
        (
            "Prop_Build",
            Object::Dictionary(dict(vec![(
                "App",
                Object::Dictionary(dict(vec![
                    ("Name", Object::name(&metadata.app_name)),
                    ("REx", Object::text(&metadata.app_version)),
                ])),
            )])),
        ),
    ]);
    if let Some(name) = &metadata.name {
        sig.insert("Name".into(), Object::text(name));
    }
    if let Some(reason) = &metadata.reason {
        sig.insert("Reason".into(), Object::text(reason));
    }
    if let Some(location) = &metadata.location {
        sig.insert("Location".into(), Object::text(location));
    }
    if let Some(level) = metadata.certify {
        let params = dict(vec![
            ("Type", Object::name("TransformParams")),
            ("P", Object::Integer(level.level())),
            ("V", Object::name("1.2")),
        ]);
        let reference = dict(vec![
            ("Type", Object::name("SigRef")),
            ("TransformMethod", Object::name("DocMDP")),
            ("TransformParams", Object::Dictionary(params)),
        ]);
        sig.insert("Reference".into(), Object::Array(vec![Object::Dictionary(reference)]));
    }
    sig
}

/// Serialized signature dictionary with the placeholders first, so the
/// first `/ByteRange` and `/Contents` keys after the object header are
/// always ours.
fn signature_body(
    doc: &PdfDocument,
    sig_ref: ObjectRef,
    metadata: &SignatureMetadata,
    calculator: &ByteRangeCalculator,
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut entries = Object::Dictionary(signature_dictionary(metadata, now));
    if let Some(handler) = doc.encryption() {
        entries = handler.encrypt_object(entries, sig_ref)?;
    }
    let serialized = ObjectSerializer::compact().serialize(&entries);
    let rest = serialized
        .strip_prefix(b"<<")
        .ok_or_else(|| Error::Internal("signature dictionary did not serialize as a dictionary".to_string()))?;

    let mut body = Vec::with_capacity(serialized.len() + calculator.placeholder_size() + 64);
    body.extend_from_slice(b"<</ByteRange ");
    body.extend_from_slice(BYTE_RANGE_PLACEHOLDER.as_bytes());
    body.extend_from_slice(b" /Contents ");
    body.extend_from_slice(calculator.generate_placeholder().as_bytes());
    body.push(b' ');
    body.extend_from_slice(rest);
    Ok(body)
}

/// Append the revision holding the signature dictionary, the widget and
/// the form and page updates. Returns the bytes and the offset of the
/// signature dictionary.
fn write_signature_revision(
    doc: &PdfDocument,
    metadata: &SignatureMetadata,
    placement: &Placement<'_>,
    calculator: &ByteRangeCalculator,
    now: DateTime<Utc>,
) -> Result<(Vec<u8>, usize)> {
    let mut writer = IncrementalWriter::new(doc);
    let sig_ref = writer.allocate();
    let widget_ref = writer.allocate();
    writer.put_raw(sig_ref, signature_body(doc, sig_ref, metadata, calculator, now)?);

    let rect = &placement.rect;
    let mut widget = dict(vec![
        ("Type", Object::name("Annot")),
        ("Subtype", Object::name("Widget")),
        ("FT", Object::name("Sig")),
        ("T", Object::text(&metadata.field_name)),
        ("V", Object::Reference(sig_ref)),
        ("F", Object::Integer(WIDGET_FLAGS)),
        ("P", Object::Reference(placement.page_ref)),
    ]);
    match placement.appearance.render(rect, placement.caption, &mut writer)? {
        Some(stream) => {
            let ap_ref = writer.add(stream);
            widget.insert("Rect".into(), rect.to_object());
            widget.insert("AP".into(), Object::Dictionary(dict(vec![("N", Object::Reference(ap_ref))])));
        },
        None => {
            widget.insert("Rect".into(), Object::Array(vec![Object::Integer(0); 4]));
        },
    }
    writer.update(widget_ref, Object::Dictionary(widget));

    let mut page = doc
        .resolve_dict(&Object::Reference(placement.page_ref))?
        .ok_or_else(|| Error::InvalidPdf(format!("page {} is not a dictionary", placement.page_ref)))?;
    match page.get("Annots").cloned() {
        Some(Object::Reference(annots_ref)) => {
            let mut annots = doc.resolve(&Object::Reference(annots_ref))?.as_array().cloned().unwrap_or_default();
            annots.push(Object::Reference(widget_ref));
            writer.update(annots_ref, Object::Array(annots));
        },
        other => {
            let mut annots = other.and_then(|a| a.as_array().cloned()).unwrap_or_default();
            annots.push(Object::Reference(widget_ref));
            page.insert("Annots".into(), Object::Array(annots));
        },
    }
    writer.update(placement.page_ref, Object::Dictionary(page));

    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;
    match catalog.get("AcroForm").cloned() {
        Some(Object::Reference(form_ref)) => {
            let mut form = doc.resolve_dict(&Object::Reference(form_ref))?.unwrap_or_default();
            register_field(doc, &mut form, widget_ref)?;
            writer.update(form_ref, Object::Dictionary(form));
        },
        other => {
            let mut form = match other {
                Some(Object::Dictionary(d)) => d,
                _ => Dict::new(),
            };
            register_field(doc, &mut form, widget_ref)?;
            catalog.insert("AcroForm".into(), Object::Dictionary(form));
        },
    }
    if metadata.is_certification() {
        catalog.insert(
            "Perms".into(),
            Object::Dictionary(dict(vec![("DocMDP", Object::Reference(sig_ref))])),
        );
    }
    writer.update(catalog_ref, Object::Dictionary(catalog));

    let update = writer.write()?;
    let sig_offset = update
        .body_offset(sig_ref)
        .ok_or_else(|| Error::Internal("signature dictionary was not written".to_string()))?;
    Ok((update.data, sig_offset))
}

/// Append `field_ref` to the form's `/Fields` and set `/SigFlags`.
fn register_field(doc: &PdfDocument, form: &mut Dict, field_ref: ObjectRef) -> Result<()> {
    let mut fields = match form.get("Fields") {
        Some(fields) => doc.resolve(fields)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };
    fields.push(Object::Reference(field_ref));
    form.insert("Fields".into(), Object::Array(fields));
    let flags = form.get_int("SigFlags").unwrap_or(0) | SIG_FLAGS;
    form.insert("SigFlags".into(), Object::Integer(flags));
    Ok(())
}
