//! Document Security Store (PAdES long-term validation material).
//!
//! Certificates and CRLs gathered while signing are written to the
//! catalog's `/DSS` dictionary in a separate incremental revision, after
//! the signature revision, so the signature's byte range is unaffected.

use super::certificate::Certificate;
use super::revocation::Crl;
use crate::decoders::deflate;
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::{dict, IncrementalWriter};

/// Certificates and CRLs stored in a DSS.
#[derive(Debug, Clone, Default)]
pub struct ValidationMaterial {
    /// Certificates, deduplicated
    pub certificates: Vec<Certificate>,
    /// CRLs, deduplicated
    pub crls: Vec<Crl>,
}

impl ValidationMaterial {
    /// Add a certificate unless already present.
    pub fn add_certificate(&mut self, cert: &Certificate) {
        if !self.certificates.contains(cert) {
            self.certificates.push(cert.clone());
        }
    }

    /// Add a CRL unless already present.
    pub fn add_crl(&mut self, crl: &Crl) {
        if !self.crls.iter().any(|known| known.der() == crl.der()) {
            self.crls.push(crl.clone());
        }
    }

    /// Nothing to store.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.crls.is_empty()
    }
}

/// Read the DSS of `doc`. Entries that fail to decode are skipped.
pub fn read_dss(doc: &PdfDocument) -> Result<ValidationMaterial> {
    let mut material = ValidationMaterial::default();
    let Some(dss) = dss_dict(doc)? else {
        return Ok(material);
    };
    for data in stream_entries(doc, &dss, "Certs")? {
        match Certificate::from_der(&data) {
            Ok(cert) => material.add_certificate(&cert),
            Err(e) => log::warn!("skipping DSS certificate: {}", e),
        }
    }
    for data in stream_entries(doc, &dss, "CRLs")? {
        match Crl::from_der(&data) {
            Ok(crl) => material.add_crl(&crl),
            Err(e) => log::warn!("skipping DSS CRL: {}", e),
        }
    }
    Ok(material)
}

fn dss_dict(doc: &PdfDocument) -> Result<Option<Dict>> {
    match doc.catalog()?.get("DSS") {
        Some(dss) => doc.resolve_dict(dss),
        None => Ok(None),
    }
}

fn stream_entries(doc: &PdfDocument, dss: &Dict, key: &str) -> Result<Vec<Vec<u8>>> {
    let Some(entries) = dss.get(key) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for entry in doc.resolve(entries)?.as_array().map(Vec::as_slice).unwrap_or_default() {
        let stream = doc.resolve(entry)?;
        if stream.is_stream() {
            out.push(stream.decode_stream_data()?);
        }
    }
    Ok(out)
}

fn entry_refs(dss: &Dict, key: &str) -> Vec<ObjectRef> {
    dss.get(key)
        .and_then(Object::as_array)
        .map(|items| items.iter().filter_map(Object::as_reference).collect())
        .unwrap_or_default()
}

fn der_stream(der: &[u8]) -> Result<Object> {
    Ok(Object::Stream {
        dict: dict(vec![("Filter", Object::name("FlateDecode"))]),
        data: bytes::Bytes::from(deflate(der)?),
    })
}

/// Append a revision adding `material` to the DSS of `doc`.
///
/// Existing DSS entries are kept; material already stored is not added twice.
/// `doc` must be authenticated when encrypted.
pub fn append_dss(doc: &PdfDocument, material: &ValidationMaterial) -> Result<Vec<u8>> {
    let existing = read_dss(doc)?;
    let existing_dss = dss_dict(doc)?;
    let mut writer = IncrementalWriter::new(doc);

    let mut cert_refs: Vec<Object> = existing_dss
        .as_ref()
        .map(|d| entry_refs(d, "Certs"))
        .unwrap_or_default()
        .into_iter()
        .map(Object::Reference)
        .collect();
    for cert in material.certificates.iter().filter(|c| !existing.certificates.contains(c)) {
        cert_refs.push(Object::Reference(writer.add(der_stream(cert.der())?)));
    }

    let mut crl_refs: Vec<Object> = existing_dss
        .as_ref()
        .map(|d| entry_refs(d, "CRLs"))
        .unwrap_or_default()
        .into_iter()
        .map(Object::Reference)
        .collect();
    for crl in material
        .crls
        .iter()
        .filter(|c| !existing.crls.iter().any(|known| known.der() == c.der()))
    {
        crl_refs.push(Object::Reference(writer.add(der_stream(crl.der())?)));
    }

    let mut dss = existing_dss.unwrap_or_default();
    dss.insert("Type".into(), Object::name("DSS"));
    if !cert_refs.is_empty() {
        dss.insert("Certs".into(), Object::Array(cert_refs));
    }
    if !crl_refs.is_empty() {
        dss.insert("CRLs".into(), Object::Array(crl_refs));
    }
    let dss_ref = writer.add(Object::Dictionary(dss));

    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;
    catalog.insert("DSS".into(), Object::Reference(dss_ref));
    let mut extensions = match catalog.get("Extensions") {
        Some(ext) => doc.resolve_dict(ext)?.unwrap_or_default(),
        None => Dict::new(),
    };
    extensions.insert(
        "ESIC".into(),
        Object::Dictionary(dict(vec![
            ("BaseVersion", Object::name("1.7")),
            ("ExtensionLevel", Object::Integer(5)),
        ])),
    );
    catalog.insert("Extensions".into(), Object::Dictionary(extensions));
    writer.update(catalog_ref, Object::Dictionary(catalog));

    log::debug!(
        "DSS revision: {} certificate(s), {} CRL(s)",
        material.certificates.len(),
        material.crls.len()
    );
    Ok(writer.write()?.data)
}
