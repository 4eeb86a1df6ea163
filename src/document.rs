//! PDF document model.
//!
//! A [`PdfDocument`] keeps the complete file in memory: signing appends to
//! the original bytes and verification hashes byte ranges of them, so the
//! raw data must stay available unchanged.

use crate::encryption::EncryptionHandler;
use crate::error::{Error, Result};
use crate::object::{Dict, DictExt, Object, ObjectRef};
use crate::objstm::ObjectStream;
use crate::parser::parse_indirect_object;
use crate::xref::{CrossReference, XrefEntry};
use std::collections::HashSet;
use std::path::Path;

/// Maximum depth when walking the page and field trees.
const MAX_TREE_DEPTH: usize = 64;

/// A terminal form field.
#[derive(Debug, Clone)]
pub struct FormField {
    /// The field (or merged field/widget) object
    pub obj_ref: ObjectRef,
    /// Fully qualified name (`parent.child`)
    pub full_name: String,
    /// Field type, inherited from ancestors when absent
    pub field_type: Option<String>,
    /// The field dictionary
    pub dict: Dict,
}

/// PDF document.
///
/// ```no_run
/// use pades_oxide::document::PdfDocument;
///
/// let mut doc = PdfDocument::open("contract.pdf")?;
/// if doc.is_encrypted() && !doc.authenticate(b"secret")? {
///     eprintln!("wrong password");
/// }
/// println!("{} pages", doc.page_refs()?.len());
/// # Ok::<(), pades_oxide::error::Error>(())
/// ```
#[derive(Debug)]
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    xref: CrossReference,
    encryption: Option<EncryptionHandler>,
    encrypt_ref: Option<ObjectRef>,
}

impl PdfDocument {
    /// Read and parse a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a document held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let version = parse_header(&data)?;
        let xref = crate::xref::load(&data)?;

        let mut doc = Self {
            data,
            version,
            xref,
            encryption: None,
            encrypt_ref: None,
        };

        if let Some(encrypt) = doc.xref.trailer.get("Encrypt").cloned() {
            doc.encrypt_ref = encrypt.as_reference();
            let encrypt_dict = match encrypt {
                Object::Reference(r) => doc.load_raw(r)?,
                other => other,
            };
            let file_id = doc.file_id().map(|(first, _)| first).unwrap_or_default();
            doc.encryption = Some(EncryptionHandler::new(&encrypt_dict, file_id)?);
        }

        log::debug!(
            "opened PDF {}.{}: {} xref entries, encrypted={}",
            version.0,
            version.1,
            doc.xref.len(),
            doc.encryption.is_some()
        );
        Ok(doc)
    }

    /// Raw file bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the document, returning its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Cross-reference information.
    pub fn xref(&self) -> &CrossReference {
        &self.xref
    }

    /// Trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &Dict {
        &self.xref.trailer
    }

    /// Whether the document has an `/Encrypt` dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Encryption handler, if the document is encrypted.
    pub fn encryption(&self) -> Option<&EncryptionHandler> {
        self.encryption.as_ref()
    }

    /// Reference of the `/Encrypt` dictionary when stored indirectly.
    pub fn encrypt_ref(&self) -> Option<ObjectRef> {
        self.encrypt_ref
    }

    /// Unlock the document. Unencrypted documents accept any password.
    pub fn authenticate(&mut self, password: &[u8]) -> Result<bool> {
        match self.encryption.as_mut() {
            None => Ok(true),
            Some(handler) => handler.authenticate(password),
        }
    }

    /// Both `/ID` elements.
    pub fn file_id(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let ids = self.xref.trailer.get("ID")?.as_array()?;
        let first = ids.first()?.as_string()?.to_vec();
        let second = ids.get(1).and_then(Object::as_string).map(<[u8]>::to_vec).unwrap_or_else(|| first.clone());
        Some((first, second))
    }

    /// Load an object without decrypting it.
    fn load_raw(&self, obj_ref: ObjectRef) -> Result<Object> {
        match self.xref.get(obj_ref.id) {
            Some(XrefEntry::InUse { offset, gen }) => {
                if gen != obj_ref.gen {
                    log::debug!("{} requested but xref holds generation {}", obj_ref, gen);
                    return Ok(Object::Null);
                }
                let body = self
                    .data
                    .get(offset..)
                    .ok_or_else(|| Error::InvalidXref(format!("{} points past EOF", obj_ref)))?;
                let resolve_length = |r: ObjectRef| self.load_length(r);
                let (found, object) = parse_indirect_object(body, offset, &resolve_length)?;
                if found.id != obj_ref.id {
                    return Err(Error::InvalidXref(format!(
                        "xref for {} points at object {}",
                        obj_ref, found
                    )));
                }
                Ok(object)
            },
            Some(XrefEntry::Compressed { stream_id, index }) => {
                let container = self.get_object(ObjectRef::new(stream_id, 0))?;
                let (dict, decoded) = match &container {
                    Object::Stream { dict, .. } => (dict, container.decode_stream_data()?),
                    _ => {
                        return Err(Error::InvalidPdf(format!(
                            "object stream {} is not a stream",
                            stream_id
                        )))
                    },
                };
                ObjectStream::parse(dict, decoded)?.get(index, obj_ref.id)
            },
            Some(XrefEntry::Free) | None => Ok(Object::Null),
        }
    }

    fn load_length(&self, obj_ref: ObjectRef) -> Option<i64> {
        match self.xref.get(obj_ref.id)? {
            XrefEntry::InUse { offset, .. } => {
                let (_, obj) = parse_indirect_object(self.data.get(offset..)?, offset, &|_| None).ok()?;
                obj.as_integer()
            },
            XrefEntry::Compressed { .. } => self.load_raw(obj_ref).ok()?.as_integer(),
            XrefEntry::Free => None,
        }
    }

    /// Load an indirect object, decrypting it when needed.
    ///
    /// Missing and free objects resolve to `Null`.
    pub fn get_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let object = self.load_raw(obj_ref)?;
        let compressed = matches!(self.xref.get(obj_ref.id), Some(XrefEntry::Compressed { .. }));
        match &self.encryption {
            Some(handler) if !compressed && Some(obj_ref) != self.encrypt_ref => {
                if !handler.is_authenticated() {
                    return Err(Error::DecryptionFailed);
                }
                handler.decrypt_object(object, obj_ref)
            },
            _ => Ok(object),
        }
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, object: &Object) -> Result<Object> {
        let mut current = object.clone();
        for _ in 0..32 {
            match current {
                Object::Reference(r) => current = self.get_object(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::RecursionLimitExceeded(32))
    }

    /// Resolve an object expected to be a dictionary.
    pub fn resolve_dict(&self, object: &Object) -> Result<Option<Dict>> {
        Ok(match self.resolve(object)? {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        })
    }

    /// Reference of the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.xref
            .trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer /Root is not a reference".into()))
    }

    /// The document catalog.
    pub fn catalog(&self) -> Result<Dict> {
        let root = self.catalog_ref()?;
        match self.get_object(root)? {
            Object::Dictionary(d) => Ok(d),
            other => Err(Error::InvalidPdf(format!("catalog is a {}", other.type_name()))),
        }
    }

    /// Page objects in document order.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".into()))?;
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        self.collect_pages(root, 0, &mut seen, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node_ref: ObjectRef,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        pages: &mut Vec<ObjectRef>,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_TREE_DEPTH as u32));
        }
        if !seen.insert(node_ref) {
            log::warn!("page tree cycle at {}", node_ref);
            return Ok(());
        }
        let node = match self.get_object(node_ref)? {
            Object::Dictionary(d) => d,
            _ => return Ok(()),
        };
        match node.get("Kids") {
            Some(kids) if !node.is_type("Page") => {
                let kids = self.resolve(kids)?;
                for kid in kids.as_array().map(Vec::as_slice).unwrap_or_default() {
                    if let Some(kid_ref) = kid.as_reference() {
                        self.collect_pages(kid_ref, depth + 1, seen, pages)?;
                    }
                }
            },
            _ => pages.push(node_ref),
        }
        Ok(())
    }

    /// The interactive form dictionary, if any.
    pub fn acroform(&self) -> Result<Option<Dict>> {
        match self.catalog()?.get("AcroForm") {
            Some(form) => self.resolve_dict(form),
            None => Ok(None),
        }
    }

    /// All terminal form fields.
    pub fn form_fields(&self) -> Result<Vec<FormField>> {
        let Some(form) = self.acroform()? else {
            return Ok(Vec::new());
        };
        let roots = match form.get("Fields") {
            Some(fields) => self.resolve(fields)?,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for field in roots.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(r) = field.as_reference() {
                self.collect_fields(r, "", None, 0, &mut seen, &mut out)?;
            }
        }
        Ok(out)
    }

    fn collect_fields(
        &self,
        field_ref: ObjectRef,
        parent_name: &str,
        inherited_type: Option<&str>,
        depth: usize,
        seen: &mut HashSet<ObjectRef>,
        out: &mut Vec<FormField>,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH || !seen.insert(field_ref) {
            return Ok(());
        }
        let Some(dict) = self.resolve_dict(&Object::Reference(field_ref))? else {
            return Ok(());
        };
        let partial = dict.get("T").and_then(Object::as_text);
        let full_name = match (&partial, parent_name.is_empty()) {
            (Some(p), true) => p.clone(),
            (Some(p), false) => format!("{}.{}", parent_name, p),
            (None, _) => parent_name.to_string(),
        };
        let field_type = dict.get_name("FT").or(inherited_type).map(str::to_string);

        let kids: Vec<ObjectRef> = match dict.get("Kids") {
            Some(kids) => self
                .resolve(kids)?
                .as_array()
                .map(|items| items.iter().filter_map(Object::as_reference).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let field_kids: Vec<ObjectRef> = kids
            .into_iter()
            .filter(|kid| {
                self.get_object(*kid)
                    .ok()
                    .and_then(|k| k.as_dict().map(|d| d.contains_key("T")))
                    .unwrap_or(false)
            })
            .collect();

        if field_kids.is_empty() {
            out.push(FormField {
                obj_ref: field_ref,
                full_name,
                field_type,
                dict,
            });
        } else {
            for kid in field_kids {
                self.collect_fields(kid, &full_name, field_type.as_deref(), depth + 1, seen, out)?;
            }
        }
        Ok(())
    }
}

/// Parse the `%PDF-x.y` header, which may be preceded by junk in the first kilobyte.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window.windows(5).position(|w| w == b"%PDF-").ok_or(Error::InvalidHeader)?;
    let version = &window[pos + 5..];
    let digit = |i: usize| version.get(i).filter(|c| c.is_ascii_digit()).map(|c| c - b'0');
    match (digit(0), version.get(1), digit(2)) {
        (Some(major), Some(b'.'), Some(minor)) => Ok((major, minor)),
        _ => Err(Error::InvalidHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(b"%PDF-1.7\n").unwrap(), (1, 7));
        assert_eq!(parse_header(b"junk\n%PDF-2.0\n").unwrap(), (2, 0));
        assert!(parse_header(b"GIF89a").is_err());
    }
}
