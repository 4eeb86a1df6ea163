//! Incremental updates.
//!
//! An incremental update appends new and replaced objects after the
//! original `%%EOF`, followed by a cross-reference section that points
//! back at the previous one through `/Prev`. The original bytes are never
//! touched, which is what keeps earlier signatures valid.
//!
//! The new section uses the same format as the newest existing one: a
//! classic `xref` table, or a `/Type /XRef` stream.

use super::object_serializer::{dict, ObjectSerializer};
use crate::decoders::deflate;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::xref::XrefFormat;
use std::collections::BTreeMap;
use std::io::Write;

/// Trailer entries carried over to every new section.
const INHERITED_TRAILER_KEYS: [&str; 4] = ["Root", "Info", "Encrypt", "ID"];

#[derive(Debug, Clone)]
enum Pending {
    /// Serialized (and encrypted when required) at write time
    Object(Object),
    /// Body bytes written verbatim between `obj` and `endobj`
    Raw(Vec<u8>),
}

/// Result of [`IncrementalWriter::write`].
#[derive(Debug, Clone)]
pub struct IncrementalUpdate {
    /// Original bytes followed by the update.
    pub data: Vec<u8>,
    /// Offset of each written object's `N G obj` line.
    pub offsets: BTreeMap<ObjectRef, usize>,
    /// Offset of the new cross-reference section.
    pub startxref: usize,
}

impl IncrementalUpdate {
    /// Offset of the body of an object (the byte after `obj\n`).
    pub fn body_offset(&self, obj_ref: ObjectRef) -> Option<usize> {
        let start = *self.offsets.get(&obj_ref)?;
        let header = format!("{} {} obj\n", obj_ref.id, obj_ref.gen);
        Some(start + header.len())
    }
}

/// Collects objects for one incremental revision of a document.
pub struct IncrementalWriter<'a> {
    doc: &'a PdfDocument,
    next_id: u32,
    objects: BTreeMap<ObjectRef, Pending>,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalWriter<'a> {
    /// Start a revision on top of `doc`.
    pub fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            next_id: doc.xref().next_object_id(),
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let obj_ref = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        obj_ref
    }

    /// Add a new object, returning its reference.
    pub fn add(&mut self, object: Object) -> ObjectRef {
        let obj_ref = self.allocate();
        self.objects.insert(obj_ref, Pending::Object(object));
        obj_ref
    }

    /// Write `object` under an existing or previously allocated reference.
    pub fn update(&mut self, obj_ref: ObjectRef, object: Object) {
        self.objects.insert(obj_ref, Pending::Object(object));
    }

    /// Write pre-serialized body bytes under `obj_ref`.
    ///
    /// The caller is responsible for encrypting any strings in the body.
    pub fn put_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.objects.insert(obj_ref, Pending::Raw(body));
    }

    /// Objects queued so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize one object as it will appear in the file.
    fn body(&self, obj_ref: ObjectRef, pending: &Pending) -> Result<Vec<u8>> {
        match pending {
            Pending::Raw(body) => Ok(body.clone()),
            Pending::Object(object) => {
                let object = match self.doc.encryption() {
                    Some(handler) => handler.encrypt_object(object.clone(), obj_ref)?,
                    None => object.clone(),
                };
                Ok(self.serializer.serialize(&object))
            },
        }
    }

    /// Append the revision to the document bytes.
    pub fn write(mut self) -> Result<IncrementalUpdate> {
        let base = self.doc.data();
        let mut out = Vec::with_capacity(base.len() + 16 * 1024);
        out.extend_from_slice(base);
        if !matches!(base.last(), Some(b'\n') | Some(b'\r')) {
            out.push(b'\n');
        }

        let format = if self.doc.xref().reconstructed {
            XrefFormat::Table
        } else {
            self.doc.xref().format
        };
        let xref_stream_ref = match format {
            XrefFormat::Stream => Some(self.allocate()),
            XrefFormat::Table => None,
        };

        let mut offsets = BTreeMap::new();
        for (&obj_ref, pending) in &self.objects {
            let body = self.body(obj_ref, pending)?;
            offsets.insert(obj_ref, out.len());
            write!(out, "{} {} obj\n", obj_ref.id, obj_ref.gen)?;
            out.extend_from_slice(&body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let trailer = self.trailer();
        let startxref = out.len();
        match xref_stream_ref {
            None => {
                out.extend_from_slice(&xref_table(&offsets));
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&self.serializer.serialize(&Object::Dictionary(trailer)));
                out.push(b'\n');
            },
            Some(stream_ref) => {
                let mut all = offsets.clone();
                all.insert(stream_ref, startxref);
                let stream = xref_stream(&all, trailer)?;
                out.extend_from_slice(&self.serializer.serialize_indirect(stream_ref, &stream));
                offsets.insert(stream_ref, startxref);
            },
        }
        write!(out, "startxref\n{}\n%%EOF\n", startxref)?;

        log::debug!(
            "incremental update: {} objects, {:?} xref at {}",
            offsets.len(),
            format,
            startxref
        );
        Ok(IncrementalUpdate {
            data: out,
            offsets,
            startxref,
        })
    }

    fn trailer(&self) -> Dict {
        let source = self.doc.trailer();
        let mut trailer: Dict = INHERITED_TRAILER_KEYS
            .iter()
            .filter_map(|&k| source.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        trailer.insert("Size".into(), Object::Integer(self.next_id as i64));
        if !self.doc.xref().reconstructed {
            trailer.insert("Prev".into(), Object::Integer(self.doc.xref().startxref as i64));
        }
        trailer
    }
}

/// Group sorted object numbers into contiguous runs.
fn subsections(offsets: &BTreeMap<ObjectRef, usize>) -> Vec<(u32, Vec<(ObjectRef, usize)>)> {
    let mut runs: Vec<(u32, Vec<(ObjectRef, usize)>)> = Vec::new();
    for (&obj_ref, &offset) in offsets {
        match runs.last_mut() {
            Some((start, entries)) if *start + entries.len() as u32 == obj_ref.id => {
                entries.push((obj_ref, offset))
            },
            _ => runs.push((obj_ref.id, vec![(obj_ref, offset)])),
        }
    }
    runs
}

fn xref_table(offsets: &BTreeMap<ObjectRef, usize>) -> Vec<u8> {
    let mut out = b"xref\n".to_vec();
    for (start, entries) in subsections(offsets) {
        out.extend_from_slice(format!("{} {}\n", start, entries.len()).as_bytes());
        for (obj_ref, offset) in entries {
            // each entry is exactly 20 bytes
            out.extend_from_slice(format!("{:010} {:05} n\r\n", offset, obj_ref.gen).as_bytes());
        }
    }
    out
}

fn xref_stream(offsets: &BTreeMap<ObjectRef, usize>, mut trailer: Dict) -> Result<Object> {
    let max_offset = offsets.values().copied().max().unwrap_or(0);
    let offset_width = match max_offset {
        0..=0xFFFF_FFFF => 4,
        _ => 8,
    };

    let mut index = Vec::new();
    let mut rows = Vec::new();
    for (start, entries) in subsections(offsets) {
        index.push(Object::Integer(start as i64));
        index.push(Object::Integer(entries.len() as i64));
        for (obj_ref, offset) in entries {
            rows.push(1u8);
            rows.extend_from_slice(&(offset as u64).to_be_bytes()[8 - offset_width..]);
            rows.extend_from_slice(&obj_ref.gen.to_be_bytes());
        }
    }

    let data = deflate(&rows)?;
    trailer.extend(dict(vec![
        ("Type", Object::name("XRef")),
        (
            "W",
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(offset_width as i64),
                Object::Integer(2),
            ]),
        ),
        ("Index", Object::Array(index)),
        ("Filter", Object::name("FlateDecode")),
    ]));
    if !trailer.contains_key("Root") {
        return Err(Error::InvalidPdf("cannot write xref stream without /Root".into()));
    }
    Ok(Object::Stream {
        dict: trailer,
        data: bytes::Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DictExt;

    const BASE: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n";

    fn base_pdf() -> Vec<u8> {
        let mut data = BASE.to_vec();
        let xref_at = data.len();
        data.extend_from_slice(b"xref\n0 3\n0000000000 65535 f\r\n0000000009 00000 n\r\n");
        data.extend_from_slice(b"0000000058 00000 n\r\n");
        data.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
        data.extend_from_slice(format!("startxref\n{}\n%%EOF", xref_at).as_bytes());
        data
    }

    #[test]
    fn test_subsections_split_on_gaps() {
        let mut offsets = BTreeMap::new();
        for id in [3, 4, 5, 9, 10] {
            offsets.insert(ObjectRef::new(id, 0), id as usize * 100);
        }
        let runs = subsections(&offsets);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].0, runs[0].1.len()), (3, 3));
        assert_eq!((runs[1].0, runs[1].1.len()), (9, 2));
    }

    #[test]
    fn test_append_preserves_original_and_links_prev() {
        let original = base_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();
        let prev = doc.xref().startxref;

        let mut writer = IncrementalWriter::new(&doc);
        let added = writer.add(Object::text("hello"));
        assert_eq!(added, ObjectRef::new(3, 0));
        let update = writer.write().unwrap();

        assert!(update.data.starts_with(&original));
        let reopened = PdfDocument::from_bytes(update.data.clone()).unwrap();
        assert_eq!(reopened.trailer().get_int("Prev"), Some(prev as i64));
        assert_eq!(reopened.trailer().get_int("Size"), Some(4));
        assert_eq!(reopened.get_object(added).unwrap(), Object::text("hello"));
        assert!(reopened.catalog().is_ok());
    }

    #[test]
    fn test_table_entries_are_twenty_bytes() {
        let mut offsets = BTreeMap::new();
        offsets.insert(ObjectRef::new(7, 0), 1234);
        let table = xref_table(&offsets);
        assert_eq!(table, b"xref\n7 1\n0000001234 00000 n\r\n");
    }
}
