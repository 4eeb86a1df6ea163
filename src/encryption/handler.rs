//! Per-object encryption and decryption.

use super::algorithms::{self, PasswordKind};
use super::{aes, rc4, Algorithm, EncryptDict};
use crate::error::{Error, Result};
use crate::object::{Dict, DictExt, Object, ObjectRef};
use md5::{Digest, Md5};

/// Encryption state of one document.
#[derive(Debug, Clone)]
pub struct EncryptionHandler {
    dict: EncryptDict,
    file_id: Vec<u8>,
    key: Option<Vec<u8>>,
    authenticated_as: Option<PasswordKind>,
    stream_algorithm: Algorithm,
    string_algorithm: Algorithm,
}

impl EncryptionHandler {
    /// Create a handler from the `/Encrypt` dictionary and the first `/ID` element.
    pub fn new(encrypt_obj: &Object, file_id: Vec<u8>) -> Result<Self> {
        let dict = EncryptDict::from_object(encrypt_obj)?;
        let stream_algorithm = dict.stream_algorithm()?;
        let string_algorithm = dict.string_algorithm()?;
        log::debug!(
            "document encrypted: V={} R={} streams={:?} strings={:?}",
            dict.version,
            dict.revision,
            stream_algorithm,
            string_algorithm
        );
        Ok(Self {
            dict,
            file_id,
            key: None,
            authenticated_as: None,
            stream_algorithm,
            string_algorithm,
        })
    }

    /// Try a password as user password, then as owner password.
    pub fn authenticate(&mut self, password: &[u8]) -> Result<bool> {
        match algorithms::authenticate(password, &self.dict, &self.file_id)? {
            Some((key, kind)) => {
                log::debug!("authenticated with {:?} password", kind);
                self.key = Some(key);
                self.authenticated_as = Some(kind);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Whether a password has been accepted.
    pub fn is_authenticated(&self) -> bool {
        self.key.is_some()
    }

    /// Which password was accepted, if any.
    pub fn authenticated_as(&self) -> Option<PasswordKind> {
        self.authenticated_as
    }

    /// Whether XMP metadata streams are encrypted.
    pub fn encrypts_metadata(&self) -> bool {
        self.dict.encrypt_metadata
    }

    fn file_key(&self) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or_else(|| Error::Encryption("document key not available before authentication".into()))
    }

    fn object_key(&self, algorithm: Algorithm, obj: ObjectRef) -> Result<Vec<u8>> {
        let key = self.file_key()?;
        if algorithm == Algorithm::Aes256 {
            return Ok(key.to_vec());
        }
        let mut hasher = Md5::new();
        hasher.update(key);
        hasher.update(&obj.id.to_le_bytes()[..3]);
        hasher.update(&(obj.gen as u32).to_le_bytes()[..2]);
        if algorithm.is_aes() {
            hasher.update(b"sAlT");
        }
        let hash = hasher.finalize();
        Ok(hash[..(key.len() + 5).min(16)].to_vec())
    }

    fn crypt(&self, algorithm: Algorithm, data: &[u8], obj: ObjectRef, encrypt: bool) -> Result<Vec<u8>> {
        match algorithm {
            Algorithm::Identity => Ok(data.to_vec()),
            Algorithm::Rc4 => Ok(rc4::rc4_crypt(&self.object_key(algorithm, obj)?, data)),
            Algorithm::Aes128 | Algorithm::Aes256 => {
                let key = self.object_key(algorithm, obj)?;
                if encrypt {
                    aes::encrypt_object_data(&key, data)
                } else {
                    aes::decrypt_object_data(&key, data)
                }
            },
        }
    }

    /// Decrypt every string and the stream body of a loaded object.
    pub fn decrypt_object(&self, object: Object, obj: ObjectRef) -> Result<Object> {
        self.transform(object, obj, false)
    }

    /// Encrypt every string and the stream body of an object about to be written.
    pub fn encrypt_object(&self, object: Object, obj: ObjectRef) -> Result<Object> {
        self.transform(object, obj, true)
    }

    fn transform(&self, object: Object, obj: ObjectRef, encrypt: bool) -> Result<Object> {
        match object {
            Object::Stream { dict, data } => {
                if !self.stream_is_encrypted(&dict) {
                    return Ok(Object::Stream { dict, data });
                }
                let dict = self.transform_dict(dict, obj, encrypt)?;
                let data = self.crypt(self.stream_algorithm, &data, obj, encrypt)?;
                Ok(Object::Stream {
                    dict,
                    data: bytes::Bytes::from(data),
                })
            },
            other => self.transform_value(other, obj, encrypt),
        }
    }

    fn transform_value(&self, object: Object, obj: ObjectRef, encrypt: bool) -> Result<Object> {
        Ok(match object {
            Object::String(s) => Object::String(self.crypt(self.string_algorithm, &s, obj, encrypt)?),
            Object::Array(items) => Object::Array(
                items
                    .into_iter()
                    .map(|item| self.transform_value(item, obj, encrypt))
                    .collect::<Result<_>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.transform_dict(dict, obj, encrypt)?),
            other => other,
        })
    }

    fn transform_dict(&self, dict: Dict, obj: ObjectRef, encrypt: bool) -> Result<Dict> {
        let is_signature = is_signature_dict(&dict);
        dict.into_iter()
            .map(|(key, value)| {
                // signature /Contents are stored in the clear
                if is_signature && key == "Contents" {
                    return Ok((key, value));
                }
                Ok((key, self.transform_value(value, obj, encrypt)?))
            })
            .collect()
    }

    fn stream_is_encrypted(&self, dict: &Dict) -> bool {
        if dict.is_type("XRef") {
            return false;
        }
        if dict.is_type("Metadata") && !self.encrypts_metadata() {
            return false;
        }
        true
    }
}

/// Signature and document timestamp dictionaries, identified by their byte range.
pub fn is_signature_dict(dict: &Dict) -> bool {
    dict.contains_key("ByteRange")
        && dict.contains_key("Contents")
        && matches!(dict.get_name("Type"), None | Some("Sig") | Some("DocTimeStamp"))
}
