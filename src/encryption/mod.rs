//! Standard security handler support.
//!
//! Encrypted documents can be opened with either the user or the owner
//! password. RC4 (40/128-bit), AES-128 (`AESV2`) and AES-256 (`AESV3`,
//! revisions 5 and 6) are supported. The same handler encrypts objects
//! appended by an incremental update so the new revision stays readable
//! with the document's existing key.

use crate::error::{Error, Result};
use crate::object::{DictExt, Object};

mod aes;
pub mod algorithms;
mod handler;
mod rc4;

pub use algorithms::PasswordKind;
pub use handler::EncryptionHandler;

/// Cipher used for strings or streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Data is stored in the clear (`/Identity` crypt filter)
    Identity,
    /// RC4 with a per-object key
    Rc4,
    /// AES-128-CBC with a per-object key
    Aes128,
    /// AES-256-CBC with the file key
    Aes256,
}

impl Algorithm {
    /// Whether the per-object key derivation appends `sAlT`.
    pub fn is_aes(&self) -> bool {
        matches!(self, Algorithm::Aes128 | Algorithm::Aes256)
    }
}

/// Parsed `/Encrypt` dictionary of the standard security handler.
#[derive(Debug, Clone)]
pub struct EncryptDict {
    /// Security handler name; only `Standard` is supported
    pub filter: String,
    /// `/V` algorithm version
    pub version: u32,
    /// `/R` revision
    pub revision: u32,
    /// `/Length` in bits
    pub length_bits: Option<u32>,
    /// `/O`
    pub owner_value: Vec<u8>,
    /// `/U`
    pub user_value: Vec<u8>,
    /// `/P`
    pub permissions: i32,
    /// `/EncryptMetadata`
    pub encrypt_metadata: bool,
    /// `/OE` (revision 5+)
    pub owner_key: Option<Vec<u8>>,
    /// `/UE` (revision 5+)
    pub user_key: Option<Vec<u8>>,
    /// `/CFM` of the crypt filter named by `/StmF`
    pub stream_filter: Option<String>,
    /// `/CFM` of the crypt filter named by `/StrF`
    pub string_filter: Option<String>,
}

impl EncryptDict {
    /// Parse an encryption dictionary.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let dict = obj
            .as_dict()
            .ok_or_else(|| Error::Encryption("/Encrypt is not a dictionary".into()))?;
        let missing = |key: &str| Error::Encryption(format!("/Encrypt is missing /{}", key));
        let bytes = |key: &str| dict.get(key).and_then(Object::as_string).map(<[u8]>::to_vec);

        let filter = dict.get_name("Filter").ok_or_else(|| missing("Filter"))?.to_string();
        if filter != "Standard" {
            return Err(Error::Unsupported(format!("security handler /{}", filter)));
        }

        let crypt_method = |selector: &str| -> Option<String> {
            let filter_name = dict.get_name(selector)?;
            if filter_name == "Identity" {
                return Some("None".into());
            }
            dict.get("CF")
                .and_then(Object::as_dict)
                .and_then(|cf| cf.get(filter_name))
                .and_then(Object::as_dict)
                .and_then(|f| f.get_name("CFM"))
                .map(str::to_string)
        };

        Ok(Self {
            filter,
            version: dict.get_int("V").unwrap_or(0).max(0) as u32,
            revision: dict.get_int("R").ok_or_else(|| missing("R"))?.max(0) as u32,
            length_bits: dict.get_int("Length").map(|l| l.max(0) as u32),
            owner_value: bytes("O").ok_or_else(|| missing("O"))?,
            user_value: bytes("U").ok_or_else(|| missing("U"))?,
            permissions: dict.get_int("P").ok_or_else(|| missing("P"))? as i32,
            encrypt_metadata: dict.get("EncryptMetadata").and_then(Object::as_bool).unwrap_or(true),
            owner_key: bytes("OE"),
            user_key: bytes("UE"),
            stream_filter: crypt_method("StmF"),
            string_filter: crypt_method("StrF"),
        })
    }

    /// Key length in bytes for revisions 2-4.
    pub fn key_length_bytes(&self) -> usize {
        match (self.version, self.length_bits) {
            (1, _) => 5,
            (_, Some(bits)) if bits >= 40 => (bits / 8) as usize,
            (5, _) => 32,
            _ => 16,
        }
    }

    fn method(&self, crypt_filter: Option<&str>) -> Result<Algorithm> {
        match self.version {
            1 | 2 | 3 => Ok(Algorithm::Rc4),
            4 | 5 => match crypt_filter {
                Some("None") => Ok(Algorithm::Identity),
                Some("V2") => Ok(Algorithm::Rc4),
                Some("AESV2") => Ok(Algorithm::Aes128),
                Some("AESV3") => Ok(Algorithm::Aes256),
                None if self.version == 5 => Ok(Algorithm::Aes256),
                None => Ok(Algorithm::Identity),
                Some(other) => Err(Error::Unsupported(format!("crypt filter method {}", other))),
            },
            v => Err(Error::Unsupported(format!("encryption version V={}", v))),
        }
    }

    /// Cipher for stream data.
    pub fn stream_algorithm(&self) -> Result<Algorithm> {
        self.method(self.stream_filter.as_deref())
    }

    /// Cipher for strings.
    pub fn string_algorithm(&self) -> Result<Algorithm> {
        self.method(self.string_filter.as_deref())
    }
}
