//! Standard security handler password algorithms.
//!
//! Revisions 2-4 derive the file key from the padded password with MD5 and
//! verify it against `/U` (RC4). Owner passwords are checked by recovering
//! the user password from `/O`. Revisions 5 and 6 use SHA-2 based hashes
//! and unwrap the file key from `/UE` or `/OE`.

use super::aes::{cbc_decrypt_raw, cbc_encrypt_raw};
use super::rc4::rc4_crypt;
use super::EncryptDict;
use crate::error::Result;
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

/// Password padding string.
pub const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Which password matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    /// The user (open) password
    User,
    /// The owner (permissions) password
    Owner,
}

/// Pad or truncate a password to 32 bytes.
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut out = PADDING;
    let len = password.len().min(32);
    out[..len].copy_from_slice(&password[..len]);
    out[len..].copy_from_slice(&PADDING[..32 - len]);
    out
}

/// File key from a user password (revisions 2-4).
pub fn compute_file_key(
    password: &[u8],
    owner_value: &[u8],
    permissions: i32,
    file_id: &[u8],
    revision: u32,
    key_length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(&owner_value[..owner_value.len().min(32)]);
    hasher.update(permissions.to_le_bytes());
    hasher.update(file_id);
    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF; 4]);
    }
    let mut hash = hasher.finalize().to_vec();
    let n = if revision == 2 { 5 } else { key_length.clamp(5, 16) };
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

/// `/U` value for a file key (revisions 2-4). The last 16 bytes are zero for R3+.
pub fn compute_user_value(file_key: &[u8], file_id: &[u8], revision: u32) -> Vec<u8> {
    if revision == 2 {
        return rc4_crypt(file_key, &PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let mut value = hasher.finalize().to_vec();
    for i in 0..20u8 {
        value = rc4_crypt(&xor_key(file_key, i), &value);
    }
    value.extend_from_slice(&[0u8; 16]);
    value
}

/// `/O` value for an owner/user password pair (revisions 2-4).
pub fn compute_owner_value(
    owner_password: &[u8],
    user_password: &[u8],
    revision: u32,
    key_length: usize,
) -> Vec<u8> {
    let owner = if owner_password.is_empty() { user_password } else { owner_password };
    let rc4_key = owner_rc4_key(owner, revision, key_length);
    let mut value = rc4_crypt(&rc4_key, &pad_password(user_password));
    if revision >= 3 {
        for i in 1..=19u8 {
            value = rc4_crypt(&xor_key(&rc4_key, i), &value);
        }
    }
    value
}

fn owner_rc4_key(owner_password: &[u8], revision: u32, key_length: usize) -> Vec<u8> {
    let n = if revision == 2 { 5 } else { key_length.clamp(5, 16) };
    let mut hash = Md5::digest(pad_password(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

fn xor_key(key: &[u8], value: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ value).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn check_user_legacy(password: &[u8], dict: &EncryptDict, file_id: &[u8]) -> Option<Vec<u8>> {
    let key = compute_file_key(
        password,
        &dict.owner_value,
        dict.permissions,
        file_id,
        dict.revision,
        dict.key_length_bytes(),
        dict.encrypt_metadata,
    );
    let expected = compute_user_value(&key, file_id, dict.revision);
    let compared = if dict.revision == 2 { 32 } else { 16 };
    if dict.user_value.len() >= compared
        && constant_time_eq(&expected[..compared], &dict.user_value[..compared])
    {
        Some(key)
    } else {
        None
    }
}

fn check_owner_legacy(password: &[u8], dict: &EncryptDict, file_id: &[u8]) -> Option<Vec<u8>> {
    let rc4_key = owner_rc4_key(password, dict.revision, dict.key_length_bytes());
    let mut user_password = dict.owner_value.get(..32)?.to_vec();
    if dict.revision == 2 {
        user_password = rc4_crypt(&rc4_key, &user_password);
    } else {
        for i in (0..20u8).rev() {
            user_password = rc4_crypt(&xor_key(&rc4_key, i), &user_password);
        }
    }
    check_user_legacy(&user_password, dict, file_id)
}

/// Revision 5/6 password hash (Algorithm 2.B for R6, plain SHA-256 for R5).
pub fn hash_v5(password: &[u8], salt: &[u8], user_data: &[u8], revision: u32) -> Result<[u8; 32]> {
    let password = &password[..password.len().min(127)];
    let mut k = {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        hasher.update(user_data);
        hasher.finalize().to_vec()
    };

    if revision >= 6 {
        let mut round = 0u32;
        loop {
            let mut block = Vec::with_capacity(64 * (password.len() + k.len() + user_data.len()));
            for _ in 0..64 {
                block.extend_from_slice(password);
                block.extend_from_slice(&k);
                block.extend_from_slice(user_data);
            }
            let e = cbc_encrypt_raw(&k[..16], &k[16..32], &block)?;
            let selector = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
            k = match selector {
                0 => Sha256::digest(&e).to_vec(),
                1 => Sha384::digest(&e).to_vec(),
                _ => Sha512::digest(&e).to_vec(),
            };
            round += 1;
            let last = e.last().copied().unwrap_or(0) as u32;
            if round >= 64 && last + 32 <= round {
                break;
            }
        }
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&k[..32]);
    Ok(out)
}

fn check_user_v5(password: &[u8], dict: &EncryptDict) -> Result<Option<Vec<u8>>> {
    let u = &dict.user_value;
    let Some(ue) = dict.user_key.as_deref() else {
        return Ok(None);
    };
    if u.len() < 48 {
        return Ok(None);
    }
    let check = hash_v5(password, &u[32..40], &[], dict.revision)?;
    if !constant_time_eq(&check, &u[..32]) {
        return Ok(None);
    }
    let wrap = hash_v5(password, &u[40..48], &[], dict.revision)?;
    Ok(Some(cbc_decrypt_raw(&wrap, &[0u8; 16], ue)?))
}

fn check_owner_v5(password: &[u8], dict: &EncryptDict) -> Result<Option<Vec<u8>>> {
    let o = &dict.owner_value;
    let u = &dict.user_value;
    let Some(oe) = dict.owner_key.as_deref() else {
        return Ok(None);
    };
    if o.len() < 48 || u.len() < 48 {
        return Ok(None);
    }
    let check = hash_v5(password, &o[32..40], &u[..48], dict.revision)?;
    if !constant_time_eq(&check, &o[..32]) {
        return Ok(None);
    }
    let wrap = hash_v5(password, &o[40..48], &u[..48], dict.revision)?;
    Ok(Some(cbc_decrypt_raw(&wrap, &[0u8; 16], oe)?))
}

/// Try `password` as user password, then as owner password.
pub fn authenticate(
    password: &[u8],
    dict: &EncryptDict,
    file_id: &[u8],
) -> Result<Option<(Vec<u8>, PasswordKind)>> {
    if dict.revision >= 5 {
        if let Some(key) = check_user_v5(password, dict)? {
            return Ok(Some((key, PasswordKind::User)));
        }
        return Ok(check_owner_v5(password, dict)?.map(|key| (key, PasswordKind::Owner)));
    }
    if let Some(key) = check_user_legacy(password, dict, file_id) {
        return Ok(Some((key, PasswordKind::User)));
    }
    Ok(check_owner_legacy(password, dict, file_id).map(|key| (key, PasswordKind::Owner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_ID: &[u8] = b"0123456789abcdef";

    fn legacy_dict(user: &[u8], owner: &[u8], revision: u32, key_len: usize) -> EncryptDict {
        let owner_value = compute_owner_value(owner, user, revision, key_len);
        let key = compute_file_key(user, &owner_value, -4, FILE_ID, revision, key_len, true);
        EncryptDict {
            filter: "Standard".into(),
            version: if revision == 2 { 1 } else { 2 },
            revision,
            length_bits: Some(key_len as u32 * 8),
            owner_value,
            user_value: compute_user_value(&key, FILE_ID, revision),
            permissions: -4,
            encrypt_metadata: true,
            owner_key: None,
            user_key: None,
            stream_filter: None,
            string_filter: None,
        }
    }

    #[test]
    fn test_pad_password() {
        let padded = pad_password(b"test");
        assert_eq!(&padded[..4], b"test");
        assert_eq!(&padded[4..], &PADDING[..28]);
        assert_eq!(pad_password(&[1u8; 40]), [1u8; 32]);
    }

    #[test]
    fn test_r2_user_and_owner() {
        let dict = legacy_dict(b"user", b"owner", 2, 5);
        let (key, kind) = authenticate(b"user", &dict, FILE_ID).unwrap().unwrap();
        assert_eq!(kind, PasswordKind::User);
        assert_eq!(key.len(), 5);
        let (owner_key, kind) = authenticate(b"owner", &dict, FILE_ID).unwrap().unwrap();
        assert_eq!(kind, PasswordKind::Owner);
        assert_eq!(owner_key, key);
        assert!(authenticate(b"nope", &dict, FILE_ID).unwrap().is_none());
    }

    #[test]
    fn test_r3_empty_user_password() {
        let dict = legacy_dict(b"", b"owner", 3, 16);
        let (_, kind) = authenticate(b"", &dict, FILE_ID).unwrap().unwrap();
        assert_eq!(kind, PasswordKind::User);
        assert_eq!(authenticate(b"owner", &dict, FILE_ID).unwrap().unwrap().1, PasswordKind::Owner);
    }

    #[test]
    fn test_r6_user_and_owner() {
        let file_key = [0x5Au8; 32];
        let (u_salt_v, u_salt_k) = ([1u8; 8], [2u8; 8]);
        let (o_salt_v, o_salt_k) = ([3u8; 8], [4u8; 8]);

        let mut u = hash_v5(b"pw", &u_salt_v, &[], 6).unwrap().to_vec();
        u.extend_from_slice(&u_salt_v);
        u.extend_from_slice(&u_salt_k);
        let ue = cbc_encrypt_raw(&hash_v5(b"pw", &u_salt_k, &[], 6).unwrap(), &[0u8; 16], &file_key)
            .unwrap();

        let mut o = hash_v5(b"boss", &o_salt_v, &u, 6).unwrap().to_vec();
        o.extend_from_slice(&o_salt_v);
        o.extend_from_slice(&o_salt_k);
        let oe = cbc_encrypt_raw(&hash_v5(b"boss", &o_salt_k, &u, 6).unwrap(), &[0u8; 16], &file_key)
            .unwrap();

        let dict = EncryptDict {
            filter: "Standard".into(),
            version: 5,
            revision: 6,
            length_bits: Some(256),
            owner_value: o,
            user_value: u,
            permissions: -4,
            encrypt_metadata: true,
            owner_key: Some(oe),
            user_key: Some(ue),
            stream_filter: Some("AESV3".into()),
            string_filter: Some("AESV3".into()),
        };

        let (key, kind) = authenticate(b"pw", &dict, &[]).unwrap().unwrap();
        assert_eq!((key.as_slice(), kind), (&file_key[..], PasswordKind::User));
        let (key, kind) = authenticate(b"boss", &dict, &[]).unwrap().unwrap();
        assert_eq!((key.as_slice(), kind), (&file_key[..], PasswordKind::Owner));
        assert!(authenticate(b"wrong", &dict, &[]).unwrap().is_none());
    }
}
