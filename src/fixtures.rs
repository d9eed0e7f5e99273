//! Synthetic library files for tests.
//!
//! Real `.itl` and `.musicdb` files are personal data and megabytes large,
//! so the tests build miniature but structurally faithful files instead:
//! hand-assembled chunk trees sealed behind the same zlib + AES-128/ECB +
//! envelope construction the desktop applications write.

use std::io::Write;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::crypto::{BLOCK_LEN, KEY_LEN};

pub(crate) const TEST_KEY: [u8; KEY_LEN] = *b"sixteen test key";

/// Build one chunk: tag, declared lengths, header extension, body.
pub(crate) fn chunk(tag: &[u8; 4], extra: &[u8], body: &[u8]) -> Vec<u8> {
    let header_len = 12 + extra.len() as u32;
    let total_len = header_len + body.len() as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(tag);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());
    out.extend_from_slice(extra);
    out.extend_from_slice(body);
    out
}

pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Mirror of [`crate::crypto::decrypt_region`], encrypting side: whole
/// 16-byte blocks only, a trailing partial block stays cleartext.
fn encrypt_region(data: &mut [u8], key: &[u8; KEY_LEN], start: usize, len: usize) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let end = start.saturating_add(len).min(data.len());
    let mut offset = start;
    while offset + BLOCK_LEN <= end {
        cipher.encrypt_block(GenericArray::from_mut_slice(
            &mut data[offset..offset + BLOCK_LEN],
        ));
        offset += BLOCK_LEN;
    }
}

/// Wrap a cleartext chunk payload in an itl file: big-endian `hdfm`
/// envelope, zlib-compressed payload, optionally AES-encrypted prefix.
///
/// Envelope constants match what the itl driver parses: version "12.9.5.5",
/// zero timezone offset, library modified at 3_600_000_000 Mac seconds.
pub(crate) fn seal_itl(payload: &[u8], key: Option<&[u8; KEY_LEN]>, max_crypt: u32) -> Vec<u8> {
    const HEADER_LEN: usize = 116;
    let compressed = deflate(payload);
    let file_len = (HEADER_LEN + compressed.len()) as u32;

    let mut file = vec![0u8; HEADER_LEN];
    file[..4].copy_from_slice(b"hdfm");
    file[4..8].copy_from_slice(&(HEADER_LEN as u32).to_be_bytes());
    file[8..12].copy_from_slice(&file_len.to_be_bytes());
    let version = b"12.9.5.5";
    file[16] = version.len() as u8;
    file[17..17 + version.len()].copy_from_slice(version);
    file[92..96].copy_from_slice(&max_crypt.to_be_bytes());
    // tz offset at 100 stays zero
    file[112..116].copy_from_slice(&3_600_000_000u32.to_be_bytes());
    file.extend_from_slice(&compressed);

    if let Some(key) = key {
        let crypt_len = compressed.len().min(max_crypt as usize);
        encrypt_region(&mut file, key, HEADER_LEN, crypt_len);
    }
    file
}

/// Wrap a cleartext chunk payload in a musicdb file: little-endian `hfma`
/// envelope, otherwise the same construction as [`seal_itl`].
pub(crate) fn seal_musicdb(payload: &[u8], key: Option<&[u8; KEY_LEN]>, max_crypt: u32) -> Vec<u8> {
    const HEADER_LEN: usize = 104;
    let compressed = deflate(payload);
    let file_len = (HEADER_LEN + compressed.len()) as u32;

    let mut file = vec![0u8; HEADER_LEN];
    file[..4].copy_from_slice(b"hfma");
    file[4..8].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
    file[8..12].copy_from_slice(&file_len.to_le_bytes());
    let version = b"1.0.6.10";
    file[16..16 + version.len()].copy_from_slice(version);
    file[84..88].copy_from_slice(&max_crypt.to_le_bytes());
    // tz offset at 88 stays zero
    file[100..104].copy_from_slice(&3_600_000_000u32.to_le_bytes());
    file.extend_from_slice(&compressed);

    if let Some(key) = key {
        let crypt_len = compressed.len().min(max_crypt as usize);
        encrypt_region(&mut file, key, HEADER_LEN, crypt_len);
    }
    file
}
