//! AES-128/ECB decryption of the payload prefix.
//!
//! Both library formats encrypt a fixed-size prefix of the compressed
//! payload with AES-128 in ECB mode: every 16-byte block is inverted
//! independently with the same key, no chaining and no IV. A trailing
//! partial block inside the region is stored as cleartext and must pass
//! through untouched.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// Cipher block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Decrypt `region_len` bytes starting at `region_start`.
///
/// Returns a fresh buffer of the same length with the region replaced by
/// cleartext and everything outside it copied verbatim; the input buffer is
/// left untouched so callers can still diagnose against the original bytes.
/// The key is passed explicitly per call, so one process can decode files
/// keyed differently without any shared state.
pub fn decrypt_region(
    data: &[u8],
    key: &[u8; KEY_LEN],
    region_start: usize,
    region_len: usize,
) -> Vec<u8> {
    let mut out = data.to_vec();
    let end = region_start.saturating_add(region_len).min(out.len());
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut offset = region_start;
    while offset + BLOCK_LEN <= end {
        cipher.decrypt_block(GenericArray::from_mut_slice(
            &mut out[offset..offset + BLOCK_LEN],
        ));
        offset += BLOCK_LEN;
    }
    out
}
