//! Cleartext file envelopes and payload recovery.
//!
//! Each format opens with a cleartext envelope describing the file: its
//! declared length, the application version that wrote it, how much of the
//! payload that follows is encrypted, and the library's timezone offset and
//! modification date. The payload itself is one zlib stream whose first
//! `min(file_len - header_len, max_crypt_len)` bytes are AES-encrypted.
//!
//! Neither format carries a checksum. The only integrity signals a wrong
//! key produces are a zlib stream that will not inflate or a cleartext that
//! does not open with the expected payload magic; both are reported as
//! [`Error::DecryptionKeyInvalid`] with no partial result.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::chunk::Tag;
use crate::crypto::{self, KEY_LEN};
use crate::error::{Error, Result};
use crate::library::SourceFormat;

/// Seconds between 1904-01-01 (the formats' native epoch) and 1970-01-01.
pub const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert a native timestamp to Unix-epoch seconds. Zero means absent.
pub fn mac_to_unix(secs_since_1904: u32, tz_offset_secs: i32) -> Option<i64> {
    if secs_since_1904 == 0 {
        return None;
    }
    Some(i64::from(secs_since_1904) + i64::from(tz_offset_secs) - MAC_EPOCH_OFFSET)
}

/// Envelope fields shared by both formats. Parsing the format-specific
/// layouts lives with the drivers; this is what they all produce.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub format: SourceFormat,
    pub header_len: u32,
    pub file_len: u32,
    /// Declared upper bound on the encrypted payload prefix.
    pub max_crypt_len: u32,
    /// Timezone offset in seconds applied to every timestamp in the file.
    pub tz_offset: i32,
    /// Library modification date, seconds since 1904.
    pub modified_mac: u32,
    pub application_version: String,
}

impl Envelope {
    /// Effective encrypted-region length: the whole payload, capped by the
    /// envelope's declared maximum.
    pub fn crypt_len(&self) -> usize {
        self.file_len
            .saturating_sub(self.header_len)
            .min(self.max_crypt_len) as usize
    }

    pub fn modified_epoch(&self) -> Option<i64> {
        mac_to_unix(self.modified_mac, self.tz_offset)
    }
}

/// Decrypt and inflate the chunk payload that follows the envelope, and
/// require it to open with `payload_magic`.
pub(crate) fn recover_payload(
    data: &[u8],
    envelope: &Envelope,
    key: Option<&[u8; KEY_LEN]>,
    payload_magic: &[u8; 4],
) -> Result<Vec<u8>> {
    let header_len = envelope.header_len as usize;
    let crypt_len = envelope.crypt_len();

    let decrypted;
    let cleartext: &[u8] = if crypt_len == 0 {
        data
    } else {
        let key = key.ok_or(Error::KeyRequired)?;
        decrypted = crypto::decrypt_region(data, key, header_len, crypt_len);
        &decrypted
    };

    let mut payload = Vec::new();
    let mut inflater = ZlibDecoder::new(&cleartext[header_len..]);
    inflater
        .read_to_end(&mut payload)
        .map_err(|err| Error::DecryptionKeyInvalid {
            format: envelope.format,
            reason: format!("payload would not inflate: {err}"),
        })?;

    if payload.len() < 4 || &payload[..4] != payload_magic {
        let found = if payload.len() >= 4 {
            Tag([payload[0], payload[1], payload[2], payload[3]]).to_string()
        } else {
            format!("a {}-byte payload", payload.len())
        };
        return Err(Error::DecryptionKeyInvalid {
            format: envelope.format,
            reason: format!(
                "payload opens with {found} instead of {}",
                Tag(*payload_magic)
            ),
        });
    }
    Ok(payload)
}
