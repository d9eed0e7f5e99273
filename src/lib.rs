//! ituneslib: read-only decoders for Apple music-library databases
//!
//! This crate decodes two proprietary binary formats into one
//! application-independent [`Library`] value:
//! - `iTunes Library.itl` (legacy iTunes) - `hdfm` envelope, big-endian
//! - `Library.musicdb` (Music.app / iTunes 12.2+) - `hfma` envelope, little-endian
//!
//! Both formats share the same outer construction: a cleartext envelope, an
//! AES-128/ECB encrypted prefix of the payload, and a zlib-compressed fourcc
//! chunk tree underneath. They diverge in chunk vocabulary and field encoding.
//!
//! The crate performs no I/O: callers hand over a fully materialized byte
//! buffer plus the 16-byte decryption key (provisioned out-of-band) and get
//! back a [`Library`] together with decode [`Diagnostics`]. Neither format is
//! ever written back out.
//!
//! Based on Gary Vollink's reverse engineering:
//! https://home.vollink.com/gary/playlister/

pub mod chunk;
pub mod crypto;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod itl;
pub mod library;
pub mod musicdb;

mod assemble;
mod string;

#[cfg(test)]
mod fixtures;

pub use error::{Error, Result};
pub use library::{
    DanglingReference, DecodeOutput, Diagnostics, Library, Playlist, PlaylistEntry, RecordKind,
    SkippedRecord, SourceFormat, Track,
};

use cursor::ByteCursor;

/// Caller-supplied decode configuration.
///
/// The key is required whenever the envelope declares a non-empty encrypted
/// region; decoding an encrypted file without one fails with
/// [`Error::KeyRequired`] before any parsing happens.
#[derive(Debug, Clone, Default)]
pub struct DecodeConfig {
    /// AES-128 key for the encrypted payload prefix.
    pub key: Option<[u8; crypto::KEY_LEN]>,
}

/// Identify which library format a buffer holds, if any.
///
/// Only the cleartext envelope magic is inspected; no decryption is needed.
pub fn detect(data: &[u8]) -> Option<SourceFormat> {
    let magic = data.get(..4)?;
    if magic == itl::ENVELOPE_MAGIC {
        Some(SourceFormat::Itl)
    } else if magic == musicdb::ENVELOPE_MAGIC {
        Some(SourceFormat::MusicDb)
    } else {
        None
    }
}

/// Decode a library file of either format, sniffing the envelope magic.
pub fn decode(data: &[u8], config: &DecodeConfig) -> Result<DecodeOutput> {
    let magic = ByteCursor::new(data).peek_bytes(4)?;
    if magic == itl::ENVELOPE_MAGIC {
        itl::decode(data, config)
    } else if magic == musicdb::ENVELOPE_MAGIC {
        musicdb::decode(data, config)
    } else {
        Err(Error::UnrecognizedFormat {
            magic: [magic[0], magic[1], magic[2], magic[3]],
        })
    }
}
