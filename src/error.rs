//! Error types for ituneslib

use thiserror::Error;

use crate::chunk::Tag;
use crate::library::SourceFormat;

#[derive(Error, Debug)]
pub enum Error {
    /// A read reached past the end of the buffer or of a declared scope.
    #[error("input truncated at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The buffer starts with neither known envelope magic.
    #[error("unrecognized library format (magic {magic:?})")]
    UnrecognizedFormat { magic: [u8; 4] },

    /// The cleartext envelope failed validation.
    #[error("invalid {format} envelope: {reason}")]
    InvalidEnvelope { format: SourceFormat, reason: String },

    /// The envelope declares an encrypted region but no key was configured.
    #[error("a decryption key is required for this file but none was configured")]
    KeyRequired,

    /// The payload did not survive decryption: either the zlib stream would
    /// not inflate or the cleartext does not start with the format's magic.
    /// There is no checksum in either format, so this is the only integrity
    /// signal a wrong key produces.
    #[error("decryption key rejected for {format} payload: {reason}")]
    DecryptionKeyInvalid { format: SourceFormat, reason: String },

    /// A chunk header declares lengths inconsistent with its enclosing scope.
    /// Fatal for that scope; drivers catch it at record boundaries and skip
    /// just the affected record.
    #[error(
        "malformed chunk '{tag}' at offset {offset} \
         (header_len={header_len}, total_len={total_len}): {reason}"
    )]
    MalformedChunk {
        tag: Tag,
        offset: usize,
        header_len: u32,
        total_len: u32,
        reason: String,
    },

    /// Two tracks with the same id but different content.
    #[error("conflicting track data under duplicate track id {id}")]
    DuplicateTrackId { id: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
