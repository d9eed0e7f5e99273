//! Text decoding for chunk string payloads.
//!
//! Each driver declares the character encoding of every string attribute it
//! understands in a table built once at construction; encodings are never
//! inferred from the bytes. Ill-formed input decodes lossily (U+FFFD), the
//! same tolerance the desktop applications show toward their own files.

use std::collections::HashMap;

use byteorder::LittleEndian;
use encoding_rs::{UTF_16LE, UTF_8};

use crate::chunk::Chunk;
use crate::cursor::ByteCursor;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextEncoding {
    Utf8,
    Utf16Le,
}

/// Decode a string payload with a declared encoding.
pub(crate) fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    let (text, _, _) = match encoding {
        TextEncoding::Utf8 => UTF_8.decode(bytes),
        TextEncoding::Utf16Le => UTF_16LE.decode(bytes),
    };
    text.into_owned()
}

/// Semantic destination of a decoded string attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StringField {
    Title,
    Album,
    Artist,
    AlbumArtist,
    Genre,
    Location,
    PlaylistName,
}

/// Subtype -> string-extractor table shared by both drivers' generic
/// attribute containers (`mhoh` / `boma`).
///
/// The container's u32 subtype sits at the start of its header extension;
/// the body is the encoded string. Subtypes absent from the table are
/// dropped without error so version-specific attributes never break a
/// decode.
pub(crate) struct AttributeTable {
    map: HashMap<u32, (StringField, TextEncoding)>,
}

impl AttributeTable {
    pub(crate) fn new(entries: &[(u32, StringField, TextEncoding)]) -> Self {
        let map = entries
            .iter()
            .map(|&(subtype, field, encoding)| (subtype, (field, encoding)))
            .collect();
        Self { map }
    }

    /// Apply the table to one attribute chunk. `Ok(None)` means the subtype
    /// is not in the table; a missing subtype field is a malformed chunk.
    pub(crate) fn extract(&self, chunk: &Chunk<'_>) -> Result<Option<(StringField, String)>> {
        let subtype = ByteCursor::with_origin(chunk.extra(), chunk.offset + 12)
            .read_u32::<LittleEndian>()
            .map_err(|_| chunk.malformed("attribute extension is missing its subtype"))?;
        let Some(&(field, encoding)) = self.map.get(&subtype) else {
            return Ok(None);
        };
        Ok(Some((field, decode_text(chunk.body(), encoding))))
    }
}
