//! Generic fourcc chunk-tree reader.
//!
//! Both payload formats are built from self-describing chunks: a 4-byte tag,
//! a little-endian header length, and a little-endian total length, followed
//! by tag-specific header fields up to `header_len` and a body up to
//! `total_len`. Whether a body holds flat record data or a nested sequence
//! of further chunks is tag-dependent knowledge owned by the format drivers,
//! so nested decoding happens lazily through [`Chunk::children`].
//!
//! The reader knows chunk shape, not tag meaning: unknown tags decode like
//! any other chunk and the driver decides what to do with them.

use std::fmt;

use byteorder::LittleEndian;

use crate::cursor::ByteCursor;
use crate::error::{Error, Result};

/// Fixed chunk header fields: tag + header_len + total_len.
pub const MIN_HEADER_LEN: u32 = 12;

/// Nesting bound; neither format comes close, so deeper input is malformed
/// rather than a legitimate tree.
pub const MAX_DEPTH: u8 = 16;

/// Four-byte chunk tag, compared by exact byte equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(\"{self}\")")
    }
}

/// A decoded chunk: a borrowed, zero-copy view into the payload buffer.
///
/// Chunks are transient; everything that outlives the decode pass is copied
/// into the output model by the drivers.
#[derive(Clone, Copy)]
pub struct Chunk<'a> {
    pub tag: Tag,
    pub header_len: u32,
    pub total_len: u32,
    /// Absolute offset of the chunk within the decoded payload.
    pub offset: usize,
    depth: u8,
    extra: &'a [u8],
    body: &'a [u8],
}

impl<'a> Chunk<'a> {
    pub fn is(&self, tag: &[u8; 4]) -> bool {
        &self.tag.0 == tag
    }

    /// Tag-specific header fields between the fixed fields and
    /// `header_len`, exposed unevaluated.
    pub fn extra(&self) -> &'a [u8] {
        self.extra
    }

    /// Bytes from `header_len` to `total_len`.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Decode the body as a nested chunk sequence.
    pub fn children(&self) -> Result<ChunkIter<'a>> {
        if self.depth >= MAX_DEPTH {
            return Err(self.malformed("chunk nesting deeper than either format produces"));
        }
        Ok(ChunkIter {
            buf: self.body,
            base: self.offset + self.header_len as usize,
            pos: 0,
            depth: self.depth + 1,
            zero_padding: false,
            done: false,
        })
    }

    /// Build a `MalformedChunk` error carrying this chunk's raw header
    /// fields, for drivers rejecting chunk contents.
    pub fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedChunk {
            tag: self.tag,
            offset: self.offset,
            header_len: self.header_len,
            total_len: self.total_len,
            reason: reason.into(),
        }
    }
}

/// Lazy iterator over the chunks of one scope.
///
/// The scope's byte budget is fixed up front and never grows: a chunk whose
/// declared `total_len` overruns the remaining budget is malformed. The
/// iterator fuses after the first error.
pub struct ChunkIter<'a> {
    buf: &'a [u8],
    base: usize,
    pos: usize,
    depth: u8,
    zero_padding: bool,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    /// Iterate the top-level chunks of a payload. `base` is the absolute
    /// offset of `buf`, used for error reporting.
    pub fn new(buf: &'a [u8], base: usize) -> Self {
        Self {
            buf,
            base,
            pos: 0,
            depth: 0,
            zero_padding: false,
            done: false,
        }
    }

    /// Treat an all-zero scope remainder as padding instead of a malformed
    /// trailing fragment. Real libraries carry such slack in a few list
    /// scopes; whether a given scope may is driver knowledge.
    pub fn tolerate_zero_padding(mut self) -> Self {
        self.zero_padding = true;
        self
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk<'a>>> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        if self.zero_padding && rest.iter().all(|&b| b == 0) {
            self.pos = self.buf.len();
            return Ok(None);
        }

        let offset = self.base + self.pos;
        if rest.len() < MIN_HEADER_LEN as usize {
            let mut tag = [0u8; 4];
            let head = rest.len().min(4);
            tag[..head].copy_from_slice(&rest[..head]);
            return Err(Error::MalformedChunk {
                tag: Tag(tag),
                offset,
                header_len: 0,
                total_len: 0,
                reason: format!(
                    "trailing {}-byte fragment is too small for a chunk header",
                    rest.len()
                ),
            });
        }

        let mut cur = ByteCursor::with_origin(rest, offset);
        let tag = Tag(cur.read_tag()?);
        let header_len = cur.read_u32::<LittleEndian>()?;
        let total_len = cur.read_u32::<LittleEndian>()?;

        if header_len < MIN_HEADER_LEN || total_len < header_len || total_len as usize > rest.len()
        {
            return Err(Error::MalformedChunk {
                tag,
                offset,
                header_len,
                total_len,
                reason: format!("inconsistent declared lengths ({} bytes left in scope)", rest.len()),
            });
        }

        let chunk = Chunk {
            tag,
            header_len,
            total_len,
            offset,
            depth: self.depth,
            extra: &rest[MIN_HEADER_LEN as usize..header_len as usize],
            body: &rest[header_len as usize..total_len as usize],
        };
        self.pos += total_len as usize;
        Ok(Some(chunk))
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<Chunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
