//! Format driver for the legacy `iTunes Library.itl` database.
//!
//! The itl envelope is big-endian; the chunk payload underneath is
//! little-endian like everything musicdb writes. Payload vocabulary:
//! - `msdh`: top-level section wrapper, block type in the header extension
//! - `mlth` / `mith`: master track list and track records
//! - `mlph` / `miph` / `mtph`: playlist list, playlist records, memberships
//! - `mhoh`: generic string attribute container, keyed by a u32 subtype
//!
//! Field offsets match libraries written by iTunes 12.x as documented at
//! https://home.vollink.com/gary/playlister/ituneslib.html

use std::io::Cursor;

use binrw::BinRead;
use byteorder::{BigEndian, LittleEndian};
use tracing::debug;

use crate::assemble::LibraryAssembler;
use crate::chunk::{Chunk, ChunkIter};
use crate::cursor::ByteCursor;
use crate::envelope::{self, mac_to_unix, Envelope};
use crate::error::{Error, Result};
use crate::library::{DecodeOutput, Playlist, PlaylistEntry, RecordKind, SourceFormat, Track};
use crate::string::{AttributeTable, StringField, TextEncoding};
use crate::DecodeConfig;

pub(crate) const ENVELOPE_MAGIC: &[u8; 4] = b"hdfm";
const PAYLOAD_MAGIC: &[u8; 4] = b"msdh";

/// Envelope fields run through offset 115 (modification date at 112).
const MIN_ENVELOPE_LEN: u32 = 116;

const MSDH_TAG: &[u8; 4] = b"msdh";
const MLTH_TAG: &[u8; 4] = b"mlth";
const MITH_TAG: &[u8; 4] = b"mith";
const MHOH_TAG: &[u8; 4] = b"mhoh";
const MLPH_TAG: &[u8; 4] = b"mlph";
const MIPH_TAG: &[u8; 4] = b"miph";
const MTPH_TAG: &[u8; 4] = b"mtph";

/// `msdh` block types.
const BLOCK_TRACKS: u32 = 1;
const BLOCK_PLAYLISTS: u32 = 2;
const BLOCK_LIBRARY_LOCATION: u32 = 4;
const BLOCK_ALBUMS: u32 = 9;
const BLOCK_ARTISTS: u32 = 11;
const BLOCK_LIBRARY_INFO: u32 = 12;

/// `mhoh` string attribute subtypes.
const ATTR_TITLE: u32 = 0x02;
const ATTR_ALBUM: u32 = 0x03;
const ATTR_ARTIST: u32 = 0x04;
const ATTR_GENRE: u32 = 0x05;
const ATTR_LOCATION: u32 = 0x0b;
const ATTR_ALBUM_ARTIST: u32 = 0x1b;
const ATTR_PLAYLIST_NAME: u32 = 0x64;

/// Fixed numeric fields of a `mith` header extension.
#[derive(BinRead)]
#[br(little)]
struct TrackHeader {
    track_id: u32,
    date_added: u32,
    date_modified: u32,
    duration_ms: u32,
    file_size: u64,
    track_number: u16,
    disc_number: u16,
    play_count: u32,
    rating: u8,
    #[br(pad_before = 3)]
    persistent_id: u64,
    date_last_played: u32,
}

/// Fixed fields of a `miph` header extension.
#[derive(BinRead)]
#[br(little)]
struct PlaylistHeader {
    playlist_id: u32,
    /// The persistent id and distinguished-kind fields sit between the id
    /// and the flags; neither feeds the output model.
    #[br(pad_before = 10)]
    folder_flag: u8,
    #[br(pad_before = 1)]
    date_created: u32,
}

struct ItlDriver {
    attrs: AttributeTable,
    tz_offset: i32,
}

/// Decode an `iTunes Library.itl` buffer.
pub fn decode(data: &[u8], config: &DecodeConfig) -> Result<DecodeOutput> {
    let envelope = parse_envelope(data)?;
    let payload = envelope::recover_payload(data, &envelope, config.key.as_ref(), PAYLOAD_MAGIC)?;

    let driver = ItlDriver::new(envelope.tz_offset);
    let mut assembler = LibraryAssembler::new(
        SourceFormat::Itl,
        envelope.application_version.clone(),
        envelope.modified_epoch(),
    );

    for section in ChunkIter::new(&payload, 0).tolerate_zero_padding() {
        let section = section?;
        if section.is(MSDH_TAG) {
            driver.read_section(&section, &mut assembler)?;
        } else {
            assembler.record_ignored_tag(section.tag);
        }
    }
    Ok(assembler.finish())
}

fn parse_envelope(data: &[u8]) -> Result<Envelope> {
    let mut cur = ByteCursor::new(data);
    let magic = cur.read_tag()?;
    if &magic != ENVELOPE_MAGIC {
        return Err(Error::UnrecognizedFormat { magic });
    }
    let header_len = cur.read_u32::<BigEndian>()?;
    let file_len = cur.read_u32::<BigEndian>()?;
    cur.skip(4)?; // reserved
    let application_version = String::from_utf8_lossy(cur.read_len_prefixed_u8()?).into_owned();

    if file_len as usize != data.len() {
        return Err(invalid_envelope(format!(
            "declared file length {} does not match the {}-byte buffer",
            file_len,
            data.len()
        )));
    }
    if header_len < MIN_ENVELOPE_LEN || header_len > file_len {
        return Err(invalid_envelope(format!(
            "envelope length {header_len} out of range"
        )));
    }

    Ok(Envelope {
        format: SourceFormat::Itl,
        header_len,
        file_len,
        max_crypt_len: cur.peek_u32_at::<BigEndian>(92)?,
        tz_offset: cur.peek_i32_at::<BigEndian>(100)?,
        modified_mac: cur.peek_u32_at::<BigEndian>(112)?,
        application_version,
    })
}

fn invalid_envelope(reason: String) -> Error {
    Error::InvalidEnvelope {
        format: SourceFormat::Itl,
        reason,
    }
}

impl ItlDriver {
    fn new(tz_offset: i32) -> Self {
        let attrs = AttributeTable::new(&[
            (ATTR_TITLE, StringField::Title, TextEncoding::Utf16Le),
            (ATTR_ALBUM, StringField::Album, TextEncoding::Utf16Le),
            (ATTR_ARTIST, StringField::Artist, TextEncoding::Utf16Le),
            (ATTR_GENRE, StringField::Genre, TextEncoding::Utf16Le),
            (ATTR_LOCATION, StringField::Location, TextEncoding::Utf8),
            (
                ATTR_ALBUM_ARTIST,
                StringField::AlbumArtist,
                TextEncoding::Utf16Le,
            ),
            (
                ATTR_PLAYLIST_NAME,
                StringField::PlaylistName,
                TextEncoding::Utf16Le,
            ),
        ]);
        Self { attrs, tz_offset }
    }

    fn read_section(&self, section: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<()> {
        let block_type = ByteCursor::with_origin(section.extra(), section.offset + 12)
            .read_u32::<LittleEndian>()
            .map_err(|_| section.malformed("section extension is missing its block type"))?;

        match block_type {
            BLOCK_TRACKS => {
                for list in section.children()? {
                    let list = list?;
                    if list.is(MLTH_TAG) {
                        self.read_track_list(&list, assembler)?;
                    } else {
                        assembler.record_ignored_tag(list.tag);
                    }
                }
            }
            BLOCK_PLAYLISTS => {
                for list in section.children()? {
                    let list = list?;
                    if list.is(MLPH_TAG) {
                        self.read_playlist_list(&list, assembler)?;
                    } else {
                        assembler.record_ignored_tag(list.tag);
                    }
                }
            }
            BLOCK_LIBRARY_LOCATION | BLOCK_ALBUMS | BLOCK_ARTISTS | BLOCK_LIBRARY_INFO => {
                debug!(
                    block_type,
                    offset = section.offset,
                    "section carries no track or playlist data, skipped"
                );
            }
            other => {
                debug!(
                    block_type = other,
                    offset = section.offset,
                    "unknown section block type skipped"
                );
            }
        }
        Ok(())
    }

    fn read_track_list(&self, list: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<()> {
        for record in list.children()?.tolerate_zero_padding() {
            let record = record?;
            if !record.is(MITH_TAG) {
                assembler.record_ignored_tag(record.tag);
                continue;
            }
            match self.read_track(&record, assembler) {
                Ok(track) => assembler.add_track(track)?,
                Err(err @ Error::MalformedChunk { .. }) => {
                    assembler.record_skip(RecordKind::Track, record.offset, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn read_track(&self, record: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<Track> {
        let header = TrackHeader::read_le(&mut Cursor::new(record.extra()))
            .map_err(|err| record.malformed(format!("track header extension: {err}")))?;

        let mut track = Track {
            id: u64::from(header.track_id),
            persistent_id: header.persistent_id,
            title: String::new(),
            artist: String::new(),
            album_artist: String::new(),
            album: String::new(),
            genre: None,
            duration_millis: header.duration_ms,
            track_number: (header.track_number != 0).then_some(header.track_number),
            disc_number: (header.disc_number != 0).then_some(header.disc_number),
            date_added_epoch: mac_to_unix(header.date_added, self.tz_offset).unwrap_or(0),
            date_modified_epoch: mac_to_unix(header.date_modified, self.tz_offset),
            date_last_played_epoch: mac_to_unix(header.date_last_played, self.tz_offset),
            play_count: Some(header.play_count),
            rating: (header.rating != 0).then_some(header.rating),
            location: String::new(),
            size_bytes: header.file_size,
        };

        for attr in record.children()? {
            let attr = attr?;
            if !attr.is(MHOH_TAG) {
                assembler.record_ignored_tag(attr.tag);
                continue;
            }
            if let Some((field, value)) = self.attrs.extract(&attr)? {
                match field {
                    StringField::Title => track.title = value,
                    StringField::Album => track.album = value,
                    StringField::Artist => track.artist = value,
                    StringField::AlbumArtist => track.album_artist = value,
                    StringField::Genre => track.genre = Some(value),
                    StringField::Location => track.location = value,
                    // Playlist attributes never occur inside a track record;
                    // tolerate and drop.
                    StringField::PlaylistName => {}
                }
            }
        }
        Ok(track)
    }

    fn read_playlist_list(&self, list: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<()> {
        for record in list.children()?.tolerate_zero_padding() {
            let record = record?;
            if !record.is(MIPH_TAG) {
                assembler.record_ignored_tag(record.tag);
                continue;
            }
            match self.read_playlist(&record, assembler) {
                Ok(playlist) => assembler.add_playlist(playlist),
                Err(err @ Error::MalformedChunk { .. }) => {
                    assembler.record_skip(RecordKind::Playlist, record.offset, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn read_playlist(
        &self,
        record: &Chunk<'_>,
        assembler: &mut LibraryAssembler,
    ) -> Result<Playlist> {
        let header = PlaylistHeader::read_le(&mut Cursor::new(record.extra()))
            .map_err(|err| record.malformed(format!("playlist header extension: {err}")))?;

        let mut playlist = Playlist {
            id: u64::from(header.playlist_id),
            name: String::new(),
            entries: Vec::new(),
            is_folder: header.folder_flag != 0,
            is_smart: false,
            date_created_epoch: mac_to_unix(header.date_created, self.tz_offset),
        };

        for child in record.children()? {
            let child = child?;
            if child.is(MTPH_TAG) {
                let track_id = ByteCursor::with_origin(child.extra(), child.offset + 12)
                    .read_u32::<LittleEndian>()
                    .map_err(|_| child.malformed("membership entry is missing its track id"))?;
                playlist.entries.push(PlaylistEntry {
                    track_id: u64::from(track_id),
                    dangling: false,
                });
            } else if child.is(MHOH_TAG) {
                if let Some((StringField::PlaylistName, name)) = self.attrs.extract(&child)? {
                    playlist.name = name;
                }
            } else {
                assembler.record_ignored_tag(child.tag);
            }
        }
        Ok(playlist)
    }
}
