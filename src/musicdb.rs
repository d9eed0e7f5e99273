//! Format driver for `Library.musicdb`, written by Music.app and iTunes 12.2+.
//!
//! The musicdb envelope is little-endian, matching its payload. Payload
//! vocabulary:
//! - `hsma`: top-level section wrapper, section type in the header extension
//! - `ltma` / `itma`: master track list and track records
//! - `lPma` / `lpma`: playlist list and playlist records
//! - `boma`: generic attribute container keyed by a u32 subtype. Unlike the
//!   itl `mhoh` it carries more than strings: numeric record fields, the
//!   smart-playlist marker, and playlist memberships (subtype 0xCE, nesting
//!   one `ipfa` chunk per entry).
//!
//! Tracks and memberships are keyed by the 64-bit persistent id; the 32-bit
//! sequential id the legacy format used is still stored but never referenced.
//!
//! Field offsets match libraries written by Music 1.0 / iTunes 12.x as
//! documented at https://home.vollink.com/gary/playlister/musicdb.html

use std::io::Cursor;

use binrw::BinRead;
use byteorder::LittleEndian;
use tracing::debug;

use crate::assemble::LibraryAssembler;
use crate::chunk::{Chunk, ChunkIter};
use crate::cursor::ByteCursor;
use crate::envelope::{self, mac_to_unix, Envelope};
use crate::error::{Error, Result};
use crate::library::{DecodeOutput, Playlist, PlaylistEntry, RecordKind, SourceFormat, Track};
use crate::string::{AttributeTable, StringField, TextEncoding};
use crate::DecodeConfig;

pub(crate) const ENVELOPE_MAGIC: &[u8; 4] = b"hfma";
const PAYLOAD_MAGIC: &[u8; 4] = b"hsma";

/// Envelope fields run through offset 103 (modification date at 100).
const MIN_ENVELOPE_LEN: u32 = 104;

const HSMA_TAG: &[u8; 4] = b"hsma";
const LTMA_TAG: &[u8; 4] = b"ltma";
const ITMA_TAG: &[u8; 4] = b"itma";
const BOMA_TAG: &[u8; 4] = b"boma";
const LPMA_LIST_TAG: &[u8; 4] = b"lPma";
const LPMA_ITEM_TAG: &[u8; 4] = b"lpma";
const IPFA_TAG: &[u8; 4] = b"ipfa";

/// `hsma` section types.
const SECTION_TRACKS: u32 = 1;
const SECTION_PLAYLISTS: u32 = 2;
const SECTION_ENVELOPE_COPY: u32 = 3;
const SECTION_ALBUMS: u32 = 4;
const SECTION_ARTISTS: u32 = 5;
const SECTION_LIBRARY_INFO: u32 = 6;

/// `boma` subtypes carrying non-string record data.
const BOMA_NUMERICS: u32 = 0x01;
const BOMA_PLAY_STATS: u32 = 0x17;
const BOMA_SMART_MARKER: u32 = 0xc9;
const BOMA_MEMBERSHIP: u32 = 0xce;

/// `boma` string attribute subtypes.
const ATTR_TITLE: u32 = 0x02;
const ATTR_ALBUM: u32 = 0x03;
const ATTR_ARTIST: u32 = 0x04;
const ATTR_GENRE: u32 = 0x05;
const ATTR_LOCATION: u32 = 0x0b;
const ATTR_ALBUM_ARTIST: u32 = 0x1b;
const ATTR_PLAYLIST_NAME: u32 = 0xc8;

/// Fixed fields of an `itma` header extension.
#[derive(BinRead)]
#[br(little)]
struct TrackHeader {
    persistent_id: u64,
    /// A 32-bit sequential id sits before the rating; memberships reference
    /// the persistent id, so it never feeds the output model.
    #[br(pad_before = 4)]
    rating: u8,
}

/// Numeric track fields carried by a `boma` subtype 0x01 body.
#[derive(BinRead)]
#[br(little)]
struct TrackNumerics {
    date_added: u32,
    date_modified: u32,
    duration_ms: u32,
    track_number: u16,
    disc_number: u16,
    file_size: u64,
}

/// Play statistics carried by a `boma` subtype 0x17 body.
#[derive(BinRead)]
#[br(little)]
struct PlayStats {
    date_last_played: u32,
    play_count: u32,
}

/// Fixed fields of an `lpma` header extension.
#[derive(BinRead)]
#[br(little)]
struct PlaylistHeader {
    persistent_id: u64,
    date_created: u32,
    folder_flag: u8,
}

struct MusicDbDriver {
    attrs: AttributeTable,
    tz_offset: i32,
}

/// Decode a `Library.musicdb` buffer.
pub fn decode(data: &[u8], config: &DecodeConfig) -> Result<DecodeOutput> {
    let envelope = parse_envelope(data)?;
    let payload = envelope::recover_payload(data, &envelope, config.key.as_ref(), PAYLOAD_MAGIC)?;

    let driver = MusicDbDriver::new(envelope.tz_offset);
    let mut assembler = LibraryAssembler::new(
        SourceFormat::MusicDb,
        envelope.application_version.clone(),
        envelope.modified_epoch(),
    );

    for section in ChunkIter::new(&payload, 0).tolerate_zero_padding() {
        let section = section?;
        if section.is(HSMA_TAG) {
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
    let header_len = cur.read_u32::<LittleEndian>()?;
    let file_len = cur.read_u32::<LittleEndian>()?;

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

    // 32-byte NUL-padded version string.
    let version_raw = cur.peek_at(16, 32)?;
    let version_end = version_raw
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(version_raw.len());
    let application_version = String::from_utf8_lossy(&version_raw[..version_end]).into_owned();

    Ok(Envelope {
        format: SourceFormat::MusicDb,
        header_len,
        file_len,
        max_crypt_len: cur.peek_u32_at::<LittleEndian>(84)?,
        tz_offset: cur.peek_i32_at::<LittleEndian>(88)?,
        modified_mac: cur.peek_u32_at::<LittleEndian>(100)?,
        application_version,
    })
}

fn invalid_envelope(reason: String) -> Error {
    Error::InvalidEnvelope {
        format: SourceFormat::MusicDb,
        reason,
    }
}

/// Read the u32 subtype opening a `boma` header extension.
fn boma_subtype(chunk: &Chunk<'_>) -> Result<u32> {
    ByteCursor::with_origin(chunk.extra(), chunk.offset + 12)
        .read_u32::<LittleEndian>()
        .map_err(|_| chunk.malformed("attribute extension is missing its subtype"))
}

impl MusicDbDriver {
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
        let section_type = ByteCursor::with_origin(section.extra(), section.offset + 12)
            .read_u32::<LittleEndian>()
            .map_err(|_| section.malformed("section extension is missing its section type"))?;

        match section_type {
            SECTION_TRACKS => {
                for list in section.children()? {
                    let list = list?;
                    if list.is(LTMA_TAG) {
                        self.read_track_list(&list, assembler)?;
                    } else {
                        assembler.record_ignored_tag(list.tag);
                    }
                }
            }
            SECTION_PLAYLISTS => {
                for list in section.children()? {
                    let list = list?;
                    if list.is(LPMA_LIST_TAG) {
                        self.read_playlist_list(&list, assembler)?;
                    } else {
                        assembler.record_ignored_tag(list.tag);
                    }
                }
            }
            // The envelope copy repeats what the cleartext envelope already
            // said and is not chunk-shaped inside; the collection sections
            // only mirror track data.
            SECTION_ENVELOPE_COPY | SECTION_ALBUMS | SECTION_ARTISTS | SECTION_LIBRARY_INFO => {
                debug!(
                    section_type,
                    offset = section.offset,
                    "section carries no track or playlist data, skipped"
                );
            }
            other => {
                debug!(
                    section_type = other,
                    offset = section.offset,
                    "unknown section type skipped"
                );
            }
        }
        Ok(())
    }

    fn read_track_list(&self, list: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<()> {
        for record in list.children()?.tolerate_zero_padding() {
            let record = record?;
            if !record.is(ITMA_TAG) {
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
            id: header.persistent_id,
            persistent_id: header.persistent_id,
            title: String::new(),
            artist: String::new(),
            album_artist: String::new(),
            album: String::new(),
            genre: None,
            duration_millis: 0,
            track_number: None,
            disc_number: None,
            date_added_epoch: 0,
            date_modified_epoch: None,
            date_last_played_epoch: None,
            play_count: None,
            rating: (header.rating != 0).then_some(header.rating),
            location: String::new(),
            size_bytes: 0,
        };

        for attr in record.children()? {
            let attr = attr?;
            if !attr.is(BOMA_TAG) {
                assembler.record_ignored_tag(attr.tag);
                continue;
            }
            match boma_subtype(&attr)? {
                BOMA_NUMERICS => {
                    let numerics = TrackNumerics::read_le(&mut Cursor::new(attr.body()))
                        .map_err(|err| attr.malformed(format!("track numerics body: {err}")))?;
                    track.duration_millis = numerics.duration_ms;
                    track.size_bytes = numerics.file_size;
                    track.track_number =
                        (numerics.track_number != 0).then_some(numerics.track_number);
                    track.disc_number = (numerics.disc_number != 0).then_some(numerics.disc_number);
                    track.date_added_epoch =
                        mac_to_unix(numerics.date_added, self.tz_offset).unwrap_or(0);
                    track.date_modified_epoch = mac_to_unix(numerics.date_modified, self.tz_offset);
                }
                BOMA_PLAY_STATS => {
                    let stats = PlayStats::read_le(&mut Cursor::new(attr.body()))
                        .map_err(|err| attr.malformed(format!("play statistics body: {err}")))?;
                    track.play_count = Some(stats.play_count);
                    // The last-played date is only meaningful once played.
                    if stats.play_count > 0 {
                        track.date_last_played_epoch =
                            mac_to_unix(stats.date_last_played, self.tz_offset);
                    }
                }
                _ => {
                    if let Some((field, value)) = self.attrs.extract(&attr)? {
                        match field {
                            StringField::Title => track.title = value,
                            StringField::Album => track.album = value,
                            StringField::Artist => track.artist = value,
                            StringField::AlbumArtist => track.album_artist = value,
                            StringField::Genre => track.genre = Some(value),
                            StringField::Location => track.location = value,
                            // Playlist attributes never occur inside a track
                            // record; tolerate and drop.
                            StringField::PlaylistName => {}
                        }
                    }
                }
            }
        }
        Ok(track)
    }

    fn read_playlist_list(&self, list: &Chunk<'_>, assembler: &mut LibraryAssembler) -> Result<()> {
        for record in list.children()?.tolerate_zero_padding() {
            let record = record?;
            if !record.is(LPMA_ITEM_TAG) {
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
            id: header.persistent_id,
            name: String::new(),
            entries: Vec::new(),
            is_folder: header.folder_flag != 0,
            is_smart: false,
            date_created_epoch: mac_to_unix(header.date_created, self.tz_offset),
        };

        for child in record.children()? {
            let child = child?;
            if !child.is(BOMA_TAG) {
                assembler.record_ignored_tag(child.tag);
                continue;
            }
            match boma_subtype(&child)? {
                BOMA_MEMBERSHIP => {
                    for entry in child.children()? {
                        let entry = entry?;
                        if !entry.is(IPFA_TAG) {
                            assembler.record_ignored_tag(entry.tag);
                            continue;
                        }
                        let track_id = ByteCursor::with_origin(entry.extra(), entry.offset + 12)
                            .read_u64::<LittleEndian>()
                            .map_err(|_| {
                                entry.malformed("membership entry is missing its track id")
                            })?;
                        playlist.entries.push(PlaylistEntry {
                            track_id,
                            dangling: false,
                        });
                    }
                }
                BOMA_SMART_MARKER => {
                    // The body holds the smart-playlist rule data (`SLst`),
                    // which is not decoded; presence alone sets the flag.
                    playlist.is_smart = true;
                }
                _ => {
                    if let Some((StringField::PlaylistName, name)) = self.attrs.extract(&child)? {
                        playlist.name = name;
                    }
                }
            }
        }
        Ok(playlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{chunk, seal_musicdb, TEST_KEY};

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn boma(subtype: u32, payload: &[u8]) -> Vec<u8> {
        chunk(BOMA_TAG, &subtype.to_le_bytes(), payload)
    }

    /// `boma` subtype 0x01 body matching [`TrackNumerics`].
    fn numerics_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&3_500_000_000u32.to_le_bytes()); // date added
        body.extend_from_slice(&3_500_100_000u32.to_le_bytes()); // date modified
        body.extend_from_slice(&215_000u32.to_le_bytes()); // duration
        body.extend_from_slice(&3u16.to_le_bytes()); // track number
        body.extend_from_slice(&1u16.to_le_bytes()); // disc number
        body.extend_from_slice(&7_340_032u64.to_le_bytes()); // file size
        body
    }

    /// `boma` subtype 0x17 body matching [`PlayStats`].
    fn play_stats_body(count: u32, last_played: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&last_played.to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        body
    }

    /// `itma` header extension matching [`TrackHeader`].
    fn track_extra(persistent_id: u64) -> Vec<u8> {
        let mut extra = Vec::new();
        extra.extend_from_slice(&persistent_id.to_le_bytes());
        extra.extend_from_slice(&77u32.to_le_bytes()); // sequential id
        extra.push(100); // rating
        extra
    }

    fn itma(persistent_id: u64, title: &str, artist: &str) -> Vec<u8> {
        let body = [
            boma(BOMA_NUMERICS, &numerics_body()),
            boma(BOMA_PLAY_STATS, &play_stats_body(4, 3_500_200_000)),
            boma(ATTR_TITLE, &utf16le(title)),
            boma(ATTR_ARTIST, &utf16le(artist)),
            boma(ATTR_ALBUM, &utf16le("Some Album")),
            boma(
                ATTR_LOCATION,
                format!("file:///music/{persistent_id:x}.m4a").as_bytes(),
            ),
        ]
        .concat();
        chunk(ITMA_TAG, &track_extra(persistent_id), &body)
    }

    fn tracks_section(records: &[Vec<u8>]) -> Vec<u8> {
        let list = chunk(
            LTMA_TAG,
            &(records.len() as u32).to_le_bytes(),
            &records.concat(),
        );
        chunk(HSMA_TAG, &SECTION_TRACKS.to_le_bytes(), &list)
    }

    fn membership(track_id: u64) -> Vec<u8> {
        boma(
            BOMA_MEMBERSHIP,
            &chunk(IPFA_TAG, &track_id.to_le_bytes(), &[]),
        )
    }

    /// `lpma` header extension matching [`PlaylistHeader`].
    fn playlist_extra(persistent_id: u64, folder: bool) -> Vec<u8> {
        let mut extra = Vec::new();
        extra.extend_from_slice(&persistent_id.to_le_bytes());
        extra.extend_from_slice(&3_550_000_000u32.to_le_bytes()); // date created
        extra.push(u8::from(folder));
        extra
    }

    fn lpma(id: u64, name: &str, track_ids: &[u64]) -> Vec<u8> {
        let mut body = boma(ATTR_PLAYLIST_NAME, &utf16le(name));
        for &track_id in track_ids {
            body.extend_from_slice(&membership(track_id));
        }
        chunk(LPMA_ITEM_TAG, &playlist_extra(id, false), &body)
    }

    fn playlists_section(records: &[Vec<u8>]) -> Vec<u8> {
        let list = chunk(
            LPMA_LIST_TAG,
            &(records.len() as u32).to_le_bytes(),
            &records.concat(),
        );
        chunk(HSMA_TAG, &SECTION_PLAYLISTS.to_le_bytes(), &list)
    }

    fn decode_payload(payload: &[u8]) -> DecodeOutput {
        let file = seal_musicdb(payload, Some(&TEST_KEY), 102_400);
        decode(
            &file,
            &DecodeConfig {
                key: Some(TEST_KEY),
            },
        )
        .unwrap()
    }

    // Persistent ids above u32::MAX, as real libraries have.
    const PID_A: u64 = 0xB01D_FACE_0000_0001;
    const PID_B: u64 = 0xB01D_FACE_0000_0002;
    const PID_C: u64 = 0xB01D_FACE_0000_0003;

    #[test]
    fn test_track_count_matches_container_count() {
        let payload = tracks_section(&[
            itma(PID_A, "One", "A"),
            itma(PID_B, "Two", "B"),
            itma(PID_C, "Three", "C"),
        ]);
        let out = decode_payload(&payload);
        assert_eq!(out.library.tracks.len(), 3);
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn test_track_fields_are_decoded() {
        let out = decode_payload(&tracks_section(&[itma(PID_A, "Blinded", "Beacon")]));
        let track = out.library.track(PID_A).unwrap();
        assert_eq!(track.persistent_id, PID_A);
        assert_eq!(track.title, "Blinded");
        assert_eq!(track.artist, "Beacon");
        assert_eq!(track.album, "Some Album");
        assert_eq!(track.location, format!("file:///music/{PID_A:x}.m4a"));
        assert_eq!(track.duration_millis, 215_000);
        assert_eq!(track.size_bytes, 7_340_032);
        assert_eq!(track.track_number, Some(3));
        assert_eq!(track.disc_number, Some(1));
        assert_eq!(track.rating, Some(100));
        assert_eq!(track.play_count, Some(4));
        // 3_500_000_000 - 2_082_844_800, tz offset zero.
        assert_eq!(track.date_added_epoch, 1_417_155_200);
        assert_eq!(track.date_modified_epoch, Some(1_417_255_200));
        assert_eq!(track.date_last_played_epoch, Some(1_417_355_200));
    }

    #[test]
    fn test_unplayed_track_has_no_last_played_date() {
        let body = [
            boma(BOMA_NUMERICS, &numerics_body()),
            boma(BOMA_PLAY_STATS, &play_stats_body(0, 3_500_200_000)),
        ]
        .concat();
        let record = chunk(ITMA_TAG, &track_extra(PID_A), &body);
        let out = decode_payload(&tracks_section(&[record]));
        let track = out.library.track(PID_A).unwrap();
        assert_eq!(track.play_count, Some(0));
        assert_eq!(track.date_last_played_epoch, None);
    }

    #[test]
    fn test_memberships_resolve_by_persistent_id() {
        let payload = [
            tracks_section(&[itma(PID_A, "One", "A"), itma(PID_B, "Two", "B")]),
            playlists_section(&[lpma(0x50AA, "Evening Mix", &[PID_B, PID_A])]),
        ]
        .concat();
        let out = decode_payload(&payload);
        let playlist = &out.library.playlists[0];
        assert_eq!(playlist.name, "Evening Mix");
        assert_eq!(playlist.id, 0x50AA);
        assert_eq!(playlist.date_created_epoch, Some(1_467_155_200));
        assert_eq!(
            playlist.entries,
            vec![
                PlaylistEntry {
                    track_id: PID_B,
                    dangling: false
                },
                PlaylistEntry {
                    track_id: PID_A,
                    dangling: false
                },
            ]
        );
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn test_dangling_middle_entry_is_retained_and_recorded() {
        let payload = [
            tracks_section(&[itma(PID_A, "One", "A"), itma(PID_C, "Three", "C")]),
            playlists_section(&[lpma(0x50AA, "Mix", &[PID_A, PID_B, PID_C])]),
        ]
        .concat();
        let out = decode_payload(&payload);

        let playlist = &out.library.playlists[0];
        assert_eq!(playlist.entries.len(), 3);
        assert_eq!(playlist.entries[1].track_id, PID_B);
        assert!(playlist.entries[1].dangling);
        assert!(!playlist.entries[0].dangling);
        assert!(!playlist.entries[2].dangling);

        assert_eq!(out.diagnostics.dangling_refs.len(), 1);
        let dangling = out.diagnostics.dangling_refs[0];
        assert_eq!(dangling.playlist_id, 0x50AA);
        assert_eq!(dangling.track_id, PID_B);
        assert_eq!(dangling.position, 1);
    }

    #[test]
    fn test_smart_playlist_marker_sets_flag() {
        let mut record_body = boma(ATTR_PLAYLIST_NAME, &utf16le("Recently Added"));
        record_body.extend_from_slice(&boma(BOMA_SMART_MARKER, b"SLst rule data"));
        let record = chunk(LPMA_ITEM_TAG, &playlist_extra(0x50AB, false), &record_body);

        let out = decode_payload(&playlists_section(&[record]));
        assert!(out.library.playlists[0].is_smart);
        assert!(!out.library.playlists[0].is_folder);
    }

    #[test]
    fn test_folder_flag_reaches_playlist() {
        let record = chunk(
            LPMA_ITEM_TAG,
            &playlist_extra(0x50AC, true),
            &boma(ATTR_PLAYLIST_NAME, &utf16le("Genres")),
        );
        let out = decode_payload(&playlists_section(&[record]));
        assert!(out.library.playlists[0].is_folder);
    }

    #[test]
    fn test_unknown_boma_subtype_is_dropped_silently() {
        let mut body = itma_body_with_title("One");
        body.extend_from_slice(&boma(0x3f, &utf16le("Work Name"))); // not in the table
        let record = chunk(ITMA_TAG, &track_extra(PID_A), &body);

        let out = decode_payload(&tracks_section(&[record]));
        assert_eq!(out.library.track(PID_A).unwrap().title, "One");
        assert!(out.diagnostics.is_clean());
    }

    fn itma_body_with_title(title: &str) -> Vec<u8> {
        [
            boma(BOMA_NUMERICS, &numerics_body()),
            boma(ATTR_TITLE, &utf16le(title)),
        ]
        .concat()
    }

    #[test]
    fn test_non_record_sections_are_skipped_without_descent() {
        // Album-collection sections are not decoded, so an arbitrary body
        // must not trip the chunk reader.
        let albums = chunk(HSMA_TAG, &SECTION_ALBUMS.to_le_bytes(), b"not chunks at all");
        let payload = [albums, tracks_section(&[itma(PID_A, "One", "A")])].concat();
        let out = decode_payload(&payload);
        assert_eq!(out.library.tracks.len(), 1);
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn test_unknown_top_level_tag_is_ignored_not_fatal() {
        let payload = [
            chunk(b"ZZZZ", &[0xAB; 4], b"future section"),
            tracks_section(&[itma(PID_A, "One", "A")]),
        ]
        .concat();
        let out = decode_payload(&payload);
        assert_eq!(out.library.tracks.len(), 1);
        assert_eq!(out.diagnostics.ignored_tags.get("ZZZZ"), Some(&1));
    }

    #[test]
    fn test_broken_record_is_skipped_not_fatal() {
        // An itma whose body holds a chunk overrunning its scope.
        let mut bad_child = boma(ATTR_TITLE, b"xx");
        bad_child[8..12].copy_from_slice(&9_999u32.to_le_bytes());
        let broken = chunk(ITMA_TAG, &track_extra(PID_B), &bad_child);

        let payload = tracks_section(&[itma(PID_A, "One", "A"), broken, itma(PID_C, "Three", "C")]);
        let out = decode_payload(&payload);

        assert_eq!(out.library.tracks.len(), 2);
        assert_eq!(out.diagnostics.skipped_records.len(), 1);
        let skip = &out.diagnostics.skipped_records[0];
        assert_eq!(skip.kind, RecordKind::Track);
        assert!(skip.reason.contains("boma"));
    }

    #[test]
    fn test_wrong_key_is_detected() {
        let file = seal_musicdb(
            &tracks_section(&[itma(PID_A, "One", "A")]),
            Some(&TEST_KEY),
            102_400,
        );
        let mut wrong = TEST_KEY;
        wrong[15] ^= 0x80;
        let err = decode(&file, &DecodeConfig { key: Some(wrong) }).unwrap_err();
        assert!(matches!(err, Error::DecryptionKeyInvalid { .. }));
    }

    #[test]
    fn test_file_length_mismatch_is_rejected() {
        let mut file = seal_musicdb(&tracks_section(&[]), None, 0);
        file.push(0);
        let err = decode(&file, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope { .. }));
    }

    #[test]
    fn test_envelope_metadata_reaches_library() {
        let out = decode_payload(&tracks_section(&[]));
        assert_eq!(out.library.source_format, SourceFormat::MusicDb);
        assert_eq!(out.library.application_version, "1.0.6.10");
        // Sealer writes 3_600_000_000 mac seconds with zero tz offset.
        assert_eq!(out.library.modified_epoch, Some(1_517_155_200));
    }
}
