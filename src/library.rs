//! Decoded library model.
//!
//! These are the durable outputs of a decode pass: fully owned values,
//! decoupled from the input buffer the moment assembly finishes. The same
//! structures come back regardless of which format produced them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which on-disk format a library was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Legacy `iTunes Library.itl`.
    Itl,
    /// `Library.musicdb` written by Music.app / iTunes 12.2+.
    MusicDb,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Itl => f.write_str("itl"),
            SourceFormat::MusicDb => f.write_str("musicdb"),
        }
    }
}

/// One track. Timestamps are Unix-epoch seconds, already shifted by the
/// envelope's timezone offset; `date_added_epoch` is 0 when the source
/// carried no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique within one library. The itl format keys tracks by a 32-bit id
    /// (widened here); musicdb by the 64-bit persistent id.
    pub id: u64,
    pub persistent_id: u64,
    pub title: String,
    pub artist: String,
    pub album_artist: String,
    pub album: String,
    pub genre: Option<String>,
    pub duration_millis: u32,
    pub track_number: Option<u16>,
    pub disc_number: Option<u16>,
    pub date_added_epoch: i64,
    pub date_modified_epoch: Option<i64>,
    pub date_last_played_epoch: Option<i64>,
    pub play_count: Option<u32>,
    pub rating: Option<u8>,
    /// File location as stored by the source application (a URI or native
    /// path; not validated here).
    pub location: String,
    pub size_bytes: u64,
}

/// One playlist membership entry, in playlist order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub track_id: u64,
    /// True when no track with this id exists in the library. The entry is
    /// kept in place; dropping it is a consumer decision.
    pub dangling: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: u64,
    pub name: String,
    pub entries: Vec<PlaylistEntry>,
    pub is_folder: bool,
    pub is_smart: bool,
    pub date_created_epoch: Option<i64>,
}

/// The decoded library: the sole externally returned artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub source_format: SourceFormat,
    /// Version string of the application that wrote the file.
    pub application_version: String,
    /// When the library itself was last written, per the envelope.
    pub modified_epoch: Option<i64>,
    pub tracks: BTreeMap<u64, Track>,
    pub playlists: Vec<Playlist>,
}

impl Library {
    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }
}

/// What kind of record a skip diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Track,
    Playlist,
}

/// A record container that was structurally broken inside and dropped as a
/// whole, leaving the rest of the decode intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub kind: RecordKind,
    /// Offset of the record container within the decoded payload.
    pub offset: usize,
    pub reason: String,
}

/// A playlist entry whose track id has no match in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub playlist_id: u64,
    pub track_id: u64,
    /// Index of the entry within its playlist.
    pub position: usize,
}

/// Non-fatal observations accumulated during one decode pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub skipped_records: Vec<SkippedRecord>,
    /// Chunk tags outside the driver's vocabulary, with occurrence counts.
    pub ignored_tags: BTreeMap<String, u32>,
    pub dangling_refs: Vec<DanglingReference>,
}

impl Diagnostics {
    /// True when the decode was complete: nothing skipped, nothing unknown,
    /// nothing dangling.
    pub fn is_clean(&self) -> bool {
        self.skipped_records.is_empty()
            && self.ignored_tags.is_empty()
            && self.dangling_refs.is_empty()
    }
}

/// Successful decode result: the library plus everything that was tolerated
/// along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOutput {
    pub library: Library,
    pub diagnostics: Diagnostics,
}
