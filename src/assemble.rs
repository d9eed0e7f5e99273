//! Library assembly.
//!
//! Merges one driver's Track/Playlist stream into the final [`Library`].
//! Playlist-to-track resolution is deferred until every track has been
//! collected, so drivers may emit records in whatever order the file stores
//! them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::chunk::Tag;
use crate::error::{Error, Result};
use crate::library::{
    DanglingReference, DecodeOutput, Diagnostics, Library, Playlist, RecordKind, SkippedRecord,
    SourceFormat, Track,
};

pub(crate) struct LibraryAssembler {
    library: Library,
    diagnostics: Diagnostics,
}

impl LibraryAssembler {
    pub(crate) fn new(
        source_format: SourceFormat,
        application_version: String,
        modified_epoch: Option<i64>,
    ) -> Self {
        Self {
            library: Library {
                source_format,
                application_version,
                modified_epoch,
                tracks: BTreeMap::new(),
                playlists: Vec::new(),
            },
            diagnostics: Diagnostics::default(),
        }
    }

    /// Add a track, deduplicating by id. A repeated id with identical
    /// content collapses silently; conflicting content is fatal.
    pub(crate) fn add_track(&mut self, track: Track) -> Result<()> {
        match self.library.tracks.entry(track.id) {
            Entry::Vacant(slot) => {
                slot.insert(track);
            }
            Entry::Occupied(existing) => {
                if *existing.get() != track {
                    return Err(Error::DuplicateTrackId { id: track.id });
                }
                debug!(id = track.id, "identical repeated track entry collapsed");
            }
        }
        Ok(())
    }

    pub(crate) fn add_playlist(&mut self, playlist: Playlist) {
        self.library.playlists.push(playlist);
    }

    pub(crate) fn record_skip(&mut self, kind: RecordKind, offset: usize, reason: String) {
        warn!(?kind, offset, %reason, "record skipped");
        self.diagnostics
            .skipped_records
            .push(SkippedRecord { kind, offset, reason });
    }

    pub(crate) fn record_ignored_tag(&mut self, tag: Tag) {
        debug!(%tag, "chunk tag outside the driver vocabulary, skipped");
        *self
            .diagnostics
            .ignored_tags
            .entry(tag.to_string())
            .or_insert(0) += 1;
    }

    /// Resolve playlist references against the collected tracks and hand
    /// back the finished output.
    pub(crate) fn finish(mut self) -> DecodeOutput {
        for playlist in &mut self.library.playlists {
            for (position, entry) in playlist.entries.iter_mut().enumerate() {
                if !self.library.tracks.contains_key(&entry.track_id) {
                    entry.dangling = true;
                    warn!(
                        playlist_id = playlist.id,
                        track_id = entry.track_id,
                        "playlist references a track missing from the library"
                    );
                    self.diagnostics.dangling_refs.push(DanglingReference {
                        playlist_id: playlist.id,
                        track_id: entry.track_id,
                        position,
                    });
                }
            }
        }
        DecodeOutput {
            library: self.library,
            diagnostics: self.diagnostics,
        }
    }
}
