//! Row and batch models for the collection database.

use serde::{Deserialize, Serialize};

/// One raw track record as delivered by a metadata source.
///
/// Every nullable string is normalized to the empty string before any
/// natural-key computation, so `None` and `Some("")` are the same key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTrack {
    pub title: Option<String>,
    pub artist: Option<String>,
    #[serde(default)]
    pub artist_disambiguation: Option<String>,
    pub album: Option<String>,
    #[serde(default)]
    pub album_artist: Option<String>,
    #[serde(default)]
    pub album_artist_disambiguation: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub album_pos: i64,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    /// Epoch millis.
    pub last_modified: i64,
}

/// A [`RawTrack`] with all nullable strings defaulted to `""`.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedTrack {
    pub title: String,
    pub artist: String,
    pub artist_disambiguation: String,
    pub album: String,
    pub album_artist: String,
    pub album_artist_disambiguation: String,
    pub url: String,
    pub duration: i64,
    pub album_pos: i64,
    pub link_url: String,
    pub image_path: String,
    pub last_modified: i64,
}

impl RawTrack {
    pub(crate) fn normalized(&self) -> NormalizedTrack {
        fn flat(s: &Option<String>) -> String {
            s.clone().unwrap_or_default()
        }
        NormalizedTrack {
            title: flat(&self.title),
            artist: flat(&self.artist),
            artist_disambiguation: flat(&self.artist_disambiguation),
            album: flat(&self.album),
            album_artist: flat(&self.album_artist),
            album_artist_disambiguation: flat(&self.album_artist_disambiguation),
            url: flat(&self.url),
            duration: self.duration,
            album_pos: self.album_pos,
            link_url: flat(&self.link_url),
            image_path: flat(&self.image_path),
            last_modified: self.last_modified,
        }
    }
}

/// One row of an artist (or album-artist) listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistEntry {
    pub name: String,
    pub disambiguation: String,
    pub last_modified: i64,
}

/// One row of an album listing, joined to its attributed album artist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumEntry {
    pub name: String,
    pub artist_name: String,
    pub artist_disambiguation: String,
    pub image_path: Option<String>,
    pub last_modified: i64,
}

/// One row of a track listing, joined to its artist and album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackEntry {
    pub title: String,
    pub artist_name: String,
    pub artist_disambiguation: String,
    pub album_name: String,
    pub url: String,
    pub duration: i64,
    pub album_pos: i64,
    pub link_url: String,
    pub last_modified: i64,
}

/// A resolved search result reported to the downstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackResult {
    pub track: TrackEntry,
}

/// Identifies one album by its natural browsing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub name: String,
    pub album_artist: String,
    pub album_artist_disambiguation: String,
}
