//! Revision-keyed caching of materialized browse results.
//!
//! A cache key combines the store id, the browsed scope and the scope's
//! current revision. A row written to the store advances the revision,
//! which changes the key, so stale entries are never served; they simply
//! stop being looked up.

use crate::collection_db::{AlbumEntry, ArtistEntry, TrackEntry};
use anyhow::Result;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Revision rendered into cache keys when the scope has no rows.
const EMPTY_REVISION: i64 = -1;

/// Row ordering baked into a materialized scope. Part of the cache key,
/// so each ordering of the same rows is its own view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    Alphabetical,
    ArtistAlphabetical,
    LastModified,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortKey::Alphabetical => "alpha",
            SortKey::ArtistAlphabetical => "artistalpha",
            SortKey::LastModified => "lastmodified",
        })
    }
}

/// One cacheable browse scope of a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Tracks {
        sort: SortKey,
    },
    Artists {
        sort: SortKey,
    },
    AlbumArtists {
        sort: SortKey,
    },
    Albums {
        sort: SortKey,
    },
    ArtistAlbums {
        name: String,
        disambiguation: String,
    },
    AlbumTracks {
        name: String,
        album_artist: String,
        album_artist_disambiguation: String,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Tracks { sort } => write!(f, "tracks_{}", sort),
            Scope::Artists { sort } => write!(f, "artists_{}", sort),
            Scope::AlbumArtists { sort } => write!(f, "albumartists_{}", sort),
            Scope::Albums { sort } => write!(f, "albums_{}", sort),
            Scope::ArtistAlbums {
                name,
                disambiguation,
            } => write!(f, "artistalbums_{}_{}", name, disambiguation),
            Scope::AlbumTracks {
                name,
                album_artist,
                album_artist_disambiguation,
            } => write!(
                f,
                "albumtracks_{}_{}_{}",
                name, album_artist, album_artist_disambiguation
            ),
        }
    }
}

impl Scope {
    pub fn cache_key(&self, store_id: &str, revision: Option<i64>) -> String {
        format!(
            "{}_{}_{}",
            store_id,
            self,
            revision.unwrap_or(EMPTY_REVISION)
        )
    }
}

/// The rows of one materialized scope.
#[derive(Debug, Clone)]
pub enum ViewRows {
    Tracks(Vec<TrackEntry>),
    Artists(Vec<ArtistEntry>),
    Albums(Vec<AlbumEntry>),
}

impl ViewRows {
    pub fn len(&self) -> usize {
        match self {
            ViewRows::Tracks(rows) => rows.len(),
            ViewRows::Artists(rows) => rows.len(),
            ViewRows::Albums(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A browse result frozen at one revision of its scope.
#[derive(Debug)]
pub struct MaterializedView {
    pub key: String,
    pub revision: i64,
    pub rows: ViewRows,
}

/// Keyed single-fill cache of [`MaterializedView`]s.
///
/// Concurrent lookups of the same key run the build closure exactly once
/// and share the result; a failed build is not cached and the next lookup
/// retries.
#[derive(Default)]
pub struct RevisionCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<MaterializedView>>>>>,
}

impl RevisionCache {
    pub fn new() -> Self {
        RevisionCache::default()
    }

    pub fn get_or_build(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<MaterializedView>,
    ) -> Result<Arc<MaterializedView>> {
        let cell = {
            let mut cells = self.cells.lock().unwrap();
            cells.entry(key.to_string()).or_default().clone()
        };
        let view = cell.get_or_try_init(|| {
            debug!("Materializing {}", key);
            build().map(Arc::new)
        })?;
        Ok(view.clone())
    }

    #[cfg(test)]
    fn filled_len(&self) -> usize {
        self.cells
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.get().is_some())
            .count()
    }
}
