//! SQLite-backed collection store.
//!
//! One physical database file per store id. All mutating entry points
//! (ingest, wipe) serialize through the single write connection's mutex;
//! browsing and search lookups go through a round-robin pool of read-only
//! connections and never block each other.

use super::manager::StampStore;
use super::models::{AlbumEntry, AlbumRef, ArtistEntry, NormalizedTrack, RawTrack, TrackEntry};
use super::query::{Filter, Join, OrderTerm, SelectQuery};
use super::schema::*;
use crate::sqlite_persistence::open_schema;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

const DB_FILE_SUFFIX: &str = "_collection.db";
const LAST_UPDATE_KEY_SUFFIX: &str = "_last_collection_update";

/// Summary of the distinct track-artist names seen for one album within a
/// batch. Only "one" versus "more than one" matters for compilation
/// detection, so tracking stops at the second distinct name.
enum ArtistSpread {
    One(String),
    Multiple,
}

pub struct CollectionDb {
    store_id: String,
    last_update_key: String,
    write_conn: Mutex<Connection>,
    read_pool: Vec<Arc<Mutex<Connection>>>,
    read_index: AtomicUsize,
    initialized: AtomicBool,
    stamps: Arc<dyn StampStore>,
}

impl CollectionDb {
    /// Open (creating or upgrading as needed) the collection database for
    /// `store_id` inside `db_dir`.
    pub fn open<P: AsRef<Path>>(
        db_dir: P,
        store_id: &str,
        read_pool_size: usize,
        stamps: Arc<dyn StampStore>,
    ) -> Result<Self> {
        let db_path = db_dir
            .as_ref()
            .join(format!("{}{}", store_id, DB_FILE_SUFFIX));

        let mut write_conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open collection database {:?}", db_path))?;
        open_schema(&mut write_conn, COLLECTION_VERSIONED_SCHEMAS)?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;

        let track_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))
            .unwrap_or(0);
        info!(
            "Opened collection {} at {:?} ({} tracks)",
            store_id, db_path, track_count
        );

        let mut read_pool = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size.max(1) {
            // Read-only connections inherit the WAL journal mode set above.
            let read_conn = Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(CollectionDb {
            last_update_key: format!("{}{}", store_id, LAST_UPDATE_KEY_SUFFIX),
            store_id: store_id.to_string(),
            write_conn: Mutex::new(write_conn),
            read_pool,
            read_index: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            stamps,
        })
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn last_update_key(&self) -> &str {
        &self.last_update_key
    }

    /// True once a batch has been ingested successfully.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingest a batch of raw track records under one exclusive transaction.
    ///
    /// All-or-nothing: any failure rolls the whole batch back and no partial
    /// writes become visible. Duplicate natural keys are silently ignored.
    pub fn ingest(&self, batch: &[RawTrack]) -> Result<()> {
        let started = Instant::now();
        let tracks: Vec<NormalizedTrack> = batch.iter().map(RawTrack::normalized).collect();

        // Per album name, is this a compilation (tracks by more than one
        // distinct artist)?
        let mut album_spread: HashMap<String, ArtistSpread> = HashMap::new();
        for track in &tracks {
            match album_spread.entry(track.album.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(ArtistSpread::One(track.artist.clone()));
                }
                Entry::Occupied(mut occupied) => {
                    if let ArtistSpread::One(first) = occupied.get() {
                        if first != &track.artist {
                            occupied.insert(ArtistSpread::Multiple);
                        }
                    }
                }
            }
        }
        let is_compilation =
            |album: &str| matches!(album_spread.get(album), Some(ArtistSpread::Multiple));

        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            // Artists and album artists first, with the batch-wide maximum
            // last_modified per natural key.
            let mut artist_stamps: HashMap<(String, String), i64> = HashMap::new();
            let mut album_artist_stamps: HashMap<(String, String), i64> = HashMap::new();
            for track in &tracks {
                bump_stamp(
                    &mut artist_stamps,
                    (track.artist.clone(), track.artist_disambiguation.clone()),
                    track.last_modified,
                );
                bump_stamp(
                    &mut album_artist_stamps,
                    (
                        track.album_artist.clone(),
                        track.album_artist_disambiguation.clone(),
                    ),
                    track.last_modified,
                );
                if is_compilation(&track.album) {
                    bump_stamp(
                        &mut album_artist_stamps,
                        (COMPILATION_ARTIST_NAME.to_string(), String::new()),
                        track.last_modified,
                    );
                }
            }

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO artists (name, disambiguation, last_modified) VALUES (?1, ?2, ?3)",
                )?;
                for ((name, disambiguation), stamp) in &artist_stamps {
                    stmt.execute(params![name, disambiguation, stamp])?;
                }
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO album_artists (name, disambiguation, last_modified) VALUES (?1, ?2, ?3)",
                )?;
                for ((name, disambiguation), stamp) in &album_artist_stamps {
                    stmt.execute(params![name, disambiguation, stamp])?;
                }
            }

            // Conflict-ignored inserts report no ids; re-read the key->id
            // assignments for everything just written.
            let artist_ids = read_name_key_ids(&tx, TABLE_ARTISTS)?;
            let album_artist_ids = read_name_key_ids(&tx, TABLE_ALBUM_ARTISTS)?;

            let resolve_album_artist_id = |track: &NormalizedTrack| -> Result<i64> {
                let key = if is_compilation(&track.album) {
                    (COMPILATION_ARTIST_NAME.to_string(), String::new())
                } else {
                    (
                        track.album_artist.clone(),
                        track.album_artist_disambiguation.clone(),
                    )
                };
                album_artist_ids
                    .get(&key)
                    .copied()
                    .with_context(|| format!("Album artist {:?} missing after insert", key.0))
            };

            // Albums, keyed by (name, album_artist_id).
            struct AlbumSeed {
                last_modified: i64,
                image_path: String,
            }
            let mut album_seeds: HashMap<(String, i64), AlbumSeed> = HashMap::new();
            for track in &tracks {
                let album_artist_id = resolve_album_artist_id(track)?;
                match album_seeds.entry((track.album.clone(), album_artist_id)) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(AlbumSeed {
                            last_modified: track.last_modified,
                            image_path: track.image_path.clone(),
                        });
                    }
                    Entry::Occupied(mut occupied) => {
                        let seed = occupied.get_mut();
                        seed.last_modified = seed.last_modified.max(track.last_modified);
                        if seed.image_path.is_empty() {
                            seed.image_path = track.image_path.clone();
                        }
                    }
                }
            }
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO albums (name, album_artist_id, image_path, last_modified) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for ((name, album_artist_id), seed) in &album_seeds {
                    let image_path = (!seed.image_path.is_empty()).then_some(&seed.image_path);
                    stmt.execute(params![name, album_artist_id, image_path, seed.last_modified])?;
                }
            }

            let mut album_ids: HashMap<(String, i64), i64> = HashMap::new();
            {
                let mut stmt =
                    tx.prepare_cached("SELECT id, name, album_artist_id FROM albums")?;
                let rows = stmt.query_map([], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
                })?;
                for row in rows {
                    let (id, name, album_artist_id) = row?;
                    album_ids.insert((name, album_artist_id), id);
                }
            }

            // Artist/album links and the tracks themselves.
            let mut link_stmt = tx.prepare_cached(
                "INSERT INTO artist_albums (album_id, artist_id) VALUES (?1, ?2)",
            )?;
            let mut track_stmt = tx.prepare_cached(
                "INSERT INTO tracks (title, artist_id, album_id, url, duration, album_pos, link_url, last_modified) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for track in &tracks {
                let artist_key = (track.artist.clone(), track.artist_disambiguation.clone());
                let artist_id = artist_ids
                    .get(&artist_key)
                    .copied()
                    .with_context(|| format!("Artist {:?} missing after insert", artist_key.0))?;
                let album_artist_id = resolve_album_artist_id(track)?;
                let album_key = (track.album.clone(), album_artist_id);
                let album_id = album_ids
                    .get(&album_key)
                    .copied()
                    .with_context(|| format!("Album {:?} missing after insert", album_key.0))?;

                link_stmt.execute(params![album_id, artist_id])?;
                track_stmt.execute(params![
                    track.title,
                    artist_id,
                    album_id,
                    track.url,
                    track.duration,
                    track.album_pos,
                    track.link_url,
                    track.last_modified,
                ])?;
            }
        }
        tx.commit()?;

        self.initialized.store(true, Ordering::SeqCst);
        let now = chrono::Utc::now().timestamp_millis();
        self.stamps.set_last_ingest(&self.last_update_key, now);
        info!(
            "Ingested {} tracks into {} in {:?}",
            batch.len(),
            self.store_id,
            started.elapsed()
        );
        Ok(())
    }

    /// Drop and recreate every collection table, discarding all rows.
    pub fn wipe(&self) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        for table in COLLECTION_TABLES.iter().rev() {
            conn.execute(&format!("DROP TABLE IF EXISTS {};", table.name), [])?;
        }
        for table in COLLECTION_TABLES {
            table.create(&conn)?;
        }
        warn!("Wiped collection {}", self.store_id);
        Ok(())
    }

    // =========================================================================
    // Query execution
    // =========================================================================

    /// Execute a composed query against one of the read connections and
    /// materialize every row through `mapper`.
    pub fn select<T>(
        &self,
        query: &SelectQuery,
        mapper: impl FnMut(&rusqlite::Row) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let (sql, values) = query.to_sql();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), mapper)?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(rows)
    }

    fn single_i64(&self, query: &SelectQuery) -> Result<Option<i64>> {
        Ok(self.select(query, |r| r.get::<_, i64>(0))?.into_iter().next())
    }

    fn max_last_modified(&self, table: &'static str) -> Result<Option<i64>> {
        self.single_i64(
            &SelectQuery::from(table)
                .fields(["last_modified"])
                .order_by(OrderTerm::desc("last_modified"))
                .limit(1),
        )
    }

    // =========================================================================
    // Browsing
    // =========================================================================

    const TRACK_FIELDS: [&'static str; 9] = [
        "artists.name",
        "artists.disambiguation",
        "albums.name",
        "tracks.title",
        "tracks.duration",
        "tracks.url",
        "tracks.link_url",
        "tracks.album_pos",
        "tracks.last_modified",
    ];

    fn map_track_row(row: &rusqlite::Row) -> rusqlite::Result<TrackEntry> {
        Ok(TrackEntry {
            artist_name: row.get(0)?,
            artist_disambiguation: row.get(1)?,
            album_name: row.get(2)?,
            title: row.get(3)?,
            duration: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
            url: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            link_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            album_pos: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
            last_modified: row.get(8)?,
        })
    }

    fn track_query(filter: Option<Filter>, order_by: Vec<OrderTerm>) -> SelectQuery {
        let mut query = SelectQuery::from(TABLE_TRACKS)
            .fields(Self::TRACK_FIELDS)
            .join(Join::inner(TABLE_ARTISTS).on("tracks.artist_id", "artists.id"))
            .join(Join::inner(TABLE_ALBUMS).on("tracks.album_id", "albums.id"));
        if let Some(filter) = filter {
            query = query.filter(filter);
        }
        for term in order_by {
            query = query.order_by(term);
        }
        query
    }

    /// Track listing joined to artists and albums, with an optional filter.
    pub fn tracks(
        &self,
        filter: Option<Filter>,
        order_by: Vec<OrderTerm>,
    ) -> Result<Vec<TrackEntry>> {
        self.select(&Self::track_query(filter, order_by), Self::map_track_row)
    }

    /// Every track's row id alongside the text a fuzzy index matches
    /// against (title, artist and album, space separated).
    pub fn track_search_texts(&self) -> Result<Vec<(i64, String)>> {
        let query = SelectQuery::from(TABLE_TRACKS)
            .fields(["tracks.id", "tracks.title", "artists.name", "albums.name"])
            .join(Join::inner(TABLE_ARTISTS).on("tracks.artist_id", "artists.id"))
            .join(Join::inner(TABLE_ALBUMS).on("tracks.album_id", "albums.id"));
        self.select(&query, |row| {
            let id: i64 = row.get(0)?;
            let title: String = row.get(1)?;
            let artist: String = row.get(2)?;
            let album: String = row.get(3)?;
            Ok((id, format!("{} {} {}", title, artist, album)))
        })
    }

    /// Tracks whose row ids are in `ids`, in database order.
    pub fn tracks_by_ids(&self, ids: &[i64]) -> Result<Vec<TrackEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = Filter::any_of();
        for id in ids {
            filter = filter.eq("tracks.id", *id);
        }
        self.tracks(Some(filter), Vec::new())
    }

    fn map_artist_row(row: &rusqlite::Row) -> rusqlite::Result<ArtistEntry> {
        Ok(ArtistEntry {
            name: row.get(0)?,
            disambiguation: row.get(1)?,
            last_modified: row.get(2)?,
        })
    }

    pub fn artists(&self, order_by: Vec<OrderTerm>) -> Result<Vec<ArtistEntry>> {
        let mut query = SelectQuery::from(TABLE_ARTISTS).fields([
            ARTISTS_NAME,
            ARTISTS_DISAMBIGUATION,
            ARTISTS_LAST_MODIFIED,
        ]);
        for term in order_by {
            query = query.order_by(term);
        }
        self.select(&query, Self::map_artist_row)
    }

    pub fn album_artists(&self, order_by: Vec<OrderTerm>) -> Result<Vec<ArtistEntry>> {
        let mut query = SelectQuery::from(TABLE_ALBUM_ARTISTS).fields([
            ALBUM_ARTISTS_NAME,
            ALBUM_ARTISTS_DISAMBIGUATION,
            ALBUM_ARTISTS_LAST_MODIFIED,
        ]);
        for term in order_by {
            query = query.order_by(term);
        }
        self.select(&query, Self::map_artist_row)
    }

    const ALBUM_FIELDS: [&'static str; 5] = [
        "albums.name",
        "album_artists.name",
        "album_artists.disambiguation",
        "albums.image_path",
        "albums.last_modified",
    ];

    fn map_album_row(row: &rusqlite::Row) -> rusqlite::Result<AlbumEntry> {
        Ok(AlbumEntry {
            name: row.get(0)?,
            artist_name: row.get(1)?,
            artist_disambiguation: row.get(2)?,
            image_path: row.get(3)?,
            last_modified: row.get(4)?,
        })
    }

    pub fn albums(&self, order_by: Vec<OrderTerm>) -> Result<Vec<AlbumEntry>> {
        let mut query = SelectQuery::from(TABLE_ALBUMS)
            .fields(Self::ALBUM_FIELDS)
            .join(Join::inner(TABLE_ALBUM_ARTISTS).on("albums.album_artist_id", "album_artists.id"));
        for term in order_by {
            query = query.order_by(term);
        }
        self.select(&query, Self::map_album_row)
    }

    /// Albums linked to the artist with the given natural key, ordered by
    /// album name. `None` when no such artist exists.
    pub fn artist_albums(
        &self,
        name: &str,
        disambiguation: &str,
    ) -> Result<Option<Vec<AlbumEntry>>> {
        let artist_id = match self.artist_id(name, disambiguation)? {
            Some(id) => id,
            None => {
                warn!("artist_albums - no artist named {:?}", name);
                return Ok(None);
            }
        };
        let query = SelectQuery::from(TABLE_ARTIST_ALBUMS)
            .fields(Self::ALBUM_FIELDS)
            .join(Join::inner(TABLE_ALBUMS).on("artist_albums.album_id", "albums.id"))
            .join(Join::inner(TABLE_ALBUM_ARTISTS).on("albums.album_artist_id", "album_artists.id"))
            .filter(Filter::all_of().eq("artist_albums.artist_id", artist_id))
            .order_by(OrderTerm::asc("albums.name"));
        Ok(Some(self.select(&query, Self::map_album_row)?))
    }

    /// Tracks of one album in album position order. `None` when the album
    /// artist or the album itself is unknown.
    pub fn album_tracks(&self, album: &AlbumRef) -> Result<Option<Vec<TrackEntry>>> {
        let album_id = match self.album_id(album)? {
            Some(id) => id,
            None => return Ok(None),
        };
        let filter = Filter::all_of().eq("tracks.album_id", album_id);
        Ok(Some(self.tracks(
            Some(filter),
            vec![OrderTerm::asc("tracks.album_pos")],
        )?))
    }

    // =========================================================================
    // Revisions
    // =========================================================================

    /// Newest modification timestamp over all tracks; `None` for an empty
    /// store.
    pub fn tracks_current_revision(&self) -> Result<Option<i64>> {
        self.max_last_modified(TABLE_TRACKS)
    }

    pub fn artists_current_revision(&self) -> Result<Option<i64>> {
        self.max_last_modified(TABLE_ARTISTS)
    }

    pub fn album_artists_current_revision(&self) -> Result<Option<i64>> {
        self.max_last_modified(TABLE_ALBUM_ARTISTS)
    }

    pub fn albums_current_revision(&self) -> Result<Option<i64>> {
        self.max_last_modified(TABLE_ALBUMS)
    }

    /// Revision of one artist's scope; `None` when the artist is unknown.
    pub fn artist_current_revision(
        &self,
        name: &str,
        disambiguation: &str,
    ) -> Result<Option<i64>> {
        let revision = self.single_i64(
            &SelectQuery::from(TABLE_ARTISTS)
                .fields([ARTISTS_LAST_MODIFIED])
                .filter(
                    Filter::all_of()
                        .eq("artists.name", name.to_string())
                        .eq("artists.disambiguation", disambiguation.to_string()),
                ),
        )?;
        if revision.is_none() {
            warn!("artist_current_revision - no artist named {:?}", name);
        }
        Ok(revision)
    }

    /// Revision of one album's scope; `None` when the album artist or the
    /// album is unknown.
    pub fn album_current_revision(&self, album: &AlbumRef) -> Result<Option<i64>> {
        let album_artist_id = match self
            .album_artist_id(&album.album_artist, &album.album_artist_disambiguation)?
        {
            Some(id) => id,
            None => {
                warn!(
                    "album_current_revision - no album artist named {:?}",
                    album.album_artist
                );
                return Ok(None);
            }
        };
        let revision = self.single_i64(
            &SelectQuery::from(TABLE_ALBUMS)
                .fields([ALBUMS_LAST_MODIFIED])
                .filter(
                    Filter::all_of()
                        .eq("albums.name", album.name.clone())
                        .eq("albums.album_artist_id", album_artist_id),
                ),
        )?;
        if revision.is_none() {
            warn!("album_current_revision - no album named {:?}", album.name);
        }
        Ok(revision)
    }

    // =========================================================================
    // Key lookups
    // =========================================================================

    fn artist_id(&self, name: &str, disambiguation: &str) -> Result<Option<i64>> {
        self.single_i64(
            &SelectQuery::from(TABLE_ARTISTS).fields([ID]).filter(
                Filter::all_of()
                    .eq("artists.name", name.to_string())
                    .eq("artists.disambiguation", disambiguation.to_string()),
            ),
        )
    }

    fn album_artist_id(&self, name: &str, disambiguation: &str) -> Result<Option<i64>> {
        self.single_i64(
            &SelectQuery::from(TABLE_ALBUM_ARTISTS).fields([ID]).filter(
                Filter::all_of()
                    .eq("album_artists.name", name.to_string())
                    .eq("album_artists.disambiguation", disambiguation.to_string()),
            ),
        )
    }

    fn album_id(&self, album: &AlbumRef) -> Result<Option<i64>> {
        let album_artist_id = match self
            .album_artist_id(&album.album_artist, &album.album_artist_disambiguation)?
        {
            Some(id) => id,
            None => {
                warn!("album_id - no album artist named {:?}", album.album_artist);
                return Ok(None);
            }
        };
        self.single_i64(
            &SelectQuery::from(TABLE_ALBUMS).fields([ID]).filter(
                Filter::all_of()
                    .eq("albums.name", album.name.clone())
                    .eq("albums.album_artist_id", album_artist_id),
            ),
        )
    }
}

fn bump_stamp(stamps: &mut HashMap<(String, String), i64>, key: (String, String), stamp: i64) {
    stamps
        .entry(key)
        .and_modify(|existing| *existing = (*existing).max(stamp))
        .or_insert(stamp);
}

fn read_name_key_ids(
    conn: &Connection,
    table: &'static str,
) -> Result<HashMap<(String, String), i64>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT id, name, disambiguation FROM {}", table))?;
    let mut ids = HashMap::new();
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (id, name, disambiguation) = row?;
        ids.insert((name, disambiguation), id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::super::manager::MemoryStampStore;
    use super::*;

    fn raw(title: &str, artist: &str, album: &str, last_modified: i64) -> RawTrack {
        RawTrack {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            album_artist: Some(artist.to_string()),
            last_modified,
            ..Default::default()
        }
    }

    fn open_store(dir: &Path) -> CollectionDb {
        CollectionDb::open(dir, "test", 2, Arc::new(MemoryStampStore::default())).unwrap()
    }

    #[test]
    fn ingest_then_browse() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("Breathe", "Pink Floyd", "The Dark Side of the Moon", 100),
            raw("Time", "Pink Floyd", "The Dark Side of the Moon", 110),
        ])
        .unwrap();

        let tracks = db
            .tracks(None, vec![OrderTerm::asc("tracks.title")])
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Breathe");
        assert_eq!(tracks[0].artist_name, "Pink Floyd");
        assert_eq!(tracks[0].album_name, "The Dark Side of the Moon");

        let artists = db.artists(vec![OrderTerm::asc("name")]).unwrap();
        assert_eq!(artists.len(), 1);

        let albums = db.albums(vec![OrderTerm::asc("albums.name")]).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].artist_name, "Pink Floyd");
    }

    #[test]
    fn reingestion_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        let batch = vec![
            raw("Breathe", "Pink Floyd", "The Dark Side of the Moon", 100),
            raw("Time", "Pink Floyd", "The Dark Side of the Moon", 110),
        ];
        db.ingest(&batch).unwrap();
        db.ingest(&batch).unwrap();

        assert_eq!(db.tracks(None, Vec::new()).unwrap().len(), 2);
        assert_eq!(db.artists(Vec::new()).unwrap().len(), 1);
        assert_eq!(db.albums(Vec::new()).unwrap().len(), 1);
    }

    #[test]
    fn multi_artist_album_becomes_a_compilation() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("Song A", "Artist X", "Mixtape", 10),
            raw("Song B", "Artist Y", "Mixtape", 20),
        ])
        .unwrap();

        // Both real artists exist and keep their own track attribution.
        let artists = db.artists(vec![OrderTerm::asc("name")]).unwrap();
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Artist X", "Artist Y"]);

        let tracks = db.tracks(None, vec![OrderTerm::asc("tracks.title")]).unwrap();
        assert_eq!(tracks[0].artist_name, "Artist X");
        assert_eq!(tracks[1].artist_name, "Artist Y");

        // The album is attributed to the sentinel.
        let albums = db.albums(Vec::new()).unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].artist_name, COMPILATION_ARTIST_NAME);
    }

    #[test]
    fn single_artist_album_keeps_its_album_artist() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("Track 1", "Solo Act", "Debut", 10),
            raw("Track 2", "Solo Act", "Debut", 20),
        ])
        .unwrap();

        let albums = db.albums(Vec::new()).unwrap();
        assert_eq!(albums[0].artist_name, "Solo Act");
    }

    #[test]
    fn revision_advances_with_new_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        assert_eq!(db.tracks_current_revision().unwrap(), None);

        db.ingest(&[raw("One", "A", "First", 100)]).unwrap();
        assert_eq!(db.tracks_current_revision().unwrap(), Some(100));

        // A conflicting re-insert with a newer stamp is a no-op.
        db.ingest(&[raw("One", "A", "First", 500)]).unwrap();
        assert_eq!(db.tracks_current_revision().unwrap(), Some(100));

        // A genuinely new row advances the revision.
        db.ingest(&[raw("Two", "A", "First", 300)]).unwrap();
        assert_eq!(db.tracks_current_revision().unwrap(), Some(300));
    }

    #[test]
    fn batch_stamps_use_the_per_key_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("One", "A", "First", 300),
            raw("Two", "A", "First", 100),
        ])
        .unwrap();

        let artists = db.artists(Vec::new()).unwrap();
        assert_eq!(artists[0].last_modified, 300);
        assert_eq!(db.albums_current_revision().unwrap(), Some(300));
    }

    #[test]
    fn unknown_artist_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());
        db.ingest(&[raw("One", "A", "First", 10)]).unwrap();

        assert!(db.artist_albums("Queen", "").unwrap().is_none());
        assert!(db.artist_current_revision("Queen", "").unwrap().is_none());
        assert!(db
            .album_current_revision(&AlbumRef {
                name: "Greatest Hits".to_string(),
                album_artist: "Queen".to_string(),
                album_artist_disambiguation: String::new(),
            })
            .unwrap()
            .is_none());
    }

    #[test]
    fn album_tracks_are_ordered_by_album_pos() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        let mut first = raw("Opener", "Band", "Record", 10);
        first.album_pos = 1;
        let mut second = raw("Closer", "Band", "Record", 20);
        second.album_pos = 2;
        // Ingested out of order on purpose.
        db.ingest(&[second, first]).unwrap();

        let tracks = db
            .album_tracks(&AlbumRef {
                name: "Record".to_string(),
                album_artist: "Band".to_string(),
                album_artist_disambiguation: String::new(),
            })
            .unwrap()
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Opener");
        assert_eq!(tracks[1].title, "Closer");
    }

    #[test]
    fn artist_albums_lists_linked_albums() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("S1", "Band", "Beta", 10),
            raw("S2", "Band", "Alpha", 20),
            raw("S3", "Other", "Gamma", 30),
        ])
        .unwrap();

        let albums = db.artist_albums("Band", "").unwrap().unwrap();
        let names: Vec<&str> = albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn tracks_by_ids_uses_an_or_filter() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[
            raw("One", "A", "First", 10),
            raw("Two", "A", "First", 20),
            raw("Three", "A", "First", 30),
        ])
        .unwrap();

        assert_eq!(db.tracks_by_ids(&[]).unwrap().len(), 0);
        assert_eq!(db.tracks_by_ids(&[1, 3]).unwrap().len(), 2);
    }

    #[test]
    fn failed_ingest_rolls_back_every_earlier_stage() {
        let dir = tempfile::tempdir().unwrap();
        let stamps = Arc::new(MemoryStampStore::default());
        let db = CollectionDb::open(dir.path(), "test", 1, stamps.clone()).unwrap();

        // Make the final insert stage fail mid-transaction.
        let side = Connection::open(dir.path().join("test_collection.db")).unwrap();
        side.execute("DROP TABLE tracks", []).unwrap();

        assert!(db.ingest(&[raw("One", "A", "First", 10)]).is_err());

        // The artist and album stages committed nothing.
        assert_eq!(db.artists(Vec::new()).unwrap().len(), 0);
        assert_eq!(db.album_artists(Vec::new()).unwrap().len(), 0);
        assert_eq!(db.albums(Vec::new()).unwrap().len(), 0);
        assert!(!db.is_initialized());
        assert!(stamps.last_ingest(db.last_update_key()).is_none());
    }

    #[test]
    fn wipe_discards_everything() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_store(dir.path());

        db.ingest(&[raw("One", "A", "First", 10)]).unwrap();
        db.wipe().unwrap();

        assert_eq!(db.tracks(None, Vec::new()).unwrap().len(), 0);
        assert_eq!(db.tracks_current_revision().unwrap(), None);

        // The store stays usable after a wipe.
        db.ingest(&[raw("Two", "B", "Second", 20)]).unwrap();
        assert_eq!(db.tracks(None, Vec::new()).unwrap().len(), 1);
    }

    #[test]
    fn ingest_marks_the_store_initialized_and_stamps_it() {
        let dir = tempfile::tempdir().unwrap();
        let stamps = Arc::new(MemoryStampStore::default());
        let db = CollectionDb::open(dir.path(), "test", 1, stamps.clone()).unwrap();

        assert!(!db.is_initialized());
        assert!(stamps.last_ingest(db.last_update_key()).is_none());

        db.ingest(&[raw("One", "A", "First", 10)]).unwrap();

        assert!(db.is_initialized());
        assert!(stamps.last_ingest(db.last_update_key()).is_some());
    }
}
