//! The user-facing collection: revision-cached browsing, gated resolution
//! and prioritized ingestion over one store's database.
//!
//! The store id may arrive late (sources announce themselves
//! asynchronously), so it is held as a shared future and every operation
//! awaits it before touching the database.

use crate::collection_db::{AlbumRef, CollectionDbManager, OrderTerm, RawTrack, TrackResult};
use crate::pipeline::{FuzzyIndex, ReportSink, SubstringFuzzyIndex};
use crate::resolution_gate::{ResolutionGate, SearchQuery, Submission};
use crate::revision_cache::{MaterializedView, RevisionCache, Scope, SortKey, ViewRows};
use crate::workers::{TaskPriority, WorkerPool};
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, warn};

/// Row orderings a browse view can be materialized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Alphabetical,
    ArtistAlphabetical,
    LastModified,
}

pub struct DbCollection {
    store_id: Shared<BoxFuture<'static, Arc<str>>>,
    manager: Arc<CollectionDbManager>,
    pool: Arc<dyn WorkerPool>,
    gate: Arc<ResolutionGate>,
    cache: RevisionCache,
    sink: Arc<dyn ReportSink>,
}

impl DbCollection {
    /// A collection whose store id resolves later.
    pub fn new(
        store_id: impl Future<Output = String> + Send + 'static,
        manager: Arc<CollectionDbManager>,
        pool: Arc<dyn WorkerPool>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        DbCollection {
            store_id: store_id.map(Arc::from).boxed().shared(),
            manager,
            pool,
            gate: Arc::new(ResolutionGate::new()),
            cache: RevisionCache::new(),
            sink,
        }
    }

    /// A collection whose store id is already known.
    pub fn with_id(
        store_id: &str,
        manager: Arc<CollectionDbManager>,
        pool: Arc<dyn WorkerPool>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self::new(
            futures::future::ready(store_id.to_string()),
            manager,
            pool,
            sink,
        )
    }

    pub async fn store_id(&self) -> Arc<str> {
        self.store_id.clone().await
    }

    async fn db(&self) -> Result<Arc<crate::collection_db::CollectionDb>> {
        let store_id = self.store_id.clone().await;
        self.manager.get_or_open(&store_id)
    }

    /// True until the store has ingested its first batch.
    pub async fn is_initializing(&self) -> Result<bool> {
        Ok(!self.db().await?.is_initialized())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Ingest a batch through the worker pool at maintenance priority and
    /// wait for the outcome.
    pub async fn ingest(&self, batch: Vec<RawTrack>) -> Result<()> {
        let db = self.db().await?;
        let (tx, rx) = oneshot::channel();
        self.pool.execute(
            TaskPriority::DatabaseMaintenance,
            Box::new(move || {
                let _ = tx.send(db.ingest(&batch));
            }),
        )?;
        rx.await.context("Ingest worker dropped its result")?
    }

    /// Discard every row of the store.
    pub async fn wipe(&self) -> Result<()> {
        let db = self.db().await?;
        let (tx, rx) = oneshot::channel();
        self.pool.execute(
            TaskPriority::DatabaseMaintenance,
            Box::new(move || {
                let _ = tx.send(db.wipe());
            }),
        )?;
        rx.await.context("Wipe worker dropped its result")?
    }

    // =========================================================================
    // Revision-cached browsing
    // =========================================================================

    /// All tracks in the given order. `None` when the sort is not
    /// supported for this scope.
    pub async fn tracks(&self, sort: SortMode) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let order = match sort {
            SortMode::Alphabetical => vec![OrderTerm::asc("tracks.title")],
            SortMode::ArtistAlphabetical => vec![
                OrderTerm::asc("artists.name"),
                OrderTerm::asc("albums.name"),
                OrderTerm::asc("tracks.album_pos"),
            ],
            SortMode::LastModified => vec![OrderTerm::desc("tracks.last_modified")],
        };
        let revision = db.tracks_current_revision()?;
        let scope = Scope::Tracks {
            sort: sort_key(sort),
        };
        let key = scope.cache_key(&self.store_id().await, revision);
        let view = self.cache.get_or_build(&key, || {
            Ok(MaterializedView {
                key: key.clone(),
                revision: revision.unwrap_or(-1),
                rows: ViewRows::Tracks(db.tracks(None, order)?),
            })
        })?;
        Ok(Some(view))
    }

    pub async fn artists(&self, sort: SortMode) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let Some(order) = artist_order(sort) else {
            warn!("artists - unsupported sort {:?}", sort);
            return Ok(None);
        };
        let revision = db.artists_current_revision()?;
        let scope = Scope::Artists {
            sort: sort_key(sort),
        };
        let key = scope.cache_key(&self.store_id().await, revision);
        let view = self.cache.get_or_build(&key, || {
            Ok(MaterializedView {
                key: key.clone(),
                revision: revision.unwrap_or(-1),
                rows: ViewRows::Artists(db.artists(order)?),
            })
        })?;
        Ok(Some(view))
    }

    pub async fn album_artists(&self, sort: SortMode) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let Some(order) = artist_order(sort) else {
            warn!("album_artists - unsupported sort {:?}", sort);
            return Ok(None);
        };
        let revision = db.album_artists_current_revision()?;
        let scope = Scope::AlbumArtists {
            sort: sort_key(sort),
        };
        let key = scope.cache_key(&self.store_id().await, revision);
        let view = self.cache.get_or_build(&key, || {
            Ok(MaterializedView {
                key: key.clone(),
                revision: revision.unwrap_or(-1),
                rows: ViewRows::Artists(db.album_artists(order)?),
            })
        })?;
        Ok(Some(view))
    }

    pub async fn albums(&self, sort: SortMode) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let order = match sort {
            SortMode::Alphabetical => vec![OrderTerm::asc("albums.name")],
            SortMode::ArtistAlphabetical => vec![
                OrderTerm::asc("album_artists.name"),
                OrderTerm::asc("albums.name"),
            ],
            SortMode::LastModified => vec![OrderTerm::desc("albums.last_modified")],
        };
        let revision = db.albums_current_revision()?;
        let scope = Scope::Albums {
            sort: sort_key(sort),
        };
        let key = scope.cache_key(&self.store_id().await, revision);
        let view = self.cache.get_or_build(&key, || {
            Ok(MaterializedView {
                key: key.clone(),
                revision: revision.unwrap_or(-1),
                rows: ViewRows::Albums(db.albums(order)?),
            })
        })?;
        Ok(Some(view))
    }

    /// The albums linked to one artist. `None` for an unknown artist.
    pub async fn artist_albums(
        &self,
        name: &str,
        disambiguation: &str,
    ) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let Some(revision) = db.artist_current_revision(name, disambiguation)? else {
            return Ok(None);
        };
        let scope = Scope::ArtistAlbums {
            name: name.to_string(),
            disambiguation: disambiguation.to_string(),
        };
        let key = scope.cache_key(&self.store_id().await, Some(revision));
        let view = self.cache.get_or_build(&key, || {
            let rows = db.artist_albums(name, disambiguation)?.unwrap_or_default();
            Ok(MaterializedView {
                key: key.clone(),
                revision,
                rows: ViewRows::Albums(rows),
            })
        })?;
        Ok(Some(view))
    }

    /// One album's tracks in album order. `None` for an unknown album.
    pub async fn album_tracks(&self, album: &AlbumRef) -> Result<Option<Arc<MaterializedView>>> {
        let db = self.db().await?;
        let Some(revision) = db.album_current_revision(album)? else {
            return Ok(None);
        };
        let scope = Scope::AlbumTracks {
            name: album.name.clone(),
            album_artist: album.album_artist.clone(),
            album_artist_disambiguation: album.album_artist_disambiguation.clone(),
        };
        let key = scope.cache_key(&self.store_id().await, Some(revision));
        let album = album.clone();
        let view = self.cache.get_or_build(&key, || {
            let rows = db.album_tracks(&album)?.unwrap_or_default();
            Ok(MaterializedView {
                key: key.clone(),
                revision,
                rows: ViewRows::Tracks(rows),
            })
        })?;
        Ok(Some(view))
    }

    pub async fn album_track_count(&self, album: &AlbumRef) -> Result<Option<usize>> {
        Ok(self
            .album_tracks(album)
            .await?
            .map(|view| view.rows.len()))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a free-text query. Before the fuzzy index is ready the
    /// query is parked and replayed by [`DbCollection::notify_index_ready`];
    /// afterwards it is dispatched immediately. Results always reach the
    /// report sink, even empty ones.
    pub async fn resolve(&self, query: SearchQuery) -> Result<()> {
        match self.gate.submit(query.clone()) {
            Submission::Deferred => Ok(()),
            Submission::Resolve(index) => {
                // Queries that raced the ready transition may still be
                // parked; pick them up before resolving this one. A failed
                // dispatch must not abort the rest, drained queries are
                // already out of the waiting set.
                for leftover in self.gate.drain_if_ready() {
                    if let Err(e) = self.dispatch_resolution(leftover.clone(), index.clone()).await
                    {
                        error!(
                            "Failed to dispatch deferred query {:?}: {:#}",
                            leftover.fulltext, e
                        );
                    }
                }
                self.dispatch_resolution(query, index).await
            }
        }
    }

    /// Note that an index build has started.
    pub fn notify_index_building(&self) {
        self.gate.mark_initializing();
    }

    /// Install the ready index and replay every parked query. Dispatch
    /// failures are logged and skipped: the drain already removed the
    /// queries from the waiting set, so bailing out would drop the rest.
    pub async fn notify_index_ready(&self, index: Arc<dyn FuzzyIndex>) -> Result<()> {
        for query in self.gate.mark_ready(index.clone()) {
            if let Err(e) = self.dispatch_resolution(query.clone(), index.clone()).await {
                error!(
                    "Failed to dispatch deferred query {:?}: {:#}",
                    query.fulltext, e
                );
            }
        }
        Ok(())
    }

    /// Build the bundled substring index from the store's current tracks
    /// and mark the gate ready with it.
    pub async fn rebuild_index(&self) -> Result<()> {
        self.notify_index_building();
        let db = self.db().await?;
        let index = Arc::new(SubstringFuzzyIndex::new(db.track_search_texts()?));
        self.notify_index_ready(index).await
    }

    async fn dispatch_resolution(
        &self,
        query: SearchQuery,
        index: Arc<dyn FuzzyIndex>,
    ) -> Result<()> {
        let db = self.db().await?;
        let store_id = self.store_id().await;
        let sink = self.sink.clone();
        self.pool.execute(
            TaskPriority::Resolving,
            Box::new(move || {
                let ids: Vec<i64> = index.search(&query).iter().map(|h| h.track_id).collect();
                match db.tracks_by_ids(&ids) {
                    Ok(tracks) => {
                        let results = tracks
                            .into_iter()
                            .map(|track| TrackResult { track })
                            .collect();
                        sink.report(&query, results, &store_id);
                    }
                    Err(e) => error!("Failed to resolve {:?}: {:#}", query.fulltext, e),
                }
            }),
        )?;
        Ok(())
    }
}

fn sort_key(sort: SortMode) -> SortKey {
    match sort {
        SortMode::Alphabetical => SortKey::Alphabetical,
        SortMode::ArtistAlphabetical => SortKey::ArtistAlphabetical,
        SortMode::LastModified => SortKey::LastModified,
    }
}

fn artist_order(sort: SortMode) -> Option<Vec<OrderTerm>> {
    match sort {
        SortMode::Alphabetical => Some(vec![OrderTerm::asc("name")]),
        SortMode::LastModified => Some(vec![OrderTerm::desc("last_modified")]),
        SortMode::ArtistAlphabetical => None,
    }
}
