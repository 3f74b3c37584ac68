//! Shared fixtures for the end-to-end tests.

use collection_store::collection_db::TrackResult;
use collection_store::{
    CollectionDbManager, DbCollection, JsonFileStampStore, RawTrack, ReportSink, SearchQuery,
    TokioWorkerPool,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const STORE_ID: &str = "local-files";

/// A report sink the tests can inspect.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(SearchQuery, Vec<TrackResult>, String)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(SearchQuery, Vec<TrackResult>, String)> {
        self.reports.lock().unwrap().clone()
    }

    pub async fn wait_for_reports(&self, count: usize) {
        for _ in 0..200 {
            if self.reports.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Timed out waiting for {} report(s)", count);
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, query: &SearchQuery, results: Vec<TrackResult>, resolver_id: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((query.clone(), results, resolver_id.to_string()));
    }
}

/// One store-backed collection in a temporary directory.
pub struct TestCollection {
    pub collection: DbCollection,
    pub sink: Arc<RecordingSink>,
    pub db_dir: tempfile::TempDir,
}

impl TestCollection {
    pub fn new() -> Self {
        Self::with_store_id(STORE_ID)
    }

    pub fn with_store_id(store_id: &str) -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let stamps =
            Arc::new(JsonFileStampStore::open(db_dir.path().join("stamps.json")).unwrap());
        let manager = Arc::new(CollectionDbManager::new(db_dir.path().to_path_buf(), 2, stamps));
        let sink = Arc::new(RecordingSink::default());
        let collection = DbCollection::with_id(
            store_id,
            manager,
            Arc::new(TokioWorkerPool::new(2)),
            sink.clone(),
        );
        TestCollection {
            collection,
            sink,
            db_dir,
        }
    }
}

pub fn track(title: &str, artist: &str, album: &str, last_modified: i64) -> RawTrack {
    RawTrack {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        album: Some(album.to_string()),
        album_artist: Some(artist.to_string()),
        url: Some(format!(
            "file:///music/{}/{}.ogg",
            album.replace(' ', "_"),
            title.replace(' ', "_")
        )),
        duration: 240_000,
        last_modified,
        ..Default::default()
    }
}

pub fn album_batch(artist: &str, album: &str, titles: &[&str], last_modified: i64) -> Vec<RawTrack> {
    titles
        .iter()
        .enumerate()
        .map(|(index, title)| {
            let mut t = track(title, artist, album, last_modified);
            t.album_pos = index as i64 + 1;
            t
        })
        .collect()
}
