//! Collection Store Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod collection;
pub mod collection_db;
pub mod pipeline;
pub mod resolution_gate;
pub mod revision_cache;
pub mod sqlite_persistence;
pub mod workers;

// Re-export commonly used types for convenience
pub use collection::{DbCollection, SortMode};
pub use collection_db::{
    CollectionDb, CollectionDbManager, JsonFileStampStore, MemoryStampStore, RawTrack, StampStore,
    TrackResult,
};
pub use pipeline::{FuzzyIndex, IndexHit, LogReportSink, ReportSink, SubstringFuzzyIndex};
pub use resolution_gate::SearchQuery;
pub use workers::{TokioWorkerPool, WorkerPool};
