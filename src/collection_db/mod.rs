mod manager;
mod models;
mod query;
mod schema;
mod store;

pub use manager::{CollectionDbManager, JsonFileStampStore, MemoryStampStore, StampStore};
pub use models::{AlbumEntry, AlbumRef, ArtistEntry, RawTrack, TrackEntry, TrackResult};
pub use query::{Conjunction, Direction, Filter, Join, OrderTerm, Projection, SelectQuery};
pub use schema::COMPILATION_ARTIST_NAME;
pub use store::CollectionDb;
