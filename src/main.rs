use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use collection_store::collection_db::AlbumRef;
use collection_store::revision_cache::ViewRows;
use collection_store::{
    CollectionDbManager, DbCollection, JsonFileStampStore, LogReportSink, RawTrack, ReportSink,
    SearchQuery, SortMode, TokioWorkerPool, TrackResult,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STAMP_FILE_NAME: &str = "collection_stamps.json";
const READ_POOL_SIZE: usize = 4;
const WORKER_CONCURRENCY: usize = 4;

/// Canonicalize where possible; a path that does not exist yet is kept
/// as given, anchored to the current directory when relative.
fn parse_path(s: &str) -> Result<PathBuf> {
    let resolved = match PathBuf::from(s).canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PathBuf::from(s),
        Err(e) => return Err(e).with_context(|| format!("Error resolving path: {}", s)),
    };
    if resolved.is_absolute() {
        Ok(resolved)
    } else {
        Ok(std::env::current_dir()?.join(resolved))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Alpha,
    ArtistAlpha,
    LastModified,
}

impl From<SortArg> for SortMode {
    fn from(sort: SortArg) -> SortMode {
        match sort {
            SortArg::Alpha => SortMode::Alphabetical,
            SortArg::ArtistAlpha => SortMode::ArtistAlphabetical,
            SortArg::LastModified => SortMode::LastModified,
        }
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the collection database files.
    #[clap(value_parser = parse_path)]
    pub db_dir: PathBuf,

    /// Id of the collection store to operate on.
    pub store_id: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a JSON batch of raw tracks.
    Ingest {
        /// Path to a JSON file holding an array of raw track records.
        #[clap(value_parser = parse_path)]
        batch_file: PathBuf,
    },
    /// List every track.
    Tracks {
        #[clap(long, value_enum, default_value = "alpha")]
        sort: SortArg,
    },
    /// List every track artist.
    Artists {
        #[clap(long, value_enum, default_value = "alpha")]
        sort: SortArg,
    },
    /// List every album artist, including the compilation sentinel.
    AlbumArtists {
        #[clap(long, value_enum, default_value = "alpha")]
        sort: SortArg,
    },
    /// List every album.
    Albums {
        #[clap(long, value_enum, default_value = "alpha")]
        sort: SortArg,
    },
    /// List the albums linked to one artist.
    ArtistAlbums {
        name: String,
        #[clap(long, default_value = "")]
        disambiguation: String,
    },
    /// List one album's tracks in album order.
    AlbumTracks {
        album: String,
        album_artist: String,
        #[clap(long, default_value = "")]
        disambiguation: String,
    },
    /// Resolve a free-text query against the store.
    Search { query: String },
    /// Discard every row of the store.
    Wipe,
}

/// Prints resolved tracks as JSON lines and signals completion.
struct PrintSink {
    done: Mutex<Option<tokio::sync::oneshot::Sender<usize>>>,
}

impl ReportSink for PrintSink {
    fn report(&self, _query: &SearchQuery, results: Vec<TrackResult>, _resolver_id: &str) {
        for result in &results {
            match serde_json::to_string(result) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to serialize result: {}", e),
            }
        }
        if let Some(done) = self.done.lock().unwrap().take() {
            let _ = done.send(results.len());
        }
    }
}

fn print_view(view: Option<Arc<collection_store::revision_cache::MaterializedView>>) -> Result<()> {
    let Some(view) = view else {
        info!("Nothing to list");
        return Ok(());
    };
    match &view.rows {
        ViewRows::Tracks(rows) => {
            for row in rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
        ViewRows::Artists(rows) => {
            for row in rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
        ViewRows::Albums(rows) => {
            for row in rows {
                println!("{}", serde_json::to_string(row)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let stamps = Arc::new(JsonFileStampStore::open(
        cli_args.db_dir.join(STAMP_FILE_NAME),
    )?);
    let manager = Arc::new(CollectionDbManager::new(
        cli_args.db_dir.clone(),
        READ_POOL_SIZE,
        stamps,
    ));
    let pool = Arc::new(TokioWorkerPool::new(WORKER_CONCURRENCY));

    match cli_args.command {
        Command::Ingest { batch_file } => {
            let content = std::fs::read_to_string(&batch_file)
                .with_context(|| format!("Failed to read batch file {:?}", batch_file))?;
            let batch: Vec<RawTrack> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse batch file {:?}", batch_file))?;
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            let count = batch.len();
            collection.ingest(batch).await?;
            info!("Ingested {} track(s)", count);
        }
        Command::Tracks { sort } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(collection.tracks(sort.into()).await?)?;
        }
        Command::Artists { sort } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(collection.artists(sort.into()).await?)?;
        }
        Command::AlbumArtists { sort } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(collection.album_artists(sort.into()).await?)?;
        }
        Command::Albums { sort } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(collection.albums(sort.into()).await?)?;
        }
        Command::ArtistAlbums {
            name,
            disambiguation,
        } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(collection.artist_albums(&name, &disambiguation).await?)?;
        }
        Command::AlbumTracks {
            album,
            album_artist,
            disambiguation,
        } => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            print_view(
                collection
                    .album_tracks(&AlbumRef {
                        name: album,
                        album_artist,
                        album_artist_disambiguation: disambiguation,
                    })
                    .await?,
            )?;
        }
        Command::Search { query } => {
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            let sink = Arc::new(PrintSink {
                done: Mutex::new(Some(done_tx)),
            });
            let collection = DbCollection::with_id(&cli_args.store_id, manager, pool, sink);
            collection.rebuild_index().await?;
            collection.resolve(SearchQuery::new(query)).await?;
            let count = tokio::time::timeout(Duration::from_secs(30), done_rx)
                .await
                .context("Timed out waiting for resolution")?
                .context("Resolution worker dropped its report")?;
            info!("Resolved {} result(s)", count);
        }
        Command::Wipe => {
            let collection =
                DbCollection::with_id(&cli_args.store_id, manager, pool, Arc::new(LogReportSink));
            collection.wipe().await?;
            info!("Wiped store {}", cli_args.store_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_path_anchors_missing_relative_paths_to_cwd() {
        let parsed = parse_path("no-such-dir/batch.json").unwrap();
        assert!(parsed.is_absolute());
        assert!(parsed.ends_with("no-such-dir/batch.json"));
    }

    #[test]
    fn parse_path_keeps_missing_absolute_paths_as_given() {
        let parsed = parse_path("/no-such-dir/batch.json").unwrap();
        assert_eq!(parsed, PathBuf::from("/no-such-dir/batch.json"));
    }
}
