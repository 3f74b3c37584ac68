//! SQLite schema for a per-source collection database.
//!
//! Five normalized tables: artists, album artists (a parallel table used
//! only to attribute albums, which may hold the "Various Artists"
//! sentinel), albums, the artist/album many-to-many link, and tracks.
//! Every natural key is unique with `ON CONFLICT IGNORE`, so re-ingesting
//! known rows silently deduplicates.

use crate::sqlite_persistence::{
    Column, ForeignKey, Migration, MigrationKind, SqlType, Table, Unique, VersionedSchema,
};
use anyhow::Result;
use rusqlite::Connection;

pub const ID: &str = "id";

pub const TABLE_ARTISTS: &str = "artists";
pub const ARTISTS_NAME: &str = "name";
pub const ARTISTS_DISAMBIGUATION: &str = "disambiguation";
pub const ARTISTS_LAST_MODIFIED: &str = "last_modified";

pub const TABLE_ALBUM_ARTISTS: &str = "album_artists";
pub const ALBUM_ARTISTS_NAME: &str = "name";
pub const ALBUM_ARTISTS_DISAMBIGUATION: &str = "disambiguation";
pub const ALBUM_ARTISTS_LAST_MODIFIED: &str = "last_modified";

pub const TABLE_ALBUMS: &str = "albums";
pub const ALBUMS_NAME: &str = "name";
pub const ALBUMS_ALBUM_ARTIST_ID: &str = "album_artist_id";
pub const ALBUMS_IMAGE_PATH: &str = "image_path";
pub const ALBUMS_LAST_MODIFIED: &str = "last_modified";

pub const TABLE_ARTIST_ALBUMS: &str = "artist_albums";
pub const ARTIST_ALBUMS_ALBUM_ID: &str = "album_id";
pub const ARTIST_ALBUMS_ARTIST_ID: &str = "artist_id";

pub const TABLE_TRACKS: &str = "tracks";
pub const TRACKS_TITLE: &str = "title";
pub const TRACKS_ARTIST_ID: &str = "artist_id";
pub const TRACKS_ALBUM_ID: &str = "album_id";
pub const TRACKS_URL: &str = "url";
pub const TRACKS_DURATION: &str = "duration";
pub const TRACKS_ALBUM_POS: &str = "album_pos";
pub const TRACKS_LINK_URL: &str = "link_url";
pub const TRACKS_LAST_MODIFIED: &str = "last_modified";

/// The synthetic album-artist name substituted when an album's tracks have
/// more than one distinct artist.
pub const COMPILATION_ARTIST_NAME: &str = "Various Artists";

const ARTISTS_TABLE: Table = Table {
    name: TABLE_ARTISTS,
    columns: &[
        Column::new(ID, SqlType::Integer).primary_key(),
        Column::new(ARTISTS_NAME, SqlType::Text).non_null(),
        Column::new(ARTISTS_DISAMBIGUATION, SqlType::Text).non_null(),
        Column::new(ARTISTS_LAST_MODIFIED, SqlType::Integer).non_null(),
    ],
    uniques: &[Unique {
        columns: &[ARTISTS_NAME, ARTISTS_DISAMBIGUATION],
        ignore_conflicts: true,
    }],
    foreign_keys: &[],
};

const ALBUM_ARTISTS_TABLE: Table = Table {
    name: TABLE_ALBUM_ARTISTS,
    columns: &[
        Column::new(ID, SqlType::Integer).primary_key(),
        Column::new(ALBUM_ARTISTS_NAME, SqlType::Text).non_null(),
        Column::new(ALBUM_ARTISTS_DISAMBIGUATION, SqlType::Text).non_null(),
        Column::new(ALBUM_ARTISTS_LAST_MODIFIED, SqlType::Integer).non_null(),
    ],
    uniques: &[Unique {
        columns: &[ALBUM_ARTISTS_NAME, ALBUM_ARTISTS_DISAMBIGUATION],
        ignore_conflicts: true,
    }],
    foreign_keys: &[],
};

const ALBUMS_TABLE: Table = Table {
    name: TABLE_ALBUMS,
    columns: &[
        Column::new(ID, SqlType::Integer).primary_key(),
        Column::new(ALBUMS_NAME, SqlType::Text).non_null(),
        Column::new(ALBUMS_ALBUM_ARTIST_ID, SqlType::Integer).non_null(),
        Column::new(ALBUMS_IMAGE_PATH, SqlType::Text),
        Column::new(ALBUMS_LAST_MODIFIED, SqlType::Integer).non_null(),
    ],
    uniques: &[Unique {
        columns: &[ALBUMS_NAME, ALBUMS_ALBUM_ARTIST_ID],
        ignore_conflicts: true,
    }],
    foreign_keys: &[ForeignKey {
        column: ALBUMS_ALBUM_ARTIST_ID,
        references: TABLE_ALBUM_ARTISTS,
        ref_column: ID,
    }],
};

const ARTIST_ALBUMS_TABLE: Table = Table {
    name: TABLE_ARTIST_ALBUMS,
    columns: &[
        Column::new(ID, SqlType::Integer).primary_key(),
        Column::new(ARTIST_ALBUMS_ALBUM_ID, SqlType::Integer).non_null(),
        Column::new(ARTIST_ALBUMS_ARTIST_ID, SqlType::Integer).non_null(),
    ],
    uniques: &[Unique {
        columns: &[ARTIST_ALBUMS_ALBUM_ID, ARTIST_ALBUMS_ARTIST_ID],
        ignore_conflicts: true,
    }],
    foreign_keys: &[
        ForeignKey {
            column: ARTIST_ALBUMS_ALBUM_ID,
            references: TABLE_ALBUMS,
            ref_column: ID,
        },
        ForeignKey {
            column: ARTIST_ALBUMS_ARTIST_ID,
            references: TABLE_ARTISTS,
            ref_column: ID,
        },
    ],
};

const TRACKS_TABLE: Table = Table {
    name: TABLE_TRACKS,
    columns: &[
        Column::new(ID, SqlType::Integer).primary_key(),
        Column::new(TRACKS_TITLE, SqlType::Text).non_null(),
        Column::new(TRACKS_ARTIST_ID, SqlType::Integer).non_null(),
        Column::new(TRACKS_ALBUM_ID, SqlType::Integer).non_null(),
        Column::new(TRACKS_URL, SqlType::Text),
        Column::new(TRACKS_DURATION, SqlType::Integer),
        Column::new(TRACKS_ALBUM_POS, SqlType::Integer),
        Column::new(TRACKS_LINK_URL, SqlType::Text),
        Column::new(TRACKS_LAST_MODIFIED, SqlType::Integer).non_null(),
    ],
    uniques: &[Unique {
        columns: &[TRACKS_TITLE, TRACKS_ARTIST_ID, TRACKS_ALBUM_ID],
        ignore_conflicts: true,
    }],
    foreign_keys: &[
        ForeignKey {
            column: TRACKS_ARTIST_ID,
            references: TABLE_ARTISTS,
            ref_column: ID,
        },
        ForeignKey {
            column: TRACKS_ALBUM_ID,
            references: TABLE_ALBUMS,
            ref_column: ID,
        },
    ],
};

pub const COLLECTION_TABLES: &[Table] = &[
    ARTISTS_TABLE,
    ALBUM_ARTISTS_TABLE,
    ALBUMS_TABLE,
    ARTIST_ALBUMS_TABLE,
    TRACKS_TABLE,
];

fn add_album_image_path(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE albums ADD COLUMN image_path TEXT", [])?;
    Ok(())
}

fn rebuild_all_tables(conn: &Connection) -> Result<()> {
    // Children before parents, so the foreign keys never dangle mid-step.
    for table in COLLECTION_TABLES.iter().rev() {
        conn.execute(&format!("DROP TABLE IF EXISTS {};", table.name), [])?;
    }
    for table in COLLECTION_TABLES {
        table.create(conn)?;
    }
    Ok(())
}

/// All schema versions of the collection database. Version 2 added album
/// cover paths; version 3 split album artists out of the artists table,
/// which required a full rebuild.
pub const COLLECTION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: COLLECTION_TABLES,
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: COLLECTION_TABLES,
        migration: Some(Migration {
            kind: MigrationKind::Additive,
            description: "add albums.image_path",
            apply: add_album_image_path,
        }),
    },
    VersionedSchema {
        version: 3,
        tables: COLLECTION_TABLES,
        migration: Some(Migration {
            kind: MigrationKind::Destructive,
            description: "rebuild all collection tables for the album_artists split",
            apply: rebuild_all_tables,
        }),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::open_schema;

    #[test]
    fn schema_creates_successfully() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_schema(&mut conn, COLLECTION_VERSIONED_SCHEMAS).unwrap();

        for table in COLLECTION_TABLES {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |r| {
                    r.get(0)
                })
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn duplicate_natural_keys_are_ignored() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_schema(&mut conn, COLLECTION_VERSIONED_SCHEMAS).unwrap();

        for _ in 0..2 {
            conn.execute(
                "INSERT INTO artists (name, disambiguation, last_modified) VALUES ('Queen', '', 10)",
                [],
            )
            .unwrap();
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM artists", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // Same name under a different disambiguation is a distinct key.
        conn.execute(
            "INSERT INTO artists (name, disambiguation, last_modified) VALUES ('Queen', 'tribute band', 11)",
            [],
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM artists", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn conflicting_insert_does_not_advance_last_modified() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_schema(&mut conn, COLLECTION_VERSIONED_SCHEMAS).unwrap();

        conn.execute(
            "INSERT INTO artists (name, disambiguation, last_modified) VALUES ('Kraftwerk', '', 100)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO artists (name, disambiguation, last_modified) VALUES ('Kraftwerk', '', 999)",
            [],
        )
        .unwrap();

        let last_modified: i64 = conn
            .query_row(
                "SELECT last_modified FROM artists WHERE name = 'Kraftwerk'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(last_modified, 100);
    }

    #[test]
    fn destructive_migration_wipes_legacy_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        // Simulate a v2 store with data.
        COLLECTION_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.pragma_update(
            None,
            "user_version",
            crate::sqlite_persistence::BASE_DB_VERSION + 2,
        )
        .unwrap();
        conn.execute(
            "INSERT INTO artists (name, disambiguation, last_modified) VALUES ('Old', '', 1)",
            [],
        )
        .unwrap();

        open_schema(&mut conn, COLLECTION_VERSIONED_SCHEMAS).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM artists", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
