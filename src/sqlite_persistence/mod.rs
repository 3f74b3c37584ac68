//! Typed DDL and versioned migrations for the collection stores.
//!
//! Tables are declared as consts and lowered to `CREATE TABLE` statements.
//! Natural-key unique constraints can be declared `ON CONFLICT IGNORE`,
//! which is the deduplication mechanism the ingestion path relies on:
//! re-inserting an existing natural key is a silent no-op, never an error.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Offset added to the schema version stored in `PRAGMA user_version`, so
/// that a database file predating versioned schemas reads as unversioned.
pub const BASE_DB_VERSION: usize = 40000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Column {
            name,
            sql_type,
            is_primary_key: false,
            non_null: false,
        }
    }

    /// INTEGER PRIMARY KEY AUTOINCREMENT
    pub const fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub const fn non_null(mut self) -> Self {
        self.non_null = true;
        self
    }
}

/// A multi-column unique constraint. With `ignore_conflicts` the constraint
/// is emitted as `UNIQUE (...) ON CONFLICT IGNORE`.
#[derive(Debug, Clone, Copy)]
pub struct Unique {
    pub columns: &'static [&'static str],
    pub ignore_conflicts: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
    pub ref_column: &'static str,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub uniques: &'static [Unique],
    pub foreign_keys: &'static [ForeignKey],
}

impl Table {
    pub fn create_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (", self.name);
        for (index, column) in self.columns.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
            sql.push(' ');
            sql.push_str(match column.sql_type {
                SqlType::Text => "TEXT",
                SqlType::Integer => "INTEGER",
            });
            if column.is_primary_key {
                sql.push_str(" PRIMARY KEY AUTOINCREMENT");
            }
            if column.non_null {
                sql.push_str(" NOT NULL");
            }
        }
        for unique in self.uniques {
            sql.push_str(&format!(", UNIQUE ({})", unique.columns.join(", ")));
            if unique.ignore_conflicts {
                sql.push_str(" ON CONFLICT IGNORE");
            }
        }
        for fk in self.foreign_keys {
            sql.push_str(&format!(
                ", FOREIGN KEY({}) REFERENCES {}({})",
                fk.column, fk.references, fk.ref_column
            ));
        }
        sql.push_str(");");
        sql
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), [])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        Ok(())
    }

    pub fn drop_and_create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&format!("DROP TABLE IF EXISTS {};", self.name), [])
            .with_context(|| format!("Failed to drop table {}", self.name))?;
        self.create(conn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    /// Adds columns or tables, preserving existing rows.
    Additive,
    /// Drops and recreates tables, discarding their rows.
    Destructive,
}

pub struct Migration {
    pub kind: MigrationKind,
    pub description: &'static str,
    pub apply: fn(&Connection) -> Result<()>,
}

/// One schema version. `tables` describes the full schema at this version;
/// `migration` is the step that upgrades a store from the previous version.
pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<Migration>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version)?;
        Ok(())
    }
}

/// Create or upgrade a store to the latest schema version.
///
/// A brand new database gets the latest schema directly. An existing one has
/// the migration steps after its recorded version applied in increasing
/// order, inside one transaction. Destructive steps are logged as such.
pub fn open_schema(conn: &mut Connection, schemas: &[VersionedSchema]) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let latest = schemas.last().expect("schemas must not be empty");

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        info!("Creating schema at version {}", latest.version);
        return latest.create(conn);
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let current_version = if db_version < BASE_DB_VERSION as i64 {
        // Pre-versioned file, treat as the oldest known version.
        schemas[0].version
    } else {
        (db_version - BASE_DB_VERSION as i64) as usize
    };

    if current_version >= latest.version {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in schemas.iter().filter(|s| s.version > current_version) {
        if let Some(migration) = &schema.migration {
            match migration.kind {
                MigrationKind::Additive => info!(
                    "Migrating schema to version {}: {}",
                    schema.version, migration.description
                ),
                MigrationKind::Destructive => warn!(
                    "Migrating schema to version {} destroys existing data: {}",
                    schema.version, migration.description
                ),
            }
            (migration.apply)(&tx)
                .with_context(|| format!("Migration to version {} failed", schema.version))?;
        }
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + latest.version)?;
    tx.commit()?;
    Ok(())
}
