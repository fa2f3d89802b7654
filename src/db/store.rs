//! Opening the SQLite state store and guarding it against concurrent runs.

use crate::error::PersistenceError;
use diesel::prelude::*;
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn open(path: &Path) -> Result<SqliteConnection, PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut conn = SqliteConnection::establish(&path.to_string_lossy())?;
    prepare(&mut conn)?;
    debug!("Opened state store {}", path.display());
    Ok(conn)
}

/// A throwaway store, used by simulations and tests.
pub fn open_in_memory() -> Result<SqliteConnection, PersistenceError> {
    let mut conn = SqliteConnection::establish(":memory:")?;
    prepare(&mut conn)?;
    Ok(conn)
}

fn prepare(conn: &mut SqliteConnection) -> Result<(), PersistenceError> {
    diesel::sql_query("PRAGMA busy_timeout=5000").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON").execute(conn)?;
    apply_database_migrations(conn)
}

fn apply_database_migrations(conn: &mut SqliteConnection) -> Result<(), PersistenceError> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                debug!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(PersistenceError::Migration(e.to_string())),
    }
}

/// Exclusive advisory lock on `<db path>.lock`, held until dropped.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    _file: File,
}

impl StateLock {
    /// Fails immediately with [`PersistenceError::Locked`] when another run holds it.
    pub fn acquire(db_path: &Path) -> Result<Self, PersistenceError> {
        let mut raw = db_path.as_os_str().to_owned();
        raw.push(".lock");
        let path = PathBuf::from(raw);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        try_lock_exclusive(&file, &path)?;
        debug!("Acquired state lock {}", path.display());
        Ok(StateLock { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Released by the OS when the handle closes, including on crash.
fn try_lock_exclusive(file: &File, path: &Path) -> Result<(), PersistenceError> {
    match file.try_lock() {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(PersistenceError::Locked {
            path: path.to_path_buf(),
        }),
        Err(TryLockError::Error(source)) => Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
