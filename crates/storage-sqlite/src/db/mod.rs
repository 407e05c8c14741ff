//! Connection management and schema setup.

pub mod write_actor;

pub use write_actor::{spawn_writer, WriteHandle};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, error, info};

use crate::errors::{IntoCore, StorageError};
use tickvault_core::errors::Result;

pub const DB_FILE_NAME: &str = "tickvault.db";

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applies the connection pragmas each time the pool hands a connection out.
#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        // WAL lets the pool read while the writer actor holds a transaction.
        conn.batch_execute(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(r2d2::Error::QueryError)
    }
}

/// Database file inside `data_dir`.
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

pub fn create_pool(db_path: &Path) -> Result<Arc<DbPool>> {
    debug!("Creating SQLite pool for {}", db_path.display());
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
    let pool = r2d2::Pool::builder()
        .max_size(8)
        .min_idle(Some(1))
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(ConnectionCustomizer))
        .build(manager)
        .into_core()?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    pool.get().into_core()
}

/// Apply the embedded migrations that have not run yet.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = get_connection(pool)?;
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
        error!("Database migration failed: {}", e);
        StorageError::MigrationFailed(e.to_string())
    })?;

    if applied.is_empty() {
        debug!("No pending migrations");
    }
    for version in &applied {
        info!("Applied migration {}", version);
    }
    Ok(())
}

/// Pool plus single writer over one database file.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    path: PathBuf,
}

impl Database {
    /// Open or create the database at `db_path`. Must run inside a Tokio runtime.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::MigrationFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let pool = create_pool(&path)?;
        run_migrations(&pool)?;
        let writer = spawn_writer(&pool)?;

        Ok(Self { pool, writer, path })
    }

    /// Open `tickvault.db` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(get_db_path(data_dir))
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    pub fn writer(&self) -> &WriteHandle {
        &self.writer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> Result<DbConnection> {
        get_connection(&self.pool)
    }
}
